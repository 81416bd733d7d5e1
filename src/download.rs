use std::error::Error;
use std::fmt;
use std::net::SocketAddrV4;

use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, warn};

use crate::client::Client;
use crate::piece::{assemble, PieceUpdate};
use crate::torrent::Torrent;
use crate::tracker::Peer;
use crate::work::{self, Work};
use crate::worker::Worker;

#[derive(Debug, PartialEq)]
pub enum DownloadError {
    PeersExhausted,
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::PeersExhausted => {
                write!(f, "ran out of peers before all pieces completed")
            }
        }
    }
}

impl Error for DownloadError {}

/// Download the torrent payload from its peers.
///
/// One worker task runs per peer, all pulling from a shared work queue.
/// Failed pieces flow back onto the queue through the requeue task, so the
/// download only fails once every peer has been excluded while pieces are
/// still missing.
pub async fn download(torrent: Torrent) -> Result<Vec<u8>, DownloadError> {
    let work = work::from_torrent(&torrent);
    let no_of_pieces = work.len();
    if no_of_pieces == 0 {
        return Ok(Vec::new());
    }

    let (work_tx, work_rx) = flume::bounded(no_of_pieces);
    for item in work {
        work_tx.send_async(item).await.unwrap();
    }
    let (update_tx, update_rx) = mpsc::channel(no_of_pieces);
    let (error_tx, mut error_rx) = mpsc::channel::<Work>(no_of_pieces);
    let (completion_tx, completion_rx) = watch::channel(false);

    let info_hash = torrent.info_hash();
    let mut worker_handles = Vec::new();
    for peer in torrent.peers {
        let work_receiver = work_rx.clone();
        let work_sender = work_tx.clone();
        let update_sender = update_tx.clone();
        let error_sender = error_tx.clone();
        let completion_receiver = completion_rx.clone();
        worker_handles.push(tokio::spawn(async move {
            process(
                peer,
                info_hash,
                work_receiver,
                work_sender,
                update_sender,
                error_sender,
                completion_receiver,
            )
            .await;
        }));
    }

    let requeue_work_tx = work_tx.clone();
    let mut requeue_completion_rx = completion_rx.clone();
    let requeue_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = requeue_completion_rx.changed() => break,
                failed = error_rx.recv() => match failed {
                    Some(item) => {
                        if requeue_work_tx.send_async(item).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    drop(work_tx);
    drop(work_rx);
    drop(update_tx);
    drop(error_tx);

    let assembled = assemble(no_of_pieces as u32, update_rx, completion_tx).await;
    for handle in worker_handles {
        if handle.await.is_err() {
            warn!("worker task ended abnormally");
        }
    }
    let _ = requeue_handle.await;

    match assembled {
        Some(payload) => Ok(payload),
        None => Err(DownloadError::PeersExhausted),
    }
}

#[instrument(skip(
    info_hash,
    work_receiver,
    work_sender,
    update_sender,
    error_sender,
    completion_receiver
))]
async fn process(
    peer: Peer,
    info_hash: [u8; 20],
    work_receiver: flume::Receiver<Work>,
    work_sender: flume::Sender<Work>,
    update_sender: mpsc::Sender<PieceUpdate>,
    error_sender: mpsc::Sender<Work>,
    completion_receiver: watch::Receiver<bool>,
) {
    let addr = SocketAddrV4::new(peer.ip, peer.port);
    match Client::connect(addr, info_hash).await {
        Err(e) => warn!("unable to establish peer session: {}", e),
        Ok(client) => {
            info!("established peer session");
            let mut worker = Worker::new(
                client,
                work_receiver,
                work_sender,
                update_sender,
                error_sender,
                completion_receiver,
            );
            match worker.download().await {
                Err(e) => warn!("peer excluded from download: {}", e),
                Ok(()) => info!("worker finished"),
            }
        }
    }
}
