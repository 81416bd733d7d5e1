use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::client::{Client, ClientError};
use crate::piece::{Piece, PieceUpdate};
use crate::work::Work;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Piece download worker
pub struct Worker<T: AsyncRead + AsyncWrite + Unpin> {
    client: Client<T>,
    work_receiver: flume::Receiver<Work>,
    work_sender: flume::Sender<Work>,
    update_sender: mpsc::Sender<PieceUpdate>,
    error_sender: mpsc::Sender<Work>,
    completion_receiver: watch::Receiver<bool>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Worker<T> {
    pub fn new(
        client: Client<T>,
        work_receiver: flume::Receiver<Work>,
        work_sender: flume::Sender<Work>,
        update_sender: mpsc::Sender<PieceUpdate>,
        error_sender: mpsc::Sender<Work>,
        completion_receiver: watch::Receiver<bool>,
    ) -> Worker<T> {
        Worker {
            client,
            work_receiver,
            work_sender,
            update_sender,
            error_sender,
            completion_receiver,
        }
    }

    /// Download pieces from the connected peer until the payload is complete.
    ///
    /// Each failed fetch puts its piece onto the error queue for requeueing.
    /// An integrity or length failure leaves the connection usable, so the
    /// worker carries on; any other failure excludes this peer and ends the
    /// worker with the error.
    pub async fn download(&mut self) -> Result<(), ClientError> {
        loop {
            let work = tokio::select! {
                _ = self.completion_receiver.changed() => return Ok(()),
                work = self.work_receiver.recv_async() => match work {
                    Ok(work) => work,
                    Err(_) => return Ok(()),
                },
            };

            if !self.client.has_piece(work.index as usize) {
                // hand it back for a worker whose peer holds this piece
                if self.work_sender.send_async(work).await.is_err() {
                    return Ok(());
                }
                tokio::task::yield_now().await;
                continue;
            }

            let started = PieceUpdate::Started { index: work.index };
            if self.update_sender.send(started).await.is_err() {
                return Ok(());
            }

            let fetch = self
                .client
                .download_piece(work.index, work.length, work.hash);
            match timeout(FETCH_TIMEOUT, fetch).await {
                Ok(Ok(buf)) => {
                    info!(index = work.index, "piece downloaded and verified");
                    let completed = PieceUpdate::Completed(Piece {
                        index: work.index,
                        buf,
                    });
                    if self.update_sender.send(completed).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(Err(
                    err @ (ClientError::IntegrityCheckFailed { .. }
                    | ClientError::IncompleteData { .. }),
                )) => {
                    warn!(
                        index = work.index,
                        error = %err,
                        "piece failed verification, putting back on queue"
                    );
                    if self.error_sender.send(work).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(Err(err)) => {
                    warn!(
                        index = work.index,
                        error = %err,
                        "peer session failed, putting piece back on queue"
                    );
                    let _ = self.error_sender.send(work).await;
                    return Err(err);
                }
                Err(_) => {
                    warn!(
                        index = work.index,
                        "timed out downloading piece, putting back on queue"
                    );
                    if self.error_sender.send(work).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
