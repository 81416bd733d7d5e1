use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;
use tracing::debug;

/// Downloaded piece
#[derive(Debug, PartialEq)]
pub struct Piece {
    /// Index of piece within file
    pub index: u32,
    /// Piece data
    pub buf: Vec<u8>,
}

/// Lifecycle of a single piece, tracked solely by the assembler
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PieceStatus {
    Waiting,
    InProgress,
    Complete,
}

/// Report from a worker about one piece
#[derive(Debug)]
pub enum PieceUpdate {
    /// A worker dequeued the piece and began fetching it
    Started { index: u32 },
    /// A worker fetched and verified the piece
    Completed(Piece),
}

/// Receive piece updates from workers and assemble the completed payload.
///
/// Holds the only record of per-piece status, so a piece requeued while
/// another worker was still mid-flight on it cannot complete twice: the
/// first completion marks the piece `Complete` and any later duplicate is
/// discarded. Fires the completion signal once every piece has arrived and
/// returns the pieces concatenated in ascending index order. Returns `None`
/// if the update channel closes before the payload is whole, which means
/// every worker has died.
pub async fn assemble(
    no_of_pieces: u32,
    mut rx: Receiver<PieceUpdate>,
    completion_tx: watch::Sender<bool>,
) -> Option<Vec<u8>> {
    let mut statuses = vec![PieceStatus::Waiting; no_of_pieces as usize];
    let mut pieces: Vec<Piece> = Vec::with_capacity(no_of_pieces as usize);
    while let Some(update) = rx.recv().await {
        match update {
            PieceUpdate::Started { index } => {
                let status = &mut statuses[index as usize];
                if let PieceStatus::Waiting = status {
                    *status = PieceStatus::InProgress;
                }
            }
            PieceUpdate::Completed(piece) => {
                let status = &mut statuses[piece.index as usize];
                if let PieceStatus::Complete = status {
                    debug!(index = piece.index, "discarding duplicate completion");
                    continue;
                }
                *status = PieceStatus::Complete;
                pieces.push(piece);
                if pieces.len() == no_of_pieces as usize {
                    completion_tx.send(true).unwrap();
                    break;
                }
            }
        }
    }
    if pieces.len() < no_of_pieces as usize {
        return None;
    }
    pieces.sort_unstable_by_key(|piece| piece.index);
    let mut buf = Vec::new();
    for piece in pieces {
        buf.extend_from_slice(&piece.buf);
    }
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assembler_puts_pieces_together_in_index_order() {
        const CHANNEL_BUFFER_SIZE: usize = 8;
        let bufs: Vec<Vec<u8>> = vec![
            vec![0x0a; 64],
            vec![0x0b; 64],
            vec![0x0c; 64],
            // last piece is shorter than the rest
            vec![0x0d; 32],
        ];
        let expected = bufs.concat();

        let (tx, rx) = tokio::sync::mpsc::channel(CHANNEL_BUFFER_SIZE);
        let tx1 = tx.clone();
        let (completion_tx, completion_rx) = tokio::sync::watch::channel(false);

        let bufs_one = bufs.clone();
        let sender_one_fut = async move {
            tokio::try_join!(
                tx.send(PieceUpdate::Started { index: 1 }),
                tx.send(PieceUpdate::Completed(Piece {
                    index: 1,
                    buf: bufs_one[1].clone(),
                })),
                tx.send(PieceUpdate::Started { index: 3 }),
                tx.send(PieceUpdate::Completed(Piece {
                    index: 3,
                    buf: bufs_one[3].clone(),
                })),
            )
            .unwrap()
        };

        let bufs_two = bufs.clone();
        let sender_two_fut = async move {
            tokio::try_join!(
                tx1.send(PieceUpdate::Started { index: 2 }),
                tx1.send(PieceUpdate::Completed(Piece {
                    index: 2,
                    buf: bufs_two[2].clone(),
                })),
                tx1.send(PieceUpdate::Started { index: 0 }),
                tx1.send(PieceUpdate::Completed(Piece {
                    index: 0,
                    buf: bufs_two[0].clone(),
                })),
            )
            .unwrap()
        };

        let (_, _, assembled) = tokio::join!(
            sender_one_fut,
            sender_two_fut,
            assemble(4, rx, completion_tx)
        );
        assert_eq!(assembled, Some(expected));
        assert!(*completion_rx.borrow());
    }

    #[tokio::test]
    async fn duplicate_completions_are_discarded() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let (completion_tx, _completion_rx) = tokio::sync::watch::channel(false);

        let sender_fut = async move {
            tx.send(PieceUpdate::Completed(Piece {
                index: 0,
                buf: vec![0x0a; 16],
            }))
            .await
            .unwrap();
            tx.send(PieceUpdate::Completed(Piece {
                index: 0,
                buf: vec![0xff; 16],
            }))
            .await
            .unwrap();
            tx.send(PieceUpdate::Completed(Piece {
                index: 1,
                buf: vec![0x0b; 16],
            }))
            .await
            .unwrap();
        };

        let (_, assembled) = tokio::join!(sender_fut, assemble(2, rx, completion_tx));
        let expected = [vec![0x0a; 16], vec![0x0b; 16]].concat();
        assert_eq!(assembled, Some(expected));
    }

    #[tokio::test]
    async fn assembler_returns_none_if_updates_end_early() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let (completion_tx, completion_rx) = tokio::sync::watch::channel(false);

        let sender_fut = async move {
            tx.send(PieceUpdate::Completed(Piece {
                index: 0,
                buf: vec![0x0a; 16],
            }))
            .await
            .unwrap();
            // channel closes with two pieces still outstanding
        };

        let (_, assembled) = tokio::join!(sender_fut, assemble(3, rx, completion_tx));
        assert_eq!(assembled, None);
        assert!(!*completion_rx.borrow());
    }
}
