use std::net::SocketAddrV4;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::handshake::Handshake;
use crate::message::{Bitfield, Message, MessageError};
use crate::{HANDSHAKE_BYTES_LEN, PEER_ID};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of a block, the unit a piece is transferred in
pub const BLOCK_SIZE: u32 = 16384;

/// Failure within a peer session
#[derive(Debug)]
pub enum ClientError {
    /// Transport could not be opened, or not within the deadline
    Connect(std::io::Error),
    /// Peer did not finish session establishment within the deadline
    EstablishTimeout,
    InfoHashMismatch {
        ours: [u8; 20],
        theirs: [u8; 20],
    },
    /// First message after the handshake was not a bitfield
    ExpectedBitfield,
    ExpectedUnchoke,
    /// Peer sent something other than a piece message mid-transfer
    ExpectedPiece,
    /// Block lies (partly) outside the piece being fetched
    BlockOutOfBounds {
        begin: u32,
        length: u32,
    },
    /// Assembled piece length differs from the expected length
    IncompleteData {
        expected: u32,
        received: u32,
    },
    IntegrityCheckFailed {
        index: u32,
    },
    Message(MessageError),
    Io(std::io::Error),
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|val| format!("{:02x}", val)).collect()
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connect(err) => write!(f, "failed to connect to peer: {}", err),
            ClientError::EstablishTimeout => {
                write!(f, "peer did not complete session establishment in time")
            }
            ClientError::InfoHashMismatch { ours, theirs } => {
                write!(f, "info hash mismatch: us={}, peer={}", hex(ours), hex(theirs))
            }
            ClientError::ExpectedBitfield => write!(f, "first message not bitfield"),
            ClientError::ExpectedUnchoke => write!(f, "expected unchoke from peer"),
            ClientError::ExpectedPiece => write!(f, "expected piece message from peer"),
            ClientError::BlockOutOfBounds { begin, length } => {
                write!(
                    f,
                    "block at offset {} with length {} lies outside its piece",
                    begin, length
                )
            }
            ClientError::IncompleteData { expected, received } => {
                write!(
                    f,
                    "assembled {} bytes for a piece of {} bytes",
                    received, expected
                )
            }
            ClientError::IntegrityCheckFailed { index } => {
                write!(f, "piece {} failed its integrity check", index)
            }
            ClientError::Message(err) => write!(f, "peer protocol error: {}", err),
            ClientError::Io(err) => write!(f, "i/o failure in peer session: {}", err),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<MessageError> for ClientError {
    fn from(err: MessageError) -> ClientError {
        ClientError::Message(err)
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> ClientError {
        ClientError::Io(err)
    }
}

/// Connected peer.
///
/// Once established, a session stays usable for any number of piece fetches
/// over the same connection, saving a handshake round trip per piece.
pub struct Client<T> {
    stream: T,
    bitfield: Bitfield,
}

impl Client<BufReader<TcpStream>> {
    /// Open a TCP connection to the peer and establish a session over it
    pub async fn connect(
        addr: SocketAddrV4,
        info_hash: [u8; 20],
    ) -> Result<Client<BufReader<TcpStream>>, ClientError> {
        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(ClientError::Connect(err)),
            Err(_) => {
                let err = std::io::Error::from(std::io::ErrorKind::TimedOut);
                return Err(ClientError::Connect(err));
            }
        };
        Client::new(BufReader::new(stream), info_hash).await
    }
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Establish a session over the given transport: exchange handshakes,
    /// take the peer's bitfield, declare interest, and wait to be unchoked
    pub async fn new(stream: T, info_hash: [u8; 20]) -> Result<Client<T>, ClientError> {
        match timeout(ESTABLISH_TIMEOUT, Client::establish(stream, info_hash)).await {
            Ok(res) => res,
            Err(_) => Err(ClientError::EstablishTimeout),
        }
    }

    async fn establish(mut stream: T, info_hash: [u8; 20]) -> Result<Client<T>, ClientError> {
        let initial_handshake = Handshake::new(info_hash, *PEER_ID);
        stream.write_all(&initial_handshake.serialise()[..]).await?;

        let mut response = [0x00; HANDSHAKE_BYTES_LEN];
        stream.read_exact(&mut response[..]).await?;
        let their_handshake = Handshake::deserialise(&response);
        if their_handshake.info_hash() != &info_hash {
            return Err(ClientError::InfoHashMismatch {
                ours: info_hash,
                theirs: *their_handshake.info_hash(),
            });
        }

        let bitfield = match Self::next_message(&mut stream).await? {
            Message::Bitfield(bitfield) => bitfield,
            _ => return Err(ClientError::ExpectedBitfield),
        };

        stream.write_all(&Message::Interested.serialise()[..]).await?;

        match Self::next_message(&mut stream).await? {
            Message::Unchoke => {}
            _ => return Err(ClientError::ExpectedUnchoke),
        }

        Ok(Client { stream, bitfield })
    }

    /// Read the next substantive message, consuming keep-alives transparently
    async fn next_message(stream: &mut T) -> Result<Message, ClientError> {
        loop {
            match Message::deserialise(stream).await? {
                Message::KeepAlive => continue,
                message => return Ok(message),
            }
        }
    }

    /// Serialise and send a message to the peer
    pub async fn send(&mut self, message: Message) -> Result<(), ClientError> {
        self.stream.write_all(&message.serialise()[..]).await?;
        Ok(())
    }

    /// Receive the next message from the peer, skipping keep-alives
    pub async fn receive(&mut self) -> Result<Message, ClientError> {
        Self::next_message(&mut self.stream).await
    }

    /// Whether the peer advertised the piece with the given index
    pub fn has_piece(&self, index: usize) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Download a single piece and verify it against its expected hash.
    ///
    /// All block requests are sent up front, then responses are matched to
    /// their position by the index and begin fields they carry rather than
    /// by arrival order.
    pub async fn download_piece(
        &mut self,
        index: u32,
        length: u32,
        hash: [u8; 20],
    ) -> Result<Vec<u8>, ClientError> {
        let no_of_blocks = length.div_ceil(BLOCK_SIZE);
        for block in 0..no_of_blocks {
            let begin = block * BLOCK_SIZE;
            let block_length = if begin + BLOCK_SIZE <= length {
                BLOCK_SIZE
            } else {
                length - begin
            };
            self.send(Message::Request {
                index,
                begin,
                length: block_length,
            })
            .await?;
        }

        let mut buf = vec![0x00; length as usize];
        let mut received: u32 = 0;
        while received < length {
            let (piece_index, begin, block) = match self.receive().await? {
                Message::Piece {
                    index,
                    begin,
                    block,
                } => (index, begin, block),
                _ => return Err(ClientError::ExpectedPiece),
            };
            if piece_index != index {
                debug!(
                    expected = index,
                    received = piece_index,
                    "skipping block for stale piece"
                );
                continue;
            }
            let end = begin as usize + block.len();
            if end > buf.len() {
                return Err(ClientError::BlockOutOfBounds {
                    begin,
                    length: block.len() as u32,
                });
            }
            buf[begin as usize..end].copy_from_slice(&block[..]);
            received += block.len() as u32;
        }
        if received != length {
            return Err(ClientError::IncompleteData {
                expected: length,
                received,
            });
        }

        let downloaded_hash = sha1_smol::Sha1::from(&buf).digest().bytes();
        if downloaded_hash != hash {
            return Err(ClientError::IntegrityCheckFailed { index });
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THEIR_PEER_ID: &[u8; 20] = b"-DEF123-efgh12345678";

    /// Script the message exchange that establishes a session
    fn establishment(
        builder: &mut tokio_test::io::Builder,
        info_hash: [u8; 20],
        bitfield: Vec<u8>,
    ) {
        builder
            .write(&Handshake::new(info_hash, *PEER_ID).serialise())
            .read(&Handshake::new(info_hash, *THEIR_PEER_ID).serialise())
            .read(&Message::Bitfield(Bitfield::new(bitfield)).serialise())
            .write(&Message::Interested.serialise())
            .read(&Message::Unchoke.serialise());
    }

    #[tokio::test]
    async fn client_establishes_session_with_peer() {
        let info_hash = [0x01; 20];
        let mut builder = tokio_test::io::Builder::new();
        establishment(&mut builder, info_hash, vec![0b10100000]);
        let mock_socket = builder.build();

        let client = Client::new(mock_socket, info_hash).await.unwrap();
        assert!(client.has_piece(0));
        assert!(!client.has_piece(1));
        assert!(client.has_piece(2));
    }

    #[tokio::test]
    async fn return_error_if_incorrect_info_hash_in_handshake_response() {
        let info_hash = [0x01; 20];
        let incorrect_info_hash = [0x02; 20];

        let mock_socket = tokio_test::io::Builder::new()
            .write(&Handshake::new(info_hash, *PEER_ID).serialise())
            .read(&Handshake::new(incorrect_info_hash, *THEIR_PEER_ID).serialise())
            .build();
        let res = Client::new(mock_socket, info_hash).await;

        assert!(res.is_err_and(|err| matches!(
            err,
            ClientError::InfoHashMismatch {
                ours: [0x01, ..],
                theirs: [0x02, ..]
            }
        )));
    }

    #[tokio::test]
    async fn return_error_if_first_message_is_not_a_bitfield() {
        let info_hash = [0x01; 20];

        let mock_socket = tokio_test::io::Builder::new()
            .write(&Handshake::new(info_hash, *PEER_ID).serialise())
            .read(&Handshake::new(info_hash, *THEIR_PEER_ID).serialise())
            .read(&Message::Unchoke.serialise())
            .build();
        let res = Client::new(mock_socket, info_hash).await;

        assert!(res.is_err_and(|err| matches!(err, ClientError::ExpectedBitfield)));
    }

    #[tokio::test]
    async fn return_error_if_no_unchoke_after_declaring_interest() {
        let info_hash = [0x01; 20];

        let mock_socket = tokio_test::io::Builder::new()
            .write(&Handshake::new(info_hash, *PEER_ID).serialise())
            .read(&Handshake::new(info_hash, *THEIR_PEER_ID).serialise())
            .read(&Message::Bitfield(Bitfield::new(vec![0b10000000])).serialise())
            .write(&Message::Interested.serialise())
            .read(&Message::Interested.serialise())
            .build();
        let res = Client::new(mock_socket, info_hash).await;

        assert!(res.is_err_and(|err| matches!(err, ClientError::ExpectedUnchoke)));
    }

    #[tokio::test]
    async fn keep_alive_frames_are_consumed_transparently() {
        let info_hash = [0x01; 20];

        let mock_socket = tokio_test::io::Builder::new()
            .write(&Handshake::new(info_hash, *PEER_ID).serialise())
            .read(&Handshake::new(info_hash, *THEIR_PEER_ID).serialise())
            .read(&Message::KeepAlive.serialise())
            .read(&Message::Bitfield(Bitfield::new(vec![0b10000000])).serialise())
            .write(&Message::Interested.serialise())
            .read(&Message::KeepAlive.serialise())
            .read(&Message::KeepAlive.serialise())
            .read(&Message::Unchoke.serialise())
            .build();

        let client = Client::new(mock_socket, info_hash).await.unwrap();
        assert!(client.has_piece(0));
    }

    #[tokio::test]
    async fn download_piece_requests_and_reassembles_all_blocks() {
        let info_hash = [0x01; 20];
        let block_one = vec![0xaa; BLOCK_SIZE as usize];
        let block_two = vec![0xbb; 100];
        let piece = [block_one.clone(), block_two.clone()].concat();
        let piece_hash = sha1_smol::Sha1::from(&piece).digest().bytes();

        let mut builder = tokio_test::io::Builder::new();
        establishment(&mut builder, info_hash, vec![0b10000000]);
        let mock_socket = builder
            .write(
                &Message::Request {
                    index: 0,
                    begin: 0,
                    length: BLOCK_SIZE,
                }
                .serialise(),
            )
            .write(
                &Message::Request {
                    index: 0,
                    begin: BLOCK_SIZE,
                    length: 100,
                }
                .serialise(),
            )
            .read(
                &Message::Piece {
                    index: 0,
                    begin: 0,
                    block: block_one.clone(),
                }
                .serialise(),
            )
            .read(
                &Message::Piece {
                    index: 0,
                    begin: BLOCK_SIZE,
                    block: block_two.clone(),
                }
                .serialise(),
            )
            .build();

        let mut client = Client::new(mock_socket, info_hash).await.unwrap();
        let res = client
            .download_piece(0, piece.len() as u32, piece_hash)
            .await;
        assert!(res.is_ok_and(|buf| buf == piece));
    }

    #[tokio::test]
    async fn blocks_arriving_out_of_order_are_placed_by_their_offsets() {
        let info_hash = [0x01; 20];
        let block_one = vec![0xaa; BLOCK_SIZE as usize];
        let block_two = vec![0xbb; 100];
        let piece = [block_one.clone(), block_two.clone()].concat();
        let piece_hash = sha1_smol::Sha1::from(&piece).digest().bytes();

        let mut builder = tokio_test::io::Builder::new();
        establishment(&mut builder, info_hash, vec![0b10000000]);
        let mock_socket = builder
            .write(
                &Message::Request {
                    index: 0,
                    begin: 0,
                    length: BLOCK_SIZE,
                }
                .serialise(),
            )
            .write(
                &Message::Request {
                    index: 0,
                    begin: BLOCK_SIZE,
                    length: 100,
                }
                .serialise(),
            )
            .read(
                &Message::Piece {
                    index: 0,
                    begin: BLOCK_SIZE,
                    block: block_two.clone(),
                }
                .serialise(),
            )
            .read(
                &Message::Piece {
                    index: 0,
                    begin: 0,
                    block: block_one.clone(),
                }
                .serialise(),
            )
            .build();

        let mut client = Client::new(mock_socket, info_hash).await.unwrap();
        let res = client
            .download_piece(0, piece.len() as u32, piece_hash)
            .await;
        assert!(res.is_ok_and(|buf| buf == piece));
    }

    #[tokio::test]
    async fn blocks_for_other_pieces_are_skipped() {
        let info_hash = [0x01; 20];
        let piece = vec![0xaa; 64];
        let piece_hash = sha1_smol::Sha1::from(&piece).digest().bytes();

        let mut builder = tokio_test::io::Builder::new();
        establishment(&mut builder, info_hash, vec![0b11000000]);
        let mock_socket = builder
            .write(
                &Message::Request {
                    index: 1,
                    begin: 0,
                    length: 64,
                }
                .serialise(),
            )
            .read(
                &Message::Piece {
                    index: 0,
                    begin: 0,
                    block: vec![0xff; 64],
                }
                .serialise(),
            )
            .read(
                &Message::Piece {
                    index: 1,
                    begin: 0,
                    block: piece.clone(),
                }
                .serialise(),
            )
            .build();

        let mut client = Client::new(mock_socket, info_hash).await.unwrap();
        let res = client.download_piece(1, 64, piece_hash).await;
        assert!(res.is_ok_and(|buf| buf == piece));
    }

    #[tokio::test]
    async fn return_error_if_block_lies_outside_piece() {
        let info_hash = [0x01; 20];

        let mut builder = tokio_test::io::Builder::new();
        establishment(&mut builder, info_hash, vec![0b10000000]);
        let mock_socket = builder
            .write(
                &Message::Request {
                    index: 0,
                    begin: 0,
                    length: 64,
                }
                .serialise(),
            )
            .read(
                &Message::Piece {
                    index: 0,
                    begin: 64,
                    block: vec![0xff; 16],
                }
                .serialise(),
            )
            .build();

        let mut client = Client::new(mock_socket, info_hash).await.unwrap();
        let res = client.download_piece(0, 64, [0x00; 20]).await;
        assert!(res.is_err_and(|err| matches!(
            err,
            ClientError::BlockOutOfBounds {
                begin: 64,
                length: 16
            }
        )));
    }

    #[tokio::test]
    async fn return_error_if_duplicate_blocks_overcount_piece() {
        let info_hash = [0x01; 20];
        let block = vec![0xaa; 48];

        let mut builder = tokio_test::io::Builder::new();
        establishment(&mut builder, info_hash, vec![0b10000000]);
        let mock_socket = builder
            .write(
                &Message::Request {
                    index: 0,
                    begin: 0,
                    length: 64,
                }
                .serialise(),
            )
            .read(
                &Message::Piece {
                    index: 0,
                    begin: 0,
                    block: block.clone(),
                }
                .serialise(),
            )
            .read(
                &Message::Piece {
                    index: 0,
                    begin: 0,
                    block: block.clone(),
                }
                .serialise(),
            )
            .build();

        let mut client = Client::new(mock_socket, info_hash).await.unwrap();
        let res = client.download_piece(0, 64, [0x00; 20]).await;
        assert!(res.is_err_and(|err| matches!(
            err,
            ClientError::IncompleteData {
                expected: 64,
                received: 96
            }
        )));
    }

    #[tokio::test]
    async fn return_error_if_peer_sends_non_piece_message_mid_transfer() {
        let info_hash = [0x01; 20];

        let mut builder = tokio_test::io::Builder::new();
        establishment(&mut builder, info_hash, vec![0b10000000]);
        let mock_socket = builder
            .write(
                &Message::Request {
                    index: 0,
                    begin: 0,
                    length: 64,
                }
                .serialise(),
            )
            .read(&Message::Unchoke.serialise())
            .build();

        let mut client = Client::new(mock_socket, info_hash).await.unwrap();
        let res = client.download_piece(0, 64, [0x00; 20]).await;
        assert!(res.is_err_and(|err| matches!(err, ClientError::ExpectedPiece)));
    }

    #[tokio::test]
    async fn return_error_if_downloaded_piece_fails_integrity_check() {
        let info_hash = [0x01; 20];
        let piece = vec![0xaa; 64];
        let wrong_hash = [0xde; 20];

        let mut builder = tokio_test::io::Builder::new();
        establishment(&mut builder, info_hash, vec![0b10000000]);
        let mock_socket = builder
            .write(
                &Message::Request {
                    index: 0,
                    begin: 0,
                    length: 64,
                }
                .serialise(),
            )
            .read(
                &Message::Piece {
                    index: 0,
                    begin: 0,
                    block: piece.clone(),
                }
                .serialise(),
            )
            .build();

        let mut client = Client::new(mock_socket, info_hash).await.unwrap();
        let res = client.download_piece(0, 64, wrong_hash).await;
        assert!(res.is_err_and(|err| matches!(
            err,
            ClientError::IntegrityCheckFailed { index: 0 }
        )));
    }

    #[tokio::test]
    async fn return_error_if_stream_ends_mid_piece() {
        let info_hash = [0x01; 20];
        let full_frame = Message::Piece {
            index: 0,
            begin: 0,
            block: vec![0xaa; 64],
        }
        .serialise();

        let mut builder = tokio_test::io::Builder::new();
        establishment(&mut builder, info_hash, vec![0b10000000]);
        let mock_socket = builder
            .write(
                &Message::Request {
                    index: 0,
                    begin: 0,
                    length: 64,
                }
                .serialise(),
            )
            .read(&full_frame[..10])
            .build();

        let mut client = Client::new(mock_socket, info_hash).await.unwrap();
        let res = client.download_piece(0, 64, [0x00; 20]).await;
        assert!(res.is_err_and(
            |err| matches!(err, ClientError::Message(MessageError::TruncatedFrame))
        ));
    }
}
