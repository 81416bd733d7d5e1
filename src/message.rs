use tokio::io::{AsyncRead, AsyncReadExt};

const BITS_IN_BYTE: usize = 8;

/// Failure while reading or framing a peer message
#[derive(Debug)]
pub enum MessageError {
    /// Stream ended, or a frame carried fewer bytes than its id requires
    TruncatedFrame,
    /// Frame id outside the recognised set
    UnexpectedId(u8),
    Io(std::io::Error),
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageError::TruncatedFrame => write!(f, "truncated frame from peer"),
            MessageError::UnexpectedId(id) => write!(f, "unexpected message id: {}", id),
            MessageError::Io(err) => write!(f, "i/o failure reading message: {}", err),
        }
    }
}

impl std::error::Error for MessageError {}

fn read_failure(err: std::io::Error) -> MessageError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        MessageError::TruncatedFrame
    } else {
        MessageError::Io(err)
    }
}

/// Wrapper type for bitfield message payload
#[derive(Debug, PartialEq)]
pub struct Bitfield {
    data: Vec<u8>,
}

impl Bitfield {
    /// Create instance from bitfield message payload
    pub fn new(data: Vec<u8>) -> Bitfield {
        Bitfield { data }
    }

    /// Check if the bitfield contains the piece with the given index.
    ///
    /// Bits are most-significant-first within each byte. Panics if the index
    /// lies beyond the buffer, rather than silently reporting the piece as
    /// missing.
    pub fn has_piece(&self, idx: usize) -> bool {
        let byte_index = idx / BITS_IN_BYTE;
        let offset = idx % BITS_IN_BYTE;
        let shifted_piece_bit = self.data[byte_index] >> (BITS_IN_BYTE - 1 - offset);
        shifted_piece_bit & 0b00000001 == 0b00000001
    }
}

/// Peer message types
#[derive(Debug, PartialEq)]
pub enum Message {
    KeepAlive,
    Unchoke,
    Interested,
    /// Describes which pieces (by index) the peer holds
    Bitfield(Bitfield),
    /// Request a subset of a piece (a block)
    Request { index: u32, begin: u32, length: u32 },
    /// Send a subset of a piece (a block)
    Piece { index: u32, begin: u32, block: Vec<u8> },
}

impl Message {
    /// Deserialise the next frame on the stream to a [`Message`]
    pub async fn deserialise<T>(reader: &mut T) -> Result<Message, MessageError>
    where
        T: AsyncRead + Unpin,
    {
        let len = reader.read_u32().await.map_err(read_failure)?;
        if len == 0 {
            return Ok(Message::KeepAlive);
        }

        let id = reader.read_u8().await.map_err(read_failure)?;

        if len == 1 {
            return match id {
                0x01 => Ok(Message::Unchoke),
                0x02 => Ok(Message::Interested),
                _ => Err(MessageError::UnexpectedId(id)),
            };
        }

        let mut bytes = vec![0; len as usize - 1];
        reader.read_exact(&mut bytes[..]).await.map_err(read_failure)?;
        match id {
            0x05 => Ok(Message::Bitfield(Bitfield::new(bytes))),
            0x06 => {
                if bytes.len() != 12 {
                    return Err(MessageError::TruncatedFrame);
                }
                let index = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let begin = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                let length = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
                Ok(Message::Request {
                    index,
                    begin,
                    length,
                })
            }
            0x07 => {
                if bytes.len() < 8 {
                    return Err(MessageError::TruncatedFrame);
                }
                let index = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let begin = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                let block = bytes[8..].to_vec();
                Ok(Message::Piece {
                    index,
                    begin,
                    block,
                })
            }
            _ => Err(MessageError::UnexpectedId(id)),
        }
    }

    /// Serialise [`Message`] to raw bytes
    pub fn serialise(&self) -> Vec<u8> {
        match self {
            Message::KeepAlive => u32::to_be_bytes(0).to_vec(),
            Message::Unchoke => {
                let mut buf = u32::to_be_bytes(1).to_vec();
                buf.push(1);
                buf
            }
            Message::Interested => {
                let mut buf = u32::to_be_bytes(1).to_vec();
                buf.push(2);
                buf
            }
            Message::Bitfield(bitfield) => {
                let mut buf = u32::to_be_bytes(1 + bitfield.data.len() as u32).to_vec();
                buf.push(5);
                buf.extend_from_slice(&bitfield.data);
                buf
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                let mut buf = u32::to_be_bytes(13).to_vec();
                buf.push(6);
                buf.extend_from_slice(&u32::to_be_bytes(*index));
                buf.extend_from_slice(&u32::to_be_bytes(*begin));
                buf.extend_from_slice(&u32::to_be_bytes(*length));
                buf
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                let mut buf = u32::to_be_bytes(9 + block.len() as u32).to_vec();
                buf.push(7);
                buf.extend_from_slice(&u32::to_be_bytes(*index));
                buf.extend_from_slice(&u32::to_be_bytes(*begin));
                buf.extend_from_slice(block);
                buf
            }
        }
    }
}
