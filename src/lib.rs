use std::collections::HashMap;

pub mod client;
pub mod decode;
pub mod download;
pub mod encode;
pub mod handshake;
pub mod init;
pub mod message;
pub mod metainfo;
pub mod piece;
pub mod torrent;
pub mod tracker;
pub mod work;
pub mod worker;

/// Protocol identifier exchanged during the handshake
pub const PSTR: &str = "BitTorrent protocol";

/// Identity presented to peers and the tracker
pub const PEER_ID: &[u8; 20] = b"-SG0001-235711131719";

/// Total size of a serialised handshake
pub const HANDSHAKE_BYTES_LEN: usize = 68;

/// A decoded bencode value.
///
/// Byte strings are raw bytes (piece hashes and compact peer lists are not
/// text), and dictionary keys are likewise raw bytes. When the same key
/// appears more than once in the input, the last occurrence wins.
#[derive(Debug, PartialEq)]
pub enum BencodeValue {
    Integer(i64),
    ByteString(Vec<u8>),
    List(Vec<BencodeValue>),
    Dict(HashMap<Vec<u8>, BencodeValue>),
}
