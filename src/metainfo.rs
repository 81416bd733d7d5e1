use std::collections::HashMap;

use crate::encode::encode;
use crate::BencodeValue;

const ANNOUNCE_KEY: &[u8] = b"announce";
const INFO_KEY: &[u8] = b"info";
const NAME_KEY: &[u8] = b"name";
const LENGTH_KEY: &[u8] = b"length";
const FILES_KEY: &[u8] = b"files";
const PATH_KEY: &[u8] = b"path";
const PIECE_LENGTH_KEY: &[u8] = b"piece length";
const PIECES_KEY: &[u8] = b"pieces";
const SHA1_HASH_SIZE: usize = 20;

/// Failure while interpreting a decoded metainfo file
#[derive(Debug, PartialEq)]
pub enum MetainfoError {
    /// Top level value was not a dict
    NotADict,
    MissingKey(&'static str),
    WrongType(&'static str),
    /// A textual field held bytes that are not valid UTF-8
    InvalidString(&'static str),
    /// An integer field was negative where a size was expected
    InvalidInteger(&'static str),
    /// `pieces` value is not a whole number of 20 byte hashes
    MalformedPieces,
    /// `info` dict carries both `length` and `files`
    ConflictingFileKeys,
    /// `info` dict carries neither `length` nor `files`
    MissingFileKeys,
}

impl std::fmt::Display for MetainfoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetainfoError::NotADict => write!(f, "metainfo file must be a dict"),
            MetainfoError::MissingKey(key) => {
                write!(f, "metainfo is missing the following key: {}", key)
            }
            MetainfoError::WrongType(key) => {
                write!(f, "the following key's value has an incorrect type: {}", key)
            }
            MetainfoError::InvalidString(key) => {
                write!(f, "the following key's value is not valid utf-8: {}", key)
            }
            MetainfoError::InvalidInteger(key) => {
                write!(
                    f,
                    "the following key's value must be a non-negative integer: {}",
                    key
                )
            }
            MetainfoError::MalformedPieces => {
                write!(f, "pieces value is not a whole number of sha1 hashes")
            }
            MetainfoError::ConflictingFileKeys => {
                write!(f, "info dict contains both length and files keys")
            }
            MetainfoError::MissingFileKeys => {
                write!(f, "info dict contains neither length nor files keys")
            }
        }
    }
}

impl std::error::Error for MetainfoError {}

fn required_string(
    dict: &mut HashMap<Vec<u8>, BencodeValue>,
    key: &[u8],
    name: &'static str,
) -> Result<String, MetainfoError> {
    match dict.remove(key) {
        Some(BencodeValue::ByteString(bytes)) => {
            String::from_utf8(bytes).map_err(|_| MetainfoError::InvalidString(name))
        }
        Some(_) => Err(MetainfoError::WrongType(name)),
        None => Err(MetainfoError::MissingKey(name)),
    }
}

fn required_integer(
    dict: &mut HashMap<Vec<u8>, BencodeValue>,
    key: &[u8],
    name: &'static str,
) -> Result<i64, MetainfoError> {
    match dict.remove(key) {
        Some(BencodeValue::Integer(val)) => Ok(val),
        Some(_) => Err(MetainfoError::WrongType(name)),
        None => Err(MetainfoError::MissingKey(name)),
    }
}

/// Metainfo (`.torrent`) file
#[derive(Debug, PartialEq)]
pub struct Metainfo {
    /// Tracker announce URL
    pub announce: String,
    pub info: Info,
    /// SHA1 hash of the bencoded `info` dict, exactly as it appeared in the
    /// file
    pub info_hash: [u8; 20],
}

impl Metainfo {
    pub fn new(data: BencodeValue) -> Result<Metainfo, MetainfoError> {
        match data {
            BencodeValue::Dict(mut dict) => {
                let announce = required_string(&mut dict, ANNOUNCE_KEY, "announce")?;
                let info_value = dict
                    .remove(INFO_KEY)
                    .ok_or(MetainfoError::MissingKey("info"))?;
                // Hash the re-encoded value before typed extraction so
                // unregistered keys still contribute to the digest
                let info_hash = sha1_smol::Sha1::from(encode(&info_value)).digest().bytes();
                let info = Info::new(info_value)?;
                Ok(Metainfo {
                    announce,
                    info,
                    info_hash,
                })
            }
            _ => Err(MetainfoError::NotADict),
        }
    }
}

/// Info dict within metainfo file
#[derive(Debug, PartialEq)]
pub struct Info {
    /// Name of the file (or top level directory)
    pub name: String,
    /// Length of a piece of the file in bytes
    pub piece_length: u32,
    /// SHA1 hash of each piece
    pub pieces: Vec<[u8; 20]>,
    pub layout: FileLayout,
}

/// Payload shape described by the `info` dict
#[derive(Debug, PartialEq)]
pub enum FileLayout {
    Single { length: u64 },
    Multiple { files: Vec<FileEntry> },
}

/// Entry in the `files` list of a multi-file torrent
#[derive(Debug, PartialEq)]
pub struct FileEntry {
    pub length: u64,
    /// Path components, final one being the file name
    pub path: Vec<String>,
}

impl Info {
    pub fn new(data: BencodeValue) -> Result<Info, MetainfoError> {
        match data {
            BencodeValue::Dict(mut dict) => {
                let name = required_string(&mut dict, NAME_KEY, "name")?;
                let piece_length = required_integer(&mut dict, PIECE_LENGTH_KEY, "piece length")?;
                let piece_length = u32::try_from(piece_length)
                    .map_err(|_| MetainfoError::InvalidInteger("piece length"))?;
                let pieces = match dict.remove(PIECES_KEY) {
                    Some(BencodeValue::ByteString(bytes)) => piece_hashes(&bytes)?,
                    Some(_) => return Err(MetainfoError::WrongType("pieces")),
                    None => return Err(MetainfoError::MissingKey("pieces")),
                };
                let layout = file_layout(&mut dict)?;
                Ok(Info {
                    name,
                    piece_length,
                    pieces,
                    layout,
                })
            }
            _ => Err(MetainfoError::WrongType("info")),
        }
    }

    /// Total payload size in bytes across all files
    pub fn total_length(&self) -> u64 {
        match &self.layout {
            FileLayout::Single { length } => *length,
            FileLayout::Multiple { files } => files.iter().map(|file| file.length).sum(),
        }
    }
}

/// Split the `pieces` byte string into its constituent SHA1 hashes
fn piece_hashes(bytes: &[u8]) -> Result<Vec<[u8; 20]>, MetainfoError> {
    if bytes.len() % SHA1_HASH_SIZE != 0 {
        return Err(MetainfoError::MalformedPieces);
    }
    let hashes = bytes
        .chunks_exact(SHA1_HASH_SIZE)
        .map(|chunk| {
            let mut hash = [0x00; SHA1_HASH_SIZE];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();
    Ok(hashes)
}

fn file_layout(dict: &mut HashMap<Vec<u8>, BencodeValue>) -> Result<FileLayout, MetainfoError> {
    match (dict.remove(LENGTH_KEY), dict.remove(FILES_KEY)) {
        (Some(_), Some(_)) => Err(MetainfoError::ConflictingFileKeys),
        (None, None) => Err(MetainfoError::MissingFileKeys),
        (Some(BencodeValue::Integer(val)), None) => {
            let length =
                u64::try_from(val).map_err(|_| MetainfoError::InvalidInteger("length"))?;
            Ok(FileLayout::Single { length })
        }
        (Some(_), None) => Err(MetainfoError::WrongType("length")),
        (None, Some(BencodeValue::List(entries))) => {
            let files = entries
                .into_iter()
                .map(file_entry)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FileLayout::Multiple { files })
        }
        (None, Some(_)) => Err(MetainfoError::WrongType("files")),
    }
}

fn file_entry(data: BencodeValue) -> Result<FileEntry, MetainfoError> {
    match data {
        BencodeValue::Dict(mut dict) => {
            let length = required_integer(&mut dict, LENGTH_KEY, "length")?;
            let length =
                u64::try_from(length).map_err(|_| MetainfoError::InvalidInteger("length"))?;
            let path = match dict.remove(PATH_KEY) {
                Some(BencodeValue::List(components)) => components
                    .into_iter()
                    .map(|component| match component {
                        BencodeValue::ByteString(bytes) => String::from_utf8(bytes)
                            .map_err(|_| MetainfoError::InvalidString("path")),
                        _ => Err(MetainfoError::WrongType("path")),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Some(_) => return Err(MetainfoError::WrongType("path")),
                None => return Err(MetainfoError::MissingKey("path")),
            };
            Ok(FileEntry { length, path })
        }
        _ => Err(MetainfoError::WrongType("files")),
    }
}
