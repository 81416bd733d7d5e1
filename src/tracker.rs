use std::net::Ipv4Addr;

use bytes::Bytes;
use reqwest::Url;

use crate::decode::decode;
use crate::BencodeValue;

const FAILURE_KEY: &[u8] = b"failure";
const INTERVAL_KEY: &[u8] = b"interval";
const PEERS_KEY: &[u8] = b"peers";
const COMPACT_PEER_LEN: usize = 6;

/// Failure while announcing to the tracker
#[derive(Debug)]
pub enum TrackerError {
    InvalidUrl(url::ParseError),
    Http(reqwest::Error),
    /// Response body was not the bencoded dict the protocol calls for
    MalformedResponse,
    /// Tracker answered with an explanation instead of peers
    Failure(String),
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::InvalidUrl(err) => write!(f, "invalid tracker url: {}", err),
            TrackerError::Http(err) => write!(f, "tracker request failed: {}", err),
            TrackerError::MalformedResponse => write!(f, "malformed tracker response"),
            TrackerError::Failure(msg) => write!(f, "tracker rejected announce: {}", msg),
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<url::ParseError> for TrackerError {
    fn from(err: url::ParseError) -> TrackerError {
        TrackerError::InvalidUrl(err)
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> TrackerError {
        TrackerError::Http(err)
    }
}

/// Render raw bytes as percent-encoded pairs for a URL query value
fn percent_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("%{:02x}", byte)).collect()
}

/// GET request to tracker
pub struct Request {
    /// URL to make GET request to tracker
    pub url: Url,
}

impl Request {
    /// Create request.
    ///
    /// The info hash and peer id are raw bytes, so both are percent-encoded
    /// by hand before the rest of the query is appended.
    pub fn new(
        tracker_url: &str,
        peer_id: &[u8; 20],
        port: u16,
        info_hash: &[u8; 20],
        file_length: u64,
    ) -> Result<Request, TrackerError> {
        let mut string_url = tracker_url.to_string();
        string_url.push_str("?info_hash=");
        string_url.push_str(&percent_encode(info_hash));
        string_url.push_str("&peer_id=");
        string_url.push_str(&percent_encode(peer_id));
        let mut url = Url::parse(&string_url)?;
        url.query_pairs_mut()
            .append_pair("port", &port.to_string())
            .append_pair("uploaded", &0.to_string())
            .append_pair("downloaded", &0.to_string())
            .append_pair("compact", &1.to_string())
            .append_pair("left", &file_length.to_string());
        Ok(Request { url })
    }

    /// Send request and return response body
    pub async fn send(self) -> Result<Bytes, TrackerError> {
        let response = reqwest::get(self.url).await?;
        Ok(response.bytes().await?)
    }
}

/// Response from tracker
#[derive(Debug, PartialEq)]
pub enum Response {
    /// Failed query
    Failure(String),
    /// Successful query
    Success {
        /// Interval (in seconds) at which to reconnect to tracker to refresh peer list
        interval: u64,
        /// Peers of file reported by tracker
        peers: Vec<Peer>,
    },
}

impl Response {
    /// Deserialise response message body
    pub fn deserialise(data: &[u8]) -> Result<Response, TrackerError> {
        let (value, _) = decode(data).map_err(|_| TrackerError::MalformedResponse)?;
        match value {
            BencodeValue::Dict(mut dict) => {
                if let Some(BencodeValue::ByteString(msg)) = dict.remove(FAILURE_KEY) {
                    let msg = String::from_utf8_lossy(&msg).into_owned();
                    return Ok(Response::Failure(msg));
                }
                let interval = match dict.remove(INTERVAL_KEY) {
                    Some(BencodeValue::Integer(val)) => {
                        u64::try_from(val).map_err(|_| TrackerError::MalformedResponse)?
                    }
                    _ => return Err(TrackerError::MalformedResponse),
                };
                let peers = match dict.remove(PEERS_KEY) {
                    Some(BencodeValue::ByteString(bytes)) => parse_peers(&bytes)?,
                    _ => return Err(TrackerError::MalformedResponse),
                };
                Ok(Response::Success { interval, peers })
            }
            _ => Err(TrackerError::MalformedResponse),
        }
    }
}

/// Parse peers encoded in "compact" form, six bytes per peer
fn parse_peers(data: &[u8]) -> Result<Vec<Peer>, TrackerError> {
    if data.len() % COMPACT_PEER_LEN != 0 {
        return Err(TrackerError::MalformedResponse);
    }
    Ok(data.chunks_exact(COMPACT_PEER_LEN).map(Peer::new).collect())
}

/// Peer of file
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Peer {
    /// IP address of peer
    pub ip: Ipv4Addr,
    /// Port of peer
    pub port: u16,
}

impl Peer {
    fn new(data: &[u8]) -> Peer {
        let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
        let port = u16::from_be_bytes([data[4], data[5]]);
        Peer { ip, port }
    }
}
