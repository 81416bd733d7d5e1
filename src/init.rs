use tracing::debug;

use crate::{
    metainfo::Metainfo,
    torrent::Torrent,
    tracker::{Request, Response, TrackerError},
    PEER_ID,
};

/// Port reported to the tracker as the one we accept connections on
const PORT: u16 = 6881;

/// Announce to the tracker and join the reported peers with the metainfo
pub async fn init(metainfo: Metainfo) -> Result<Torrent, TrackerError> {
    let request = Request::new(
        &metainfo.announce,
        PEER_ID,
        PORT,
        &metainfo.info_hash,
        metainfo.info.total_length(),
    )?;
    let data = request.send().await?;
    match Response::deserialise(&data)? {
        Response::Failure(msg) => Err(TrackerError::Failure(msg)),
        Response::Success { peers, .. } => {
            debug!(peer_count = peers.len(), "tracker announce succeeded");
            Ok(Torrent::new(metainfo, peers))
        }
    }
}
