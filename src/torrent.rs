use crate::metainfo::Metainfo;
use crate::tracker::Peer;

/// A metainfo file joined with the peers announced for it
pub struct Torrent {
    /// Metainfo file info
    pub metainfo: Metainfo,
    /// Peers associated with file
    pub peers: Vec<Peer>,
}

impl Torrent {
    pub fn new(metainfo: Metainfo, peers: Vec<Peer>) -> Torrent {
        Torrent { metainfo, peers }
    }

    /// SHA1 hash of `info` dict
    pub fn info_hash(&self) -> [u8; 20] {
        self.metainfo.info_hash
    }

    /// Number of pieces the payload is split into
    pub fn no_of_pieces(&self) -> u32 {
        self.metainfo.info.pieces.len() as u32
    }

    /// Length in bytes of the piece at the given index.
    ///
    /// Every piece has the nominal length from the metainfo except the last,
    /// which holds whatever remains. A payload dividing evenly leaves the
    /// last piece at the nominal length too.
    pub fn piece_length(&self, index: u32) -> u32 {
        let nominal = self.metainfo.info.piece_length;
        if index + 1 < self.no_of_pieces() {
            return nominal;
        }
        let remainder = (self.metainfo.info.total_length() % u64::from(nominal)) as u32;
        if remainder == 0 {
            nominal
        } else {
            remainder
        }
    }
}
