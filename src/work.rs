use crate::torrent::Torrent;

/// Piece-download work
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Work {
    /// Index of piece
    pub index: u32,
    /// Length of piece
    pub length: u32,
    /// SHA1 hash of piece
    pub hash: [u8; 20],
}

/// One work item per piece of the torrent
pub fn from_torrent(torrent: &Torrent) -> Vec<Work> {
    torrent
        .metainfo
        .info
        .pieces
        .iter()
        .enumerate()
        .map(|(index, hash)| Work {
            index: index as u32,
            length: torrent.piece_length(index as u32),
            hash: *hash,
        })
        .collect()
}
