use crate::{HANDSHAKE_BYTES_LEN, PSTR};

const PROTOCOL_ID_LEN: u8 = 0x13;
const INFO_HASH_OFFSET: usize = 28;
const PEER_ID_OFFSET: usize = 48;

/// BitTorrent handshake
#[derive(Debug, PartialEq)]
pub struct Handshake {
    /// SHA1 hash of bencoded `info` dict of file
    info_hash: [u8; 20],
    /// Identifier of peer
    peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Handshake {
        Handshake { info_hash, peer_id }
    }

    /// SHA1 info hash carried in the handshake
    pub fn info_hash(&self) -> &[u8; 20] {
        &self.info_hash
    }

    /// Serialise handshake data
    pub fn serialise(&self) -> Vec<u8> {
        let mut output = vec![PROTOCOL_ID_LEN];
        output.extend_from_slice(PSTR.as_bytes());
        output.extend_from_slice(&[0x00; 8]);
        output.extend_from_slice(&self.info_hash);
        output.extend_from_slice(&self.peer_id);
        output
    }

    /// Extract the fields of a peer's handshake from the fixed-size buffer
    pub fn deserialise(data: &[u8; HANDSHAKE_BYTES_LEN]) -> Handshake {
        let mut info_hash = [0x00; 20];
        info_hash.copy_from_slice(&data[INFO_HASH_OFFSET..PEER_ID_OFFSET]);
        let mut peer_id = [0x00; 20];
        peer_id.copy_from_slice(&data[PEER_ID_OFFSET..]);
        Handshake { info_hash, peer_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PEER_ID;

    #[test]
    fn serialised_handshake_is_correct() {
        let mut info_hash = [0x00; 20];
        for (idx, byte) in info_hash.iter_mut().enumerate() {
            *byte = idx as u8;
        }
        let mut expected = vec![PROTOCOL_ID_LEN];
        expected.extend_from_slice(PSTR.as_bytes());
        expected.extend_from_slice(&[0x00; 8]);
        expected.extend_from_slice(&info_hash);
        expected.extend_from_slice(PEER_ID);
        let handshake = Handshake::new(info_hash, *PEER_ID);
        assert_eq!(handshake.serialise(), expected);
        assert_eq!(handshake.serialise().len(), HANDSHAKE_BYTES_LEN);
    }

    #[test]
    fn deserialised_handshake_holds_peer_fields() {
        let info_hash = [0x0a; 20];
        let peer_id = [0x0b; 20];
        let mut data = vec![PROTOCOL_ID_LEN];
        data.extend_from_slice(PSTR.as_bytes());
        data.extend_from_slice(&[0x00; 8]);
        data.extend_from_slice(&info_hash);
        data.extend_from_slice(&peer_id);
        let buf: [u8; HANDSHAKE_BYTES_LEN] = data.try_into().unwrap();
        let handshake = Handshake::deserialise(&buf);
        assert_eq!(handshake, Handshake::new(info_hash, peer_id));
        assert_eq!(handshake.info_hash(), &info_hash);
    }
}
