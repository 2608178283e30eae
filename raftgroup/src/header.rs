//! Fixed-width framing for (proposalId, msgId), independent of the Raft
//! log payload encoding (§4.2). Used purely for RPC message correlation.

pub const HEADER_LEN: usize = 6;

#[derive(thiserror::Error, Debug, Clone, Copy)]
#[error("header frame must be exactly {HEADER_LEN} bytes, got {0}")]
pub struct HeaderDecodeError(usize);

/// A `u32 proposalId || u16 msgId` frame, little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub proposal_id: u32,
    pub msg_id: u16,
}

impl Header {
    pub fn new(proposal_id: u32, msg_id: u16) -> Self {
        Self { proposal_id, msg_id }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.proposal_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.msg_id.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderDecodeError> {
        if bytes.len() != HEADER_LEN {
            return Err(HeaderDecodeError(bytes.len()));
        }
        let proposal_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let msg_id = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        Ok(Self { proposal_id, msg_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let h = Header::new(0xdead_beef, 0x1234);
        let bytes = h.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(Header::decode(&bytes).unwrap(), h);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Header::decode(&[0u8; 5]).is_err());
        assert!(Header::decode(&[0u8; 7]).is_err());
    }
}
