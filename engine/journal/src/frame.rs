// Frame layout: [seq: u64 LE][len: u32 LE][payload][crc32: u32 LE].
// The checksum covers the payload bytes only.

use crate::JournalError;

/// Fixed bytes around every payload: 8 (seq) + 4 (len) + 4 (crc).
pub const FRAME_OVERHEAD: usize = 16;

/// Frames larger than this are treated as corruption, not allocation hints.
const MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&crc32fast::hash(&self.payload).to_le_bytes());
        buf
    }
}

/// What decoding at an offset produced.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    Frame(Frame, usize),
    /// Not enough bytes for a whole frame: a torn tail write.
    Truncated,
}

/// Decodes one frame starting at `buf[offset..]`. A short read is a torn
/// tail; a checksum or length violation is corruption.
pub fn decode_at(buf: &[u8], offset: usize) -> Result<Decoded, JournalError> {
    let rest = &buf[offset..];
    if rest.len() < 12 {
        return Ok(Decoded::Truncated);
    }
    let seq = u64::from_le_bytes(rest[0..8].try_into().expect("sized slice"));
    let len = u32::from_le_bytes(rest[8..12].try_into().expect("sized slice"));
    if len > MAX_PAYLOAD {
        return Err(JournalError::Corrupt {
            offset,
            detail: format!("frame length {len} exceeds maximum"),
        });
    }
    let end = 12 + len as usize + 4;
    if rest.len() < end {
        return Ok(Decoded::Truncated);
    }
    let payload = &rest[12..12 + len as usize];
    let stored_crc = u32::from_le_bytes(rest[12 + len as usize..end].try_into().expect("sized"));
    let actual_crc = crc32fast::hash(payload);
    if stored_crc != actual_crc {
        return Err(JournalError::Corrupt {
            offset,
            detail: format!("crc mismatch: stored {stored_crc:#010x}, computed {actual_crc:#010x}"),
        });
    }
    Ok(Decoded::Frame(Frame { seq, payload: payload.to_vec() }, offset + end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let frame = Frame { seq: 7, payload: b"hello".to_vec() };
        let bytes = frame.encode();
        assert_eq!(bytes.len(), FRAME_OVERHEAD + 5);
        match decode_at(&bytes, 0).unwrap() {
            Decoded::Frame(decoded, next) => {
                assert_eq!(decoded, frame);
                assert_eq!(next, bytes.len());
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn torn_tail_is_truncated_not_corrupt() {
        let bytes = Frame { seq: 0, payload: b"payload".to_vec() }.encode();
        for cut in 0..bytes.len() {
            match decode_at(&bytes[..cut], 0) {
                Ok(Decoded::Truncated) => {}
                other => panic!("cut at {cut}: expected truncated, got {other:?}"),
            }
        }
    }

    #[test]
    fn flipped_payload_bit_is_corrupt() {
        let mut bytes = Frame { seq: 3, payload: b"payload".to_vec() }.encode();
        bytes[13] ^= 0x01;
        assert!(matches!(decode_at(&bytes, 0), Err(JournalError::Corrupt { .. })));
    }

    #[test]
    fn absurd_length_is_corrupt() {
        let mut bytes = Frame { seq: 1, payload: vec![0u8; 4] }.encode();
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode_at(&bytes, 0), Err(JournalError::Corrupt { .. })));
    }
}
