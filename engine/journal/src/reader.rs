// Startup scan. Reads the whole file, validates framing, checksum, and
// sequence continuity, and tolerates exactly one torn frame at the tail.

use crate::frame::{decode_at, Decoded};
use crate::{JournalError, Record};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug)]
pub struct ScanOutcome {
    pub records: Vec<Record>,
    /// Sequence number to continue appending at.
    pub next_seq: u64,
    /// Bytes of valid frames; a torn tail beyond this is discarded.
    pub valid_len: usize,
}

/// Reads every valid record from `path`. A missing file is an empty
/// journal. A short frame at the end of the file is a crash artifact and
/// is dropped; anything else that fails to parse is fatal corruption.
pub fn read_records(path: &Path) -> Result<ScanOutcome, JournalError> {
    let buf = match std::fs::read(path) {
        Ok(buf) => buf,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ScanOutcome { records: Vec::new(), next_seq: 0, valid_len: 0 });
        }
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut next_seq = 0u64;
    while offset < buf.len() {
        match decode_at(&buf, offset)? {
            Decoded::Truncated => {
                warn!(
                    offset,
                    discarded = buf.len() - offset,
                    "discarding torn frame at journal tail"
                );
                break;
            }
            Decoded::Frame(frame, next_offset) => {
                if frame.seq != next_seq {
                    return Err(JournalError::SequenceGap {
                        offset,
                        expected: next_seq,
                        found: frame.seq,
                    });
                }
                let record: Record = serde_json::from_slice(&frame.payload)?;
                records.push(record);
                next_seq += 1;
                offset = next_offset;
            }
        }
    }
    info!(entries = records.len(), bytes = offset, "journal scan complete");
    Ok(ScanOutcome { records, next_seq, valid_len: offset })
}
