//! Recovery journal.
//!
//! An append-only file of framed entries:
//! `[seq: u64 LE][len: u32 LE][payload][crc32: u32 LE]`. The payload is a
//! tagged JSON record: either an admitted inbound command or an emitted
//! outbound event. Inbound entries land on disk before the engine mutates;
//! replaying them through the deterministic engine reproduces the
//! pre-shutdown state exactly, so outbound entries are audit material.

mod error;
mod frame;
mod reader;
mod writer;

pub use error::JournalError;
pub use frame::{Frame, FRAME_OVERHEAD};
pub use reader::{read_records, ScanOutcome};
pub use writer::JournalWriter;

use gavel::{SequencedCommand, SequencedEvent};
use serde::{Deserialize, Serialize};

/// One journal payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dir", rename_all = "snake_case")]
pub enum Record {
    Inbound(SequencedCommand),
    Outbound(SequencedEvent),
}
