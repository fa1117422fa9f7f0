// engine/journal/src/writer.rs

use crate::frame::Frame;
use crate::{JournalError, Record};
use gavel::{SequencedCommand, SequencedEvent};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Sequential frame writer. One instance per engine; only the core thread
/// writes. `flush` runs once per processed command so the file is truthful
/// up to the last completed command.
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_seq: u64,
}

impl JournalWriter {
    /// Opens `path` for appending after a scan established where valid
    /// frames end. The file is truncated to `valid_len` so a torn tail
    /// from a crash never pollutes new frames.
    pub fn open(path: &Path, next_seq: u64, valid_len: u64) -> Result<Self, JournalError> {
        let mut file = OpenOptions::new().create(true).read(true).write(true).open(path)?;
        file.set_len(valid_len)?;
        file.seek(SeekFrom::Start(valid_len))?;
        Ok(Self { path: path.to_path_buf(), writer: BufWriter::new(file), next_seq })
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn append_inbound(&mut self, cmd: &SequencedCommand) -> Result<u64, JournalError> {
        self.append(&Record::Inbound(cmd.clone()))
    }

    pub fn append_outbound(&mut self, event: &SequencedEvent) -> Result<u64, JournalError> {
        self.append(&Record::Outbound(event.clone()))
    }

    fn append(&mut self, record: &Record) -> Result<u64, JournalError> {
        let seq = self.next_seq;
        let frame = Frame { seq, payload: serde_json::to_vec(record)? };
        self.writer.write_all(&frame.encode())?;
        self.next_seq += 1;
        Ok(seq)
    }

    pub fn flush(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Clean-shutdown rotation: flush, rename the live file aside with its
    /// last sequence number, and start a fresh one. The next session boots
    /// from an empty journal.
    pub fn rotate(mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        if self.next_seq == 0 {
            return Ok(());
        }
        let mut closed = self.path.clone().into_os_string();
        closed.push(format!(".{:016}.closed", self.next_seq - 1));
        std::fs::rename(&self.path, PathBuf::from(&closed))?;
        info!(path = %self.path.display(), entries = self.next_seq, "journal rotated");
        Ok(())
    }
}
