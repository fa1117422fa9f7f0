use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("journal corrupt at byte {offset}: {detail}")]
    Corrupt { offset: usize, detail: String },

    #[error("journal sequence broken at byte {offset}: expected {expected}, found {found}")]
    SequenceGap { offset: usize, expected: u64, found: u64 },
}
