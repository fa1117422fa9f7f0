use thiserror::Error;

/// Non-recoverable engine faults. Any of these halts the engine: the kill
/// switch is set, a final engine_fault event is journaled, and the process
/// exits non-zero. There is no attempt to continue.
#[derive(Debug, Error)]
pub enum EngineFault {
    #[error(transparent)]
    CrossedBook(#[from] gavel::MatchError),

    #[error(transparent)]
    Accounting(#[from] position_engine::AccountingFault),

    #[error(transparent)]
    Journal(#[from] journal::JournalError),
}

impl EngineFault {
    /// Short invariant name carried in the engine_fault event.
    pub fn invariant(&self) -> &'static str {
        match self {
            EngineFault::CrossedBook(_) => "uncrossed_book",
            EngineFault::Accounting(_) => "position_accounting",
            EngineFault::Journal(_) => "journal_integrity",
        }
    }
}
