// Event numbering. Strictly increasing, no gaps, no resets: the stream's
// sequence is the proof that no subscriber missed an event.

use gavel::{EventBody, SequencedEvent};

#[derive(Debug)]
pub struct EventSequencer {
    next_seq: u64,
}

impl EventSequencer {
    pub fn new() -> Self {
        Self { next_seq: 1 }
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn stamp(&mut self, timestamp_ns: u64, body: EventBody) -> SequencedEvent {
        let seq = self.next_seq;
        self.next_seq += 1;
        SequencedEvent { seq, timestamp_ns, body }
    }
}

impl Default for EventSequencer {
    fn default() -> Self {
        Self::new()
    }
}
