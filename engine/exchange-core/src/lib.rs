//! Exchange core: the single logical state machine behind the venue.
//!
//! A command enters through the risk gate, runs to completion through
//! matching and accounting, may trigger the maintenance scan and forced
//! closes, and leaves as a gapless sequence of journaled events. One
//! thread mutates; ingress and egress are bounded SPSC rings.

mod config;
mod engine;
mod error;
mod liquidation;
mod queue;
mod runtime;
mod sequencer;

pub use config::{ConfigError, EngineConfig};
pub use engine::{ExchangeCore, Processed, RecoveryError, StateDigest};
pub use error::EngineFault;
pub use queue::SpscQueue;
pub use runtime::{CoreHandle, EgressHandle, IngressHandle, Runtime};
pub use sequencer::EventSequencer;
