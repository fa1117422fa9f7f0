// engine/exchange-core/src/runtime.rs
//
// Threading shell around the core. Exactly one mutator thread owns the
// engine and the journal; ingress and egress talk to it through bounded
// SPSC rings. Backpressure is spin-then-yield on both sides, so the core
// never takes a lock and never blocks on a slow consumer for long.

use crate::{EngineConfig, EngineFault, ExchangeCore, RecoveryError, SpscQueue};
use gavel::{CommandMsg, SequencedCommand, SequencedEvent};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

enum CoreInput {
    Command(SequencedCommand),
    Shutdown,
}

/// Producer handle used by the transport boundary. Exactly one thread may
/// hold it: the ring is single-producer. Stamps each command with its
/// arrival sequence and wall-clock nanoseconds; both are journaled with
/// the command, which is what keeps replay deterministic.
pub struct IngressHandle {
    queue: Arc<SpscQueue<CoreInput>>,
    next_arrival: Arc<AtomicU64>,
}

impl IngressHandle {
    pub fn submit(&self, msg: CommandMsg) {
        let arrival_seq = self.next_arrival.fetch_add(1, Ordering::Relaxed);
        let ts_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.push(CoreInput::Command(SequencedCommand { arrival_seq, ts_ns, msg }));
    }

    pub fn shutdown(&self) {
        self.push(CoreInput::Shutdown);
    }

    fn push(&self, mut input: CoreInput) {
        loop {
            match self.queue.try_push(input) {
                Ok(()) => return,
                Err(back) => {
                    input = back;
                    std::thread::yield_now();
                }
            }
        }
    }
}

/// Consumer handle for the event fan-out side; single consumer, like the
/// ingress side.
pub struct EgressHandle {
    queue: Arc<SpscQueue<SequencedEvent>>,
}

impl EgressHandle {
    pub fn try_next(&self) -> Option<SequencedEvent> {
        self.queue.try_pop()
    }

    /// Blocking pop with a poll interval; returns None once the core has
    /// stopped and the queue drained.
    pub fn next_timeout(&self, timeout: Duration) -> Option<SequencedEvent> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.queue.try_pop() {
                return Some(event);
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
            std::thread::yield_now();
        }
    }
}

/// Join handle for the core thread; the result distinguishes a clean
/// shutdown from a fatal fault.
pub struct CoreHandle(JoinHandle<Result<(), EngineFault>>);

impl CoreHandle {
    pub fn join(self) -> Result<(), EngineFault> {
        match self.0.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

pub struct Runtime {
    pub ingress: IngressHandle,
    pub egress: EgressHandle,
    core: JoinHandle<Result<(), EngineFault>>,
}

impl Runtime {
    /// Boots the engine (replaying the journal when a path is given) and
    /// spawns the core thread.
    pub fn spawn(
        cfg: EngineConfig,
        journal_path: Option<PathBuf>,
        queue_capacity: usize,
    ) -> Result<Runtime, RecoveryError> {
        let core = match &journal_path {
            Some(path) => {
                let (core, replayed) = ExchangeCore::recover(cfg, path)?;
                if replayed > 0 {
                    info!(replayed, "resumed from journal");
                }
                core
            }
            None => ExchangeCore::new(cfg)?,
        };

        let inbound: Arc<SpscQueue<CoreInput>> = Arc::new(SpscQueue::with_capacity(queue_capacity));
        let outbound: Arc<SpscQueue<SequencedEvent>> =
            Arc::new(SpscQueue::with_capacity(queue_capacity));

        let thread = {
            let inbound = Arc::clone(&inbound);
            let outbound = Arc::clone(&outbound);
            std::thread::Builder::new()
                .name("exchange-core".to_string())
                .spawn(move || core_loop(core, &inbound, &outbound))
                .expect("spawn core thread")
        };

        Ok(Runtime {
            ingress: IngressHandle { queue: inbound, next_arrival: Arc::new(AtomicU64::new(1)) },
            egress: EgressHandle { queue: outbound },
            core: thread,
        })
    }

    /// Waits for the core thread. Call after `ingress.shutdown()`.
    pub fn join(self) -> Result<(), EngineFault> {
        CoreHandle(self.core).join()
    }

    /// Splits the runtime so ingress, egress, and the join handle can live
    /// on different threads.
    pub fn split(self) -> (IngressHandle, EgressHandle, CoreHandle) {
        (self.ingress, self.egress, CoreHandle(self.core))
    }
}

fn core_loop(
    mut core: ExchangeCore,
    inbound: &SpscQueue<CoreInput>,
    outbound: &SpscQueue<SequencedEvent>,
) -> Result<(), EngineFault> {
    loop {
        match inbound.try_pop() {
            Some(CoreInput::Command(cmd)) => {
                let processed = core.process(&cmd);
                for event in processed.events {
                    publish(outbound, event);
                }
                if let Some(fault) = processed.fault {
                    return Err(fault);
                }
            }
            Some(CoreInput::Shutdown) => {
                info!("core shutdown requested");
                return core.shutdown();
            }
            None => std::thread::yield_now(),
        }
    }
}

fn publish(outbound: &SpscQueue<SequencedEvent>, mut event: SequencedEvent) {
    loop {
        match outbound.try_push(event) {
            Ok(()) => return,
            Err(back) => {
                event = back;
                std::thread::yield_now();
            }
        }
    }
}
