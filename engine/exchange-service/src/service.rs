//! The service loop. Commands arrive as JSON lines on stdin (one command
//! per line, the order gateway's framing); sequenced events leave as JSON
//! lines on stdout. Stdin EOF is a clean shutdown: the engine drains,
//! the journal rotates, and the process exits.

use crate::config::ServiceConfig;
use anyhow::{Context, Result};
use exchange_core::{EgressHandle, Runtime};
use gavel::CommandMsg;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub fn run(config: ServiceConfig) -> Result<()> {
    info!(journal = %config.journal_path.display(), "starting exchange service");
    let runtime = Runtime::spawn(
        config.engine.clone(),
        Some(config.journal_path.clone()),
        config.queue_capacity,
    )
    .context("booting the engine")?;
    let (ingress, egress, core) = runtime.split();

    let stop = Arc::new(AtomicBool::new(false));
    let publisher = {
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("event-publisher".to_string())
            .spawn(move || publish_events(egress, &stop))
            .context("spawning event publisher")?
    };

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading command input")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CommandMsg>(&line) {
            Ok(msg) => ingress.submit(msg),
            // Malformed input never reaches the core. The gateway owns the
            // per-client rejection reply; standalone, we log and move on.
            Err(error) => warn!(%error, "dropping malformed command line"),
        }
    }

    info!("command input closed; shutting down");
    ingress.shutdown();
    let core_result = core.join();
    stop.store(true, Ordering::Release);
    if publisher.join().is_err() {
        warn!("event publisher panicked during shutdown");
    }
    core_result.context("engine fault")?;
    info!("clean shutdown complete");
    Ok(())
}

fn publish_events(egress: EgressHandle, stop: &AtomicBool) {
    let stdout = std::io::stdout();
    loop {
        match egress.try_next() {
            Some(event) => {
                let line = match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(error) => {
                        warn!(%error, seq = event.seq, "failed to serialize event");
                        continue;
                    }
                };
                let mut out = stdout.lock();
                if writeln!(out, "{line}").is_err() {
                    // Subscriber side of the pipe went away; keep draining
                    // so the core never blocks on us.
                    continue;
                }
            }
            None => {
                if stop.load(Ordering::Acquire) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}
