// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle controller.
//!
//! Owns construction and teardown ordering:
//!
//! 1. configuration store (file or baked-in defaults)
//! 2. diverter (kernel rules steering traffic into the queue)
//! 3. shaper (per-class latency/bandwidth queues, seeded from a snapshot)
//! 4. queue driver and engine
//! 5. burst supervisors
//! 6. the blocking receive loop
//!
//! and the strict reverse on the way down: join supervisors, drop the
//! engine, then the shaper, then the diverter. The signal handler does only
//! two things, both async-signal-safe in spirit: store the shared stop flag
//! and wake every supervisor sleep. The receive loop notices the flag at its
//! next iteration boundary.

use crate::config::{ConfigStore, QUEUE_NUM};
use crate::divert::{DivertError, Diverter};
use crate::impair::{BurstFlags, BurstSupervisor, WaitCell};
use crate::queue::{EngineMetrics, QueueDriver, QueueEngine, QueueError};
use crate::shaper::{Shaper, ShaperError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Daemon options, normally filled in from the command line.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Path of the JSON configuration document; `None` runs on defaults.
    pub config_path: Option<PathBuf>,
    /// Interface whose forwarded traffic is intercepted.
    pub interface: String,
    /// Kernel queue number.
    pub queue_num: u16,
    /// Install the diverter and shaper. Disabled for dry runs and tests,
    /// where no kernel state may be touched.
    pub manage_network: bool,
    /// Register the process signal handler. Disabled in tests, which raise
    /// the stop flag themselves.
    pub handle_signals: bool,
    /// Seconds between dispatch-counter log lines; 0 disables the reporter.
    pub stats_interval_secs: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            interface: "wg0".to_string(),
            queue_num: QUEUE_NUM,
            manage_network: true,
            handle_signals: true,
            stats_interval_secs: 10,
        }
    }
}

/// Startup failures. Anything failing here unwinds whatever was already
/// built, in reverse order, before returning.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Divert(#[from] DivertError),

    #[error(transparent)]
    Shaper(#[from] ShaperError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to register the signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Bring the whole engine up, run it until shutdown, and unwind.
///
/// The driver is built through `make_driver` so it is acquired at its slot
/// in the startup order, after the kernel-side rules exist. The factory
/// receives the shared stop flag; drivers that synthesize their own shutdown
/// (the in-memory one) raise it instead of waiting for a signal.
pub fn run<D, F>(opts: &EngineOptions, make_driver: F) -> Result<(), RuntimeError>
where
    D: QueueDriver,
    F: FnOnce(&EngineOptions, &Arc<AtomicBool>) -> Result<D, QueueError>,
{
    let store = Arc::new(ConfigStore::open(opts.config_path.as_deref()));
    let stop = Arc::new(AtomicBool::new(false));

    // Kernel collaborators first, so the queue never starves once opened.
    let diverter = if opts.manage_network {
        Some(Diverter::install(&opts.interface, opts.queue_num)?)
    } else {
        None
    };
    let shaper = if opts.manage_network {
        match Shaper::install(&opts.interface, &store.snapshot()) {
            Ok(shaper) => Some(shaper),
            Err(err) => {
                drop(diverter);
                return Err(err.into());
            }
        }
    } else {
        None
    };

    let result = run_engine(opts, make_driver, &store, &stop);

    // Reverse order: the engine (and its driver) are already down.
    drop(shaper);
    drop(diverter);
    result
}

/// The part of startup that happens after the kernel collaborators: driver,
/// supervisors, signal wiring, receive loop, supervisor join.
fn run_engine<D, F>(
    opts: &EngineOptions,
    make_driver: F,
    store: &Arc<ConfigStore>,
    stop: &Arc<AtomicBool>,
) -> Result<(), RuntimeError>
where
    D: QueueDriver,
    F: FnOnce(&EngineOptions, &Arc<AtomicBool>) -> Result<D, QueueError>,
{
    let driver = make_driver(opts, stop)?;
    let bursts = BurstFlags::shared();
    let mut engine = QueueEngine::new(
        driver,
        Arc::clone(store),
        Arc::clone(&bursts),
        Arc::clone(stop),
    );

    let supervisor = BurstSupervisor::spawn(Arc::clone(store), bursts, Arc::clone(stop));
    let reporter = spawn_stats_reporter(opts.stats_interval_secs, engine.metrics(), stop);

    if opts.handle_signals {
        let stop = Arc::clone(stop);
        let mut wakes = supervisor.wake_handles();
        if let Some(reporter) = &reporter {
            wakes.push(Arc::clone(&reporter.wake));
        }
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
            for wake in &wakes {
                wake.notify();
            }
        })?;
        log::info!("[runtime] signal handler armed; Ctrl+C stops the engine");
    }

    let loop_result = engine.run();

    // The loop can exit on a fatal receive error without the flag raised;
    // the supervisors still have to come down.
    supervisor.request_stop();
    supervisor.join();
    if let Some(reporter) = reporter {
        reporter.stop_and_join();
    }

    let stats = engine.metrics().snapshot();
    log::info!(
        "[runtime] engine stopped: {} packets, {} dropped, {} corrupted, {} overflows",
        stats.received,
        stats.dropped,
        stats.corrupted,
        stats.overflows
    );

    loop_result.map_err(RuntimeError::from)
}

/// Periodic dispatch-counter logging.
struct StatsReporter {
    handle: thread::JoinHandle<()>,
    wake: Arc<WaitCell>,
}

impl StatsReporter {
    fn stop_and_join(self) {
        // The shared stop flag is already raised by the caller.
        self.wake.notify();
        if self.handle.join().is_err() {
            log::error!("[stats] reporter thread panicked");
        }
    }
}

fn spawn_stats_reporter(
    interval_secs: u64,
    metrics: Arc<EngineMetrics>,
    stop: &Arc<AtomicBool>,
) -> Option<StatsReporter> {
    if interval_secs == 0 {
        return None;
    }
    let wake = Arc::new(WaitCell::new());
    let handle = {
        let wake = Arc::clone(&wake);
        let stop = Arc::clone(stop);
        thread::Builder::new()
            .name("stats".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if wake.wait_timeout(Duration::from_secs(interval_secs)) {
                        // Woken: shutdown, not a tick.
                        continue;
                    }
                    let snap = metrics.snapshot();
                    log::info!(
                        "[stats] {} received, {} accepted, {} dropped, {} corrupted, {} overflows",
                        snap.received,
                        snap.accepted,
                        snap.dropped,
                        snap.corrupted,
                        snap.overflows
                    );
                }
            })
            .expect("spawn stats reporter thread")
    };
    Some(StatsReporter { handle, wake })
}
