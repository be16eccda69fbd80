// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Burst-loss state machines.
//!
//! One worker thread per impairable link oscillates between clear and
//! in-burst according to the link's frequency and duration distributions,
//! publishing the current state through a lock-free flag the dispatch thread
//! reads per packet. A stale read for one iteration is acceptable: burst
//! boundaries are approximations, so the flags use relaxed ordering and no
//! lock is ever held around packet processing.
//!
//! # Shutdown
//!
//! Workers sleep on a [`WaitCell`], never a bare `thread::sleep`: the
//! lifecycle controller (or the signal handler) stores the stop flag and
//! notifies every cell, so a worker parked in a multi-minute inter-burst wait
//! exits within a scheduling quantum instead of the remainder of its draw.

use crate::config::{ConfigStore, BURST_FREQ_EPSILON};
use crate::impair::sampling;
use crate::link::LinkKind;
use parking_lot::{Condvar, Mutex};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Milliseconds in an hour; divides the sampled bursts-per-hour rate into an
/// expected inter-burst interval.
const MS_PER_HOUR: f64 = 3_600_000.0;

// =======================================================================
// Interruptible sleep
// =======================================================================

/// A timed wait that a peer can cut short.
///
/// Condvar plus a sticky signal bit: a `notify` that races ahead of the
/// `wait_timeout` is not lost, and a worker mid-wait wakes promptly.
#[derive(Debug, Default)]
pub struct WaitCell {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl WaitCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiter, now or at its next wait.
    pub fn notify(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_all();
    }

    /// Block for up to `timeout`, or until notified.
    ///
    /// Returns `true` when the wait ended by notification, consuming the
    /// signal; `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            let _ = self.condvar.wait_for(&mut signaled, timeout);
        }
        std::mem::take(&mut *signaled)
    }
}

// =======================================================================
// Burst flags
// =======================================================================

/// One lock-free in-burst flag per impairable link.
///
/// Single writer (the owning supervisor worker), many readers (the dispatch
/// thread). Relaxed ordering: atomicity is required, cross-flag ordering is
/// not.
#[derive(Debug, Default)]
pub struct BurstFlags {
    flags: [AtomicBool; LinkKind::IMPAIRABLE.len()],
}

impl BurstFlags {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether `kind` is currently inside a loss burst. Always `false` for
    /// links that are never impaired.
    #[inline]
    #[must_use]
    pub fn is_in_burst(&self, kind: LinkKind) -> bool {
        match kind.impairable_index() {
            Some(idx) => self.flags[idx].load(Ordering::Relaxed),
            None => false,
        }
    }

    /// Publish the burst state of `kind`. No-op for links without a flag.
    ///
    /// Each flag has a single writer: the supervisor worker that owns the
    /// link (or a test standing in for it).
    #[inline]
    pub fn set_in_burst(&self, kind: LinkKind, in_burst: bool) {
        if let Some(idx) = kind.impairable_index() {
            self.flags[idx].store(in_burst, Ordering::Relaxed);
        }
    }

    #[inline]
    fn set(&self, idx: usize, in_burst: bool) {
        self.flags[idx].store(in_burst, Ordering::Relaxed);
    }
}

// =======================================================================
// Supervisor
// =======================================================================

/// Owner of the per-link burst workers.
///
/// Spawned after the queue engine exists and joined before it is torn down;
/// the same stop flag that ends the receive loop ends the workers.
#[derive(Debug)]
pub struct BurstSupervisor {
    workers: Vec<JoinHandle<()>>,
    wakes: Vec<Arc<WaitCell>>,
    stop: Arc<AtomicBool>,
}

impl BurstSupervisor {
    /// Start one worker per impairable link.
    #[must_use]
    pub fn spawn(
        store: Arc<ConfigStore>,
        flags: Arc<BurstFlags>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let mut workers = Vec::with_capacity(LinkKind::IMPAIRABLE.len());
        let mut wakes = Vec::with_capacity(LinkKind::IMPAIRABLE.len());

        for kind in LinkKind::IMPAIRABLE {
            let wake = Arc::new(WaitCell::new());
            wakes.push(Arc::clone(&wake));

            let store = Arc::clone(&store);
            let flags = Arc::clone(&flags);
            let stop = Arc::clone(&stop);
            let handle = thread::Builder::new()
                .name(format!("burst-{kind}"))
                .spawn(move || burst_worker(kind, &store, &flags, &stop, &wake))
                .expect("spawn burst worker thread");
            workers.push(handle);
        }

        Self { workers, wakes, stop }
    }

    /// Wake handles for the signal handler: a shutdown is an atomic store on
    /// the stop flag followed by a notify on each of these.
    #[must_use]
    pub fn wake_handles(&self) -> Vec<Arc<WaitCell>> {
        self.wakes.clone()
    }

    /// Request shutdown and wake every sleeping worker.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        for wake in &self.wakes {
            wake.notify();
        }
    }

    /// Wait for every worker to exit. Workers only exit once the stop flag
    /// is raised, so call [`BurstSupervisor::request_stop`] (or raise the
    /// shared flag and notify) first.
    pub fn join(self) {
        for worker in self.workers {
            if let Err(panic) = worker.join() {
                log::error!("[burst] worker thread panicked: {panic:?}");
            }
        }
    }
}

/// The per-link state machine: Clear -> (interval elapses) -> InBurst ->
/// (duration elapses) -> Clear.
///
/// Parameters are re-read from the store every cycle, so a configuration
/// reload takes effect at the next draw; the in-flight sleep is unaffected.
fn burst_worker(
    kind: LinkKind,
    store: &ConfigStore,
    flags: &BurstFlags,
    stop: &AtomicBool,
    wake: &WaitCell,
) {
    let idx = kind
        .impairable_index()
        .expect("burst workers are only spawned for impairable links");
    let mut rng = SmallRng::from_entropy();

    flags.set(idx, false);
    log::debug!("[burst] {kind} worker up");

    while !stop.load(Ordering::Relaxed) {
        let params = store.params(kind);

        let freq_per_hour = sampling::normal_clamped(
            &mut rng,
            params.base_packet_loss_burst_freq_per_hour,
            params.packet_loss_burst_freq_stddev,
        )
        .max(BURST_FREQ_EPSILON);
        let interval_ms = MS_PER_HOUR / freq_per_hour;

        wake.wait_timeout(Duration::from_millis(interval_ms as u64));
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let duration_ms = sampling::normal_clamped(
            &mut rng,
            params.base_packet_loss_burst_duration_ms,
            params.base_packet_loss_burst_duration_stddev,
        );

        flags.set(idx, true);
        log::debug!("[burst] {kind} entering burst for {duration_ms:.0} ms");
        wake.wait_timeout(Duration::from_millis(duration_ms as u64));
        flags.set(idx, false);
        log::debug!("[burst] {kind} burst over");
    }

    flags.set(idx, false);
    log::debug!("[burst] {kind} worker down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use std::time::Instant;

    #[test]
    fn wait_cell_times_out_without_notify() {
        let cell = WaitCell::new();
        let start = Instant::now();
        assert!(!cell.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn wait_cell_wakes_on_notify() {
        let cell = Arc::new(WaitCell::new());
        let peer = Arc::clone(&cell);
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            peer.notify();
        });

        let start = Instant::now();
        assert!(cell.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
        waker.join().expect("waker thread");
    }

    #[test]
    fn wait_cell_notify_before_wait_is_not_lost() {
        let cell = WaitCell::new();
        cell.notify();
        let start = Instant::now();
        assert!(cell.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_millis(100));
        // The signal was consumed; the next wait times out.
        assert!(!cell.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn flags_start_clear_and_ignore_unimpairable_links() {
        let flags = BurstFlags::default();
        for kind in LinkKind::IMPAIRABLE {
            assert!(!flags.is_in_burst(kind));
        }
        assert!(!flags.is_in_burst(LinkKind::BaseToBase));
        assert!(!flags.is_in_burst(LinkKind::Other));
    }

    #[test]
    fn flags_round_trip_per_link() {
        let flags = BurstFlags::default();
        flags.set(1, true);
        assert!(!flags.is_in_burst(LinkKind::BaseToRover));
        assert!(flags.is_in_burst(LinkKind::RoverToBase));
        assert!(!flags.is_in_burst(LinkKind::RoverToMoon));
        flags.set(1, false);
        assert!(!flags.is_in_burst(LinkKind::RoverToBase));
    }

    #[test]
    fn supervisor_shutdown_is_prompt_even_mid_sleep() {
        // Default profiles draw inter-burst intervals measured in hours, so
        // the workers are certainly parked in their first sleep.
        let store = Arc::new(ConfigStore::open(None));
        let flags = BurstFlags::shared();
        let stop = Arc::new(AtomicBool::new(false));
        let supervisor =
            BurstSupervisor::spawn(Arc::clone(&store), Arc::clone(&flags), Arc::clone(&stop));

        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        supervisor.request_stop();
        supervisor.join();
        assert!(
            start.elapsed() < Duration::from_millis(100),
            "workers took {:?} to exit",
            start.elapsed()
        );

        for kind in LinkKind::IMPAIRABLE {
            assert!(!flags.is_in_burst(kind), "{kind} flag still set after join");
        }
    }

    #[test]
    fn zero_frequency_link_still_runs_and_stops() {
        use std::io::Write;

        // Zero out every burst distribution: the workers must survive the
        // division (epsilon floor) and park in a very long sleep.
        let zeroed = r#"{ "base_packet_loss_burst_freq_per_hour": 0,
            "packet_loss_burst_freq_stddev": 0,
            "base_packet_loss_burst_duration_ms": 0,
            "base_packet_loss_burst_duration_stddev": 0 }"#;
        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        write!(
            file,
            r#"{{"earth_to_earth":{zeroed},"earth_to_moon":{zeroed},"moon_to_earth":{zeroed},"moon_to_moon":{zeroed}}}"#
        )
        .expect("write config");
        file.flush().expect("flush config");

        let store = Arc::new(ConfigStore::open(Some(file.path())));
        assert_eq!(store.base_to_rover().base_packet_loss_burst_freq_per_hour, 0.0);

        let flags = BurstFlags::shared();
        let stop = Arc::new(AtomicBool::new(false));
        let supervisor =
            BurstSupervisor::spawn(Arc::clone(&store), Arc::clone(&flags), Arc::clone(&stop));

        thread::sleep(Duration::from_millis(20));
        for kind in LinkKind::IMPAIRABLE {
            assert!(!flags.is_in_burst(kind));
        }
        supervisor.request_stop();
        supervisor.join();
    }
}
