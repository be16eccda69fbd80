// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The packet dispatch engine.
//!
//! A single thread runs the receive loop and everything per-packet:
//! classification, the burst gate, bit-error injection, and the verdict.
//! Verdicts are therefore issued in kernel delivery order. The burst flags
//! and the configuration store are shared with the supervisor threads but
//! never locked across a kernel call.
//!
//! # Error policy (hot loop)
//!
//! - `ENOBUFS`: the kernel dropped queued packets under load; warn and keep
//!   receiving.
//! - `EINTR`: re-check the stop flag, then keep receiving.
//! - anything else: fatal, the loop exits with the error.
//!
//! Per-packet failures never crash the process: the worst case is an
//! unmodified, unmarked release.

use crate::config::{ConfigStore, RECV_BUFFER_LEN};
use crate::impair::{biterror, BurstFlags};
use crate::packet::PacketView;
use crate::queue::driver::{QueueDriver, QueueError, RawPacket, Verdict};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters for the dispatch loop.
///
/// Written only by the dispatch thread; read concurrently by the stats
/// reporter. Relaxed atomics are sufficient because consumers only need
/// monotonic snapshots for observability.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub received: AtomicU64,
    pub accepted: AtomicU64,
    pub dropped: AtomicU64,
    pub corrupted: AtomicU64,
    pub overflows: AtomicU64,
}

impl EngineMetrics {
    /// Consistent-enough copy of the counters for logging.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            corrupted: self.corrupted.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Plain-value copy of [`EngineMetrics`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub accepted: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub overflows: u64,
}

/// What the engine decided for one packet.
struct Decision {
    verdict: Verdict,
    mark: u32,
    payload: Option<Vec<u8>>,
}

impl Decision {
    fn accept(mark: u32) -> Self {
        Self { verdict: Verdict::Accept, mark, payload: None }
    }

    fn drop(mark: u32) -> Self {
        Self { verdict: Verdict::Drop, mark, payload: None }
    }
}

/// Owns the kernel queue handle and runs the dispatch loop.
pub struct QueueEngine<D> {
    driver: D,
    store: Arc<ConfigStore>,
    bursts: Arc<BurstFlags>,
    stop: Arc<AtomicBool>,
    rng: SmallRng,
    metrics: Arc<EngineMetrics>,
}

impl<D: QueueDriver> QueueEngine<D> {
    #[must_use]
    pub fn new(
        driver: D,
        store: Arc<ConfigStore>,
        bursts: Arc<BurstFlags>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            driver,
            store,
            bursts,
            stop,
            rng: SmallRng::from_entropy(),
            metrics: Arc::new(EngineMetrics::default()),
        }
    }

    /// Shared handle on the dispatch counters, e.g. for a stats reporter.
    #[must_use]
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Give the driver back, e.g. to inspect recorded verdicts in tests.
    #[must_use]
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Run the receive loop until the stop flag is raised or a fatal queue
    /// error occurs.
    pub fn run(&mut self) -> Result<(), QueueError> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        log::info!("[engine] dispatch loop up");

        while !self.stop.load(Ordering::Relaxed) {
            let received = match self.driver.receive(&mut buf) {
                Ok(n) => n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                    // Signal: the handler may have raised the stop flag.
                    continue;
                }
                Err(err) if err.raw_os_error() == Some(libc::ENOBUFS) => {
                    EngineMetrics::bump(&self.metrics.overflows);
                    log::warn!("[engine] kernel queue overflow, packets are being dropped");
                    continue;
                }
                Err(err) => {
                    log::error!("[engine] receive failed: {err}");
                    return Err(QueueError::Receive(err));
                }
            };

            let mut packets = Vec::new();
            if let Err(err) = self.driver.unpack(&buf[..received], &mut packets) {
                log::warn!("[engine] discarding undecodable chunk: {err}");
                continue;
            }

            for packet in packets {
                let id = packet.id;
                let decision = self.decide(&packet);
                if let Err(err) = self.driver.set_verdict(
                    id,
                    decision.verdict,
                    decision.mark,
                    decision.payload.as_deref(),
                ) {
                    log::warn!("[engine] verdict for packet {id} failed: {err}");
                }
            }
        }

        let snap = self.metrics.snapshot();
        log::info!(
            "[engine] dispatch loop down ({} received, {} dropped, {} corrupted)",
            snap.received,
            snap.dropped,
            snap.corrupted
        );
        Ok(())
    }

    /// Per-packet pipeline: classify, gate on the burst flag, maybe corrupt,
    /// and pick the verdict mark.
    fn decide(&mut self, packet: &RawPacket<'_>) -> Decision {
        EngineMetrics::bump(&self.metrics.received);

        let Some(payload) = packet.payload else {
            // Nothing to inspect; release as unclassified.
            EngineMetrics::bump(&self.metrics.accepted);
            return Decision::accept(0);
        };

        let view = PacketView::borrowed(packet.id, payload, packet.mark, Instant::now());
        let link = view.link();
        let mark = link.mark();

        if link.is_impairable() {
            if self.bursts.is_in_burst(link) {
                EngineMetrics::bump(&self.metrics.dropped);
                log::debug!("[engine] packet {} dropped: {link} burst", packet.id);
                return Decision::drop(mark);
            }

            let params = self.store.params(link);
            if params.base_bit_error_rate > 0.0 {
                match biterror::inject(view.bytes(), &params, &mut self.rng) {
                    Ok(Some(corrupted)) => {
                        EngineMetrics::bump(&self.metrics.accepted);
                        EngineMetrics::bump(&self.metrics.corrupted);
                        return Decision {
                            verdict: Verdict::Accept,
                            mark,
                            payload: Some(corrupted),
                        };
                    }
                    Ok(None) => {}
                    Err(err) => {
                        // Safe release: unmodified and unclassified.
                        log::error!("[engine] packet {} not modified: {err}", packet.id);
                        EngineMetrics::bump(&self.metrics.accepted);
                        return Decision::accept(0);
                    }
                }
            }
        }

        EngineMetrics::bump(&self.metrics.accepted);
        Decision::accept(mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkKind;
    use crate::queue::memory::MemoryDriver;

    fn ipv4(src: [u8; 4], dst: [u8; 4], payload_len: usize) -> Vec<u8> {
        let mut p = vec![0u8; 20 + payload_len];
        p[0] = 0x45;
        p[12..16].copy_from_slice(&src);
        p[16..20].copy_from_slice(&dst);
        p
    }

    fn engine_with(
        packets: Vec<(u32, u32, Vec<u8>)>,
    ) -> (QueueEngine<MemoryDriver>, Arc<BurstFlags>) {
        let stop = Arc::new(AtomicBool::new(false));
        let mut driver = MemoryDriver::with_stop(Arc::clone(&stop));
        for (id, mark, payload) in packets {
            driver.enqueue(id, mark, payload);
        }
        let store = Arc::new(ConfigStore::open(None));
        let bursts = BurstFlags::shared();
        let engine = QueueEngine::new(driver, store, Arc::clone(&bursts), stop);
        (engine, bursts)
    }

    #[test]
    fn verdicts_preserve_kernel_delivery_order() {
        let rover = [10, 237, 0, 5];
        let packets = (0..10u32)
            .map(|id| (id, 0, ipv4(rover, rover, 8)))
            .collect();
        let (mut engine, _) = engine_with(packets);
        engine.run().expect("run");

        let driver = engine.into_driver();
        let ids: Vec<u32> = driver.verdicts().iter().map(|v| v.id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn missing_payload_is_released_unclassified() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut driver = MemoryDriver::with_stop(Arc::clone(&stop));
        driver.enqueue_headerless(77, 9);
        let store = Arc::new(ConfigStore::open(None));
        let mut engine = QueueEngine::new(driver, store, BurstFlags::shared(), stop);
        engine.run().expect("run");

        let verdicts = engine.into_driver().into_verdicts();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].verdict, Verdict::Accept);
        assert_eq!(verdicts[0].mark, 0);
        assert!(verdicts[0].payload.is_none());
    }

    #[test]
    fn burst_gate_drops_with_the_link_mark() {
        let rover = [10, 237, 0, 5];
        let base = [10, 237, 0, 200];
        let (mut engine, bursts) = engine_with(vec![(1, 0, ipv4(rover, base, 16))]);
        // Simulate the supervisor: rover-to-base is inside a burst.
        bursts.set_in_burst(LinkKind::RoverToBase, true);

        engine.run().expect("run");
        let verdicts = engine.into_driver().into_verdicts();
        assert_eq!(verdicts[0].verdict, Verdict::Drop);
        assert_eq!(verdicts[0].mark, LinkKind::RoverToBase.mark());
    }

    #[test]
    fn terrestrial_traffic_ignores_the_burst_flags() {
        let base = [10, 237, 0, 200];
        let (mut engine, bursts) = engine_with(vec![(1, 0, ipv4(base, base, 16))]);
        for kind in LinkKind::IMPAIRABLE {
            bursts.set_in_burst(kind, true);
        }

        engine.run().expect("run");
        let verdicts = engine.into_driver().into_verdicts();
        assert_eq!(verdicts[0].verdict, Verdict::Accept);
        assert_eq!(verdicts[0].mark, LinkKind::BaseToBase.mark());
        assert!(verdicts[0].payload.is_none());
    }

    #[test]
    fn stats_count_outcomes() {
        let rover = [10, 237, 0, 5];
        let packets = (0..4u32).map(|id| (id, 0, ipv4(rover, rover, 4))).collect();
        let (mut engine, bursts) = engine_with(packets);
        bursts.set_in_burst(LinkKind::RoverToMoon, true);

        engine.run().expect("run");
        let stats = engine.metrics().snapshot();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.dropped, 4);
        assert_eq!(stats.accepted, 0);
    }
}
