// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory queue driver.
//!
//! Stands in for the kernel queue in tests and `--no-network` dry runs: a
//! deterministic FIFO of packets is framed through the same
//! receive/unpack/verdict path the real driver uses, and every verdict is
//! recorded for inspection. When the queue drains the driver raises the
//! shared stop flag and reports an interrupted read, which is exactly how a
//! shutdown signal reaches the real receive loop.
//!
//! # Frame layout
//!
//! Each receive chunk carries one or more frames:
//!
//! ```text
//! +--------+--------+--------+------------+
//! | id u32 | mark   | len    | payload    |
//! | be     | u32 be | u32 be | len bytes  |
//! +--------+--------+--------+------------+
//! ```
//!
//! `len == u32::MAX` marks a packet whose payload could not be retrieved.

use crate::queue::driver::{QueueDriver, QueueError, RawPacket, Verdict};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const FRAME_HEADER: usize = 12;
const NO_PAYLOAD: u32 = u32::MAX;

/// One verdict as the engine issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictRecord {
    pub id: u32,
    pub verdict: Verdict,
    pub mark: u32,
    /// Replacement payload, when the engine rewrote the packet.
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug)]
struct Pending {
    id: u32,
    mark: u32,
    payload: Option<Vec<u8>>,
}

/// Deterministic in-memory implementation of [`QueueDriver`].
#[derive(Debug)]
pub struct MemoryDriver {
    pending: VecDeque<Pending>,
    verdicts: Vec<VerdictRecord>,
    stop: Arc<AtomicBool>,
    /// Packets framed into a single receive chunk.
    batch: usize,
}

impl MemoryDriver {
    /// Driver that trips `stop` once its queue is drained.
    #[must_use]
    pub fn with_stop(stop: Arc<AtomicBool>) -> Self {
        Self {
            pending: VecDeque::new(),
            verdicts: Vec::new(),
            stop,
            batch: 1,
        }
    }

    /// Frame up to `batch` packets into each receive chunk.
    #[must_use]
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// Queue a packet for delivery.
    pub fn enqueue(&mut self, id: u32, mark: u32, payload: Vec<u8>) {
        self.pending.push_back(Pending { id, mark, payload: Some(payload) });
    }

    /// Queue a packet whose payload the kernel could not hand over.
    pub fn enqueue_headerless(&mut self, id: u32, mark: u32) {
        self.pending.push_back(Pending { id, mark, payload: None });
    }

    /// Verdicts recorded so far, in issue order.
    #[must_use]
    pub fn verdicts(&self) -> &[VerdictRecord] {
        &self.verdicts
    }

    /// Consume the driver, returning the recorded verdicts.
    #[must_use]
    pub fn into_verdicts(self) -> Vec<VerdictRecord> {
        self.verdicts
    }
}

impl QueueDriver for MemoryDriver {
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            // Drained: behave like a shutdown signal interrupting recv().
            self.stop.store(true, Ordering::Relaxed);
            return Err(io::Error::from(io::ErrorKind::Interrupted));
        }

        let mut written = 0;
        for _ in 0..self.batch {
            let Some(next) = self.pending.front() else { break };
            let body_len = next.payload.as_ref().map_or(0, Vec::len);
            if FRAME_HEADER + body_len > buf.len() {
                // Can never be delivered; drop it rather than stall forever.
                let skipped = self.pending.pop_front().expect("front checked above");
                log::warn!(
                    "[memory-queue] packet {} larger than the receive buffer, discarded",
                    skipped.id
                );
                continue;
            }
            if written + FRAME_HEADER + body_len > buf.len() {
                break;
            }
            let next = self.pending.pop_front().expect("front checked above");

            buf[written..written + 4].copy_from_slice(&next.id.to_be_bytes());
            buf[written + 4..written + 8].copy_from_slice(&next.mark.to_be_bytes());
            let len_field = match &next.payload {
                Some(p) => p.len() as u32,
                None => NO_PAYLOAD,
            };
            buf[written + 8..written + 12].copy_from_slice(&len_field.to_be_bytes());
            written += FRAME_HEADER;
            if let Some(p) = &next.payload {
                buf[written..written + p.len()].copy_from_slice(p);
                written += p.len();
            }
        }
        Ok(written)
    }

    fn unpack<'a>(
        &mut self,
        data: &'a [u8],
        out: &mut Vec<RawPacket<'a>>,
    ) -> Result<(), QueueError> {
        let mut offset = 0;
        while offset < data.len() {
            if data.len() - offset < FRAME_HEADER {
                return Err(QueueError::Dispatch(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "truncated frame header",
                )));
            }
            let id = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap());
            let mark = u32::from_be_bytes(data[offset + 4..offset + 8].try_into().unwrap());
            let len = u32::from_be_bytes(data[offset + 8..offset + 12].try_into().unwrap());
            offset += FRAME_HEADER;

            let payload = if len == NO_PAYLOAD {
                None
            } else {
                let len = len as usize;
                if data.len() - offset < len {
                    return Err(QueueError::Dispatch(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "truncated frame payload",
                    )));
                }
                let slice = &data[offset..offset + len];
                offset += len;
                Some(slice)
            };
            out.push(RawPacket { id, mark, payload });
        }
        Ok(())
    }

    fn set_verdict(
        &mut self,
        id: u32,
        verdict: Verdict,
        mark: u32,
        payload: Option<&[u8]>,
    ) -> Result<(), QueueError> {
        self.verdicts.push(VerdictRecord {
            id,
            verdict,
            mark,
            payload: payload.map(<[u8]>::to_vec),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip_through_receive_and_unpack() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut driver = MemoryDriver::with_stop(Arc::clone(&stop)).with_batch(3);
        driver.enqueue(1, 10, vec![0xAA; 4]);
        driver.enqueue(2, 20, vec![0xBB; 2]);
        driver.enqueue_headerless(3, 30);

        let mut buf = vec![0u8; 256];
        let n = driver.receive(&mut buf).expect("receive");
        let mut packets = Vec::new();
        driver.unpack(&buf[..n], &mut packets).expect("unpack");

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].id, 1);
        assert_eq!(packets[0].payload, Some(&[0xAA, 0xAA, 0xAA, 0xAA][..]));
        assert_eq!(packets[1].mark, 20);
        assert_eq!(packets[2].id, 3);
        assert!(packets[2].payload.is_none());
        assert!(!stop.load(Ordering::Relaxed));
    }

    #[test]
    fn drained_queue_raises_stop_and_interrupts() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut driver = MemoryDriver::with_stop(Arc::clone(&stop));
        let mut buf = vec![0u8; 64];

        let err = driver.receive(&mut buf).expect_err("drained");
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert!(stop.load(Ordering::Relaxed));
    }

    #[test]
    fn truncated_chunk_is_a_dispatch_error() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut driver = MemoryDriver::with_stop(stop);
        let mut packets = Vec::new();
        assert!(matches!(
            driver.unpack(&[0u8; 5], &mut packets),
            Err(QueueError::Dispatch(_))
        ));
    }

    #[test]
    fn verdicts_are_recorded_in_order() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut driver = MemoryDriver::with_stop(stop);
        driver.set_verdict(5, Verdict::Accept, 1, None).expect("verdict");
        driver
            .set_verdict(6, Verdict::Drop, 3, Some(&[1, 2]))
            .expect("verdict");

        assert_eq!(driver.verdicts().len(), 2);
        assert_eq!(driver.verdicts()[0].id, 5);
        assert_eq!(driver.verdicts()[1].payload, Some(vec![1, 2]));
    }
}
