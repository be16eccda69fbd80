// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kernel-queue boundary and the packet dispatch engine.

pub mod driver;
pub mod engine;
pub mod memory;
#[cfg(feature = "nfqueue")]
pub mod nfqueue;

pub use driver::{QueueDriver, QueueError, RawPacket, Verdict};
pub use engine::{EngineMetrics, MetricsSnapshot, QueueEngine};
pub use memory::{MemoryDriver, VerdictRecord};
#[cfg(feature = "nfqueue")]
pub use nfqueue::NfqueueDriver;
