// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # lunalink - userspace link impairment for Earth/Moon analogue networks
//!
//! lunalink degrades traffic on a closed test network the way a lunar
//! communications link would: packets the router forwards across the
//! simulated interface are diverted into this process, classified into one
//! of four logical links by their addresses, and subjected to per-link bit
//! errors and bursty loss before being released or dropped. Latency,
//! jitter and bandwidth shaping are delegated to the kernel's own queueing
//! through a per-class verdict mark.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        kernel (router)                             |
//! |   FORWARD rules (divert) ----> queue 0 ----> tc htb/netem (shaper) |
//! +-----------------------------|-----------------------^--------------+
//!                               v                       | verdict + mark
//! +--------------------------------------------------------------------+
//! |                     dispatch thread (engine)                       |
//! |   receive -> classify -> burst gate -> bit errors -> verdict       |
//! +------------------|-------------------|-----------------------------+
//!                    | snapshot          | in-burst flags (atomic)
//! +------------------v------+  +---------v--------------+
//! |   configuration store   |  |  burst supervisors     |
//! |   (RwLock, reloadable)  |  |  (one thread per link) |
//! +-------------------------+  +------------------------+
//! ```
//!
//! One thread dispatches packets; three supervisor threads run the
//! burst-loss state machines; the configuration store is shared read-mostly.
//! No async runtime is involved anywhere.
//!
//! ## Key types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`LinkKind`] | Directed link class with its verdict mark |
//! | [`LinkParams`] / [`LinkConfig`] | Per-link impairment profile and the full record |
//! | [`ConfigStore`] | Reloadable, snapshot-consistent configuration |
//! | [`PacketView`] | Owning-or-borrowing packet buffer with its classification |
//! | [`QueueEngine`] | The receive/verdict dispatch loop |
//! | [`BurstSupervisor`] | The per-link burst-loss workers |

/// Global constants and the configuration store.
pub mod config;
/// iptables rules steering traffic into the kernel queue.
pub mod divert;
/// Bit corruption and burst loss.
pub mod impair;
/// Link classification tags.
pub mod link;
/// Packet buffers and the classifier.
pub mod packet;
/// Kernel-queue boundary and the dispatch engine.
pub mod queue;
/// Lifecycle controller.
pub mod runtime;
/// tc-based per-class latency/bandwidth shaping.
pub mod shaper;

pub use config::{ConfigStore, LinkConfig, LinkParams};
pub use impair::{BurstFlags, BurstSupervisor};
pub use link::LinkKind;
pub use packet::{classify, PacketView};
pub use queue::{QueueDriver, QueueEngine, Verdict};
pub use runtime::EngineOptions;
