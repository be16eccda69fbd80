// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link impairment: stochastic bit corruption and bursty packet loss.

pub mod biterror;
pub mod burst;
pub mod sampling;

pub use biterror::{inject, protected_prefix_len};
pub use burst::{BurstFlags, BurstSupervisor, WaitCell};
