// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gaussian draws for the impairment pipeline.
//!
//! Box–Muller over two uniform samples; enough for link statistics, no
//! distribution tables needed.

use rand::Rng;
use std::f64::consts::PI;

/// Draw from `N(mean, std_dev)`.
///
/// A non-positive `std_dev` degenerates to the mean, which is how an
/// operator pins a parameter to an exact value.
pub fn normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return mean;
    }
    // u1 must stay off zero for the log.
    let u1: f64 = (1.0 - rng.gen::<f64>()).max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    let r = (-2.0 * u1.ln()).sqrt();
    let theta = 2.0 * PI * u2;
    mean + std_dev * r * theta.cos()
}

/// Draw from `N(mean, std_dev)`, clamped at zero.
///
/// Negative tails of the link distributions have no physical meaning; a
/// clamped zero draw triggers an immediate transition, which is intended.
pub fn normal_clamped<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    normal(rng, mean, std_dev).max(0.0)
}
