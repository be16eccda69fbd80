// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global constants and the per-link impairment configuration store.
//!
//! This module centralizes the engine's compile-time constants (address
//! ranges, queue sizing, baked-in link defaults) and the runtime
//! [`ConfigStore`]: a readable-by-many, writable-by-one repository of
//! [`LinkParams`] that supports atomic replacement from a JSON document.
//!
//! # Configuration document
//!
//! Four top-level sections keyed `earth_to_earth`, `earth_to_moon`,
//! `moon_to_earth`, `moon_to_moon`, each holding the ten numeric fields of
//! [`LinkParams`]. A missing field inside a present section falls back to the
//! baked-in default for that link with a logged warning; a missing section is
//! a hard error on reload (the previous configuration is retained).
//!
//! # Concurrency
//!
//! Readers take a shared lock and copy the whole record out, so a snapshot is
//! always internally consistent. `reload` takes the exclusive lock only for
//! the final swap; readers never block each other.

use crate::link::LinkKind;
use parking_lot::RwLock;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

// =======================================================================
// Address plan (build-time constants, two slices of a private /24)
// =======================================================================

/// Lowest rover address, `10.237.0.2`.
pub const ROVER_ADDR_MIN: u32 = u32::from_be_bytes([10, 237, 0, 2]);
/// Highest rover address, `10.237.0.120`.
pub const ROVER_ADDR_MAX: u32 = u32::from_be_bytes([10, 237, 0, 120]);
/// Lowest base-station address, `10.237.0.130`.
pub const BASE_ADDR_MIN: u32 = u32::from_be_bytes([10, 237, 0, 130]);
/// Highest base-station address, `10.237.0.253`.
pub const BASE_ADDR_MAX: u32 = u32::from_be_bytes([10, 237, 0, 253]);

// =======================================================================
// Kernel queue sizing
// =======================================================================

/// Default kernel queue number the diverter steers traffic into.
pub const QUEUE_NUM: u16 = 0;

/// Per-packet copy ceiling: the maximum size of an IP packet.
pub const MAX_PACKET_SIZE: usize = 65_536;

/// Receive buffer handed to the blocking kernel read. One read can carry
/// several queued packets.
pub const RECV_BUFFER_LEN: usize = 64 * 1024;

/// Requested kernel socket receive buffer (best effort).
pub const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

/// Floor for the sampled burst frequency before it divides the hour.
/// Keeps a zero-frequency link sleeping for a very long time instead of
/// dividing by zero.
pub const BURST_FREQ_EPSILON: f64 = 1e-6;

// =======================================================================
// Per-link impairment parameters
// =======================================================================

/// Impairment profile of one directed link class.
///
/// Latency and throughput fields are advisory: they are forwarded to the
/// external shaper via the per-class verdict mark and never applied by the
/// engine itself. Bit-error and burst fields drive the in-process pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkParams {
    /// Base one-way latency (ms), enforced by the shaper.
    pub base_latency_ms: f64,
    /// Latency jitter (ms), enforced by the shaper.
    pub latency_jitter_ms: f64,
    /// Standard deviation of the jitter (ms).
    pub latency_jitter_stddev: f64,
    /// Mean per-bit flip probability applied to the post-header payload.
    pub base_bit_error_rate: f64,
    /// Standard deviation of the per-packet bit-error draw.
    pub bit_error_rate_stddev: f64,
    /// Mean burst arrivals per hour.
    pub base_packet_loss_burst_freq_per_hour: f64,
    /// Standard deviation of the burst arrival rate.
    pub packet_loss_burst_freq_stddev: f64,
    /// Mean burst duration (ms).
    pub base_packet_loss_burst_duration_ms: f64,
    /// Standard deviation of the burst duration (ms).
    pub base_packet_loss_burst_duration_stddev: f64,
    /// Advisory bandwidth cap (Mb/s); 0 means unlimited.
    pub throughput_limit_mbps: f64,
}

impl LinkParams {
    /// All-zero profile: no latency, no corruption, no bursts, no cap.
    pub const PRISTINE: LinkParams = LinkParams {
        base_latency_ms: 0.0,
        latency_jitter_ms: 0.0,
        latency_jitter_stddev: 0.0,
        base_bit_error_rate: 0.0,
        bit_error_rate_stddev: 0.0,
        base_packet_loss_burst_freq_per_hour: 0.0,
        packet_loss_burst_freq_stddev: 0.0,
        base_packet_loss_burst_duration_ms: 0.0,
        base_packet_loss_burst_duration_stddev: 0.0,
        throughput_limit_mbps: 0.0,
    };
}

/// Baked-in default for the terrestrial base-to-base path.
pub const DEFAULT_BASE_TO_BASE: LinkParams = LinkParams::PRISTINE;

/// Baked-in default for the base-to-rover uplink.
pub const DEFAULT_BASE_TO_ROVER: LinkParams = LinkParams {
    base_latency_ms: 1280.0,
    latency_jitter_ms: 100.0,
    latency_jitter_stddev: 50.0,
    base_bit_error_rate: 1e-5,
    bit_error_rate_stddev: 5e-6,
    base_packet_loss_burst_freq_per_hour: 1.0,
    packet_loss_burst_freq_stddev: 0.5,
    base_packet_loss_burst_duration_ms: 500.0,
    base_packet_loss_burst_duration_stddev: 100.0,
    throughput_limit_mbps: 0.0,
};

/// Baked-in default for the rover-to-base downlink: the uplink profile plus
/// a downlink bandwidth cap.
pub const DEFAULT_ROVER_TO_BASE: LinkParams = LinkParams {
    base_latency_ms: 1280.0,
    latency_jitter_ms: 100.0,
    latency_jitter_stddev: 50.0,
    base_bit_error_rate: 1e-5,
    bit_error_rate_stddev: 5e-6,
    base_packet_loss_burst_freq_per_hour: 1.0,
    packet_loss_burst_freq_stddev: 0.5,
    base_packet_loss_burst_duration_ms: 500.0,
    base_packet_loss_burst_duration_stddev: 100.0,
    throughput_limit_mbps: 7.5,
};

/// Baked-in default for rover-to-rover surface links.
pub const DEFAULT_ROVER_TO_MOON: LinkParams = LinkParams {
    base_latency_ms: 30.0,
    latency_jitter_ms: 10.0,
    latency_jitter_stddev: 5.0,
    base_bit_error_rate: 2e-6,
    bit_error_rate_stddev: 1e-6,
    base_packet_loss_burst_freq_per_hour: 0.2,
    packet_loss_burst_freq_stddev: 0.1,
    base_packet_loss_burst_duration_ms: 50.0,
    base_packet_loss_burst_duration_stddev: 10.0,
    throughput_limit_mbps: 7.5,
};

/// Field keys of a link section, paired with accessors into [`LinkParams`].
/// Order matches the document schema.
const FIELD_KEYS: [&str; 10] = [
    "base_latency_ms",
    "latency_jitter_ms",
    "latency_jitter_stddev",
    "base_bit_error_rate",
    "bit_error_rate_stddev",
    "base_packet_loss_burst_freq_per_hour",
    "packet_loss_burst_freq_stddev",
    "base_packet_loss_burst_duration_ms",
    "base_packet_loss_burst_duration_stddev",
    "throughput_limit_mbps",
];

fn field_mut<'a>(params: &'a mut LinkParams, key: &str) -> &'a mut f64 {
    match key {
        "base_latency_ms" => &mut params.base_latency_ms,
        "latency_jitter_ms" => &mut params.latency_jitter_ms,
        "latency_jitter_stddev" => &mut params.latency_jitter_stddev,
        "base_bit_error_rate" => &mut params.base_bit_error_rate,
        "bit_error_rate_stddev" => &mut params.bit_error_rate_stddev,
        "base_packet_loss_burst_freq_per_hour" => {
            &mut params.base_packet_loss_burst_freq_per_hour
        }
        "packet_loss_burst_freq_stddev" => &mut params.packet_loss_burst_freq_stddev,
        "base_packet_loss_burst_duration_ms" => &mut params.base_packet_loss_burst_duration_ms,
        "base_packet_loss_burst_duration_stddev" => {
            &mut params.base_packet_loss_burst_duration_stddev
        }
        "throughput_limit_mbps" => &mut params.throughput_limit_mbps,
        _ => unreachable!("unknown link parameter key"),
    }
}

// =======================================================================
// Whole-record configuration
// =======================================================================

/// The complete impairment configuration: one [`LinkParams`] per configured
/// link. `Copy`, so a snapshot is a plain value with no further locking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfig {
    pub base_to_base: LinkParams,
    pub base_to_rover: LinkParams,
    pub rover_to_base: LinkParams,
    pub rover_to_moon: LinkParams,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_to_base: DEFAULT_BASE_TO_BASE,
            base_to_rover: DEFAULT_BASE_TO_ROVER,
            rover_to_base: DEFAULT_ROVER_TO_BASE,
            rover_to_moon: DEFAULT_ROVER_TO_MOON,
        }
    }
}

impl LinkConfig {
    /// Parameters for one link class; `None` for unclassified traffic.
    #[inline]
    #[must_use]
    pub fn params(&self, kind: LinkKind) -> Option<&LinkParams> {
        match kind {
            LinkKind::BaseToBase => Some(&self.base_to_base),
            LinkKind::BaseToRover => Some(&self.base_to_rover),
            LinkKind::RoverToBase => Some(&self.rover_to_base),
            LinkKind::RoverToMoon => Some(&self.rover_to_moon),
            LinkKind::Other => None,
        }
    }

    fn params_mut(&mut self, kind: LinkKind) -> Option<&mut LinkParams> {
        match kind {
            LinkKind::BaseToBase => Some(&mut self.base_to_base),
            LinkKind::BaseToRover => Some(&mut self.base_to_rover),
            LinkKind::RoverToBase => Some(&mut self.rover_to_base),
            LinkKind::RoverToMoon => Some(&mut self.rover_to_moon),
            LinkKind::Other => None,
        }
    }

    fn defaults_for(kind: LinkKind) -> LinkParams {
        match kind {
            LinkKind::BaseToBase => DEFAULT_BASE_TO_BASE,
            LinkKind::BaseToRover => DEFAULT_BASE_TO_ROVER,
            LinkKind::RoverToBase => DEFAULT_ROVER_TO_BASE,
            LinkKind::RoverToMoon => DEFAULT_ROVER_TO_MOON,
            LinkKind::Other => LinkParams::PRISTINE,
        }
    }
}

// =======================================================================
// Errors
// =======================================================================

/// Configuration load/reload errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("configuration document root is not an object")]
    NotAnObject,

    #[error("configuration section '{0}' is missing")]
    SectionMissing(&'static str),

    #[error("no configuration path set for this store")]
    NoSource,
}

// =======================================================================
// Store
// =======================================================================

/// Thread-safe repository of the current [`LinkConfig`].
///
/// Shared across the dispatch thread and the burst supervisors. Readers copy
/// the record out under a shared lock; `reload` swaps it atomically under the
/// exclusive lock, retaining the previous record on any failure.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<LinkConfig>,
}

impl ConfigStore {
    /// Construct the store, loading from `path` when given.
    ///
    /// First-time construction is tolerant: an unreadable or invalid source
    /// logs the problem and installs the baked-in defaults for every link, so
    /// the engine always comes up with a complete record.
    #[must_use]
    pub fn open(path: Option<&Path>) -> Self {
        let store = Self {
            path: path.map(Path::to_path_buf),
            current: RwLock::new(LinkConfig::default()),
        };
        if store.path.is_some() {
            if let Err(err) = store.reload() {
                log::warn!("[config] no usable configuration ({err}); using defaults");
            }
        } else {
            log::info!("[config] no configuration file given; using defaults");
        }
        store
    }

    /// A consistent copy of the current configuration.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> LinkConfig {
        *self.current.read()
    }

    /// Parameters of the terrestrial base-to-base path.
    #[must_use]
    pub fn base_to_base(&self) -> LinkParams {
        self.current.read().base_to_base
    }

    /// Parameters of the base-to-rover uplink.
    #[must_use]
    pub fn base_to_rover(&self) -> LinkParams {
        self.current.read().base_to_rover
    }

    /// Parameters of the rover-to-base downlink.
    #[must_use]
    pub fn rover_to_base(&self) -> LinkParams {
        self.current.read().rover_to_base
    }

    /// Parameters of rover-to-rover surface links.
    #[must_use]
    pub fn rover_to_moon(&self) -> LinkParams {
        self.current.read().rover_to_moon
    }

    /// Parameters for `kind`, falling back to the pristine profile for
    /// unclassified traffic.
    #[must_use]
    pub fn params(&self, kind: LinkKind) -> LinkParams {
        self.current
            .read()
            .params(kind)
            .copied()
            .unwrap_or(LinkParams::PRISTINE)
    }

    /// Re-read the configuration from the source path and atomically replace
    /// the current record.
    ///
    /// On any error the previous record stays in place. A section missing
    /// from the document is an error; a field missing from a present section
    /// is substituted with that link's default and logged once.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let path = self.path.as_deref().ok_or(ConfigError::NoSource)?;
        let text = std::fs::read_to_string(path)?;
        let parsed = parse_document(&text)?;
        *self.current.write() = parsed;
        log::info!("[config] loaded link configuration from {}", path.display());
        Ok(())
    }
}

/// Parse a complete configuration document.
///
/// Kept free of the store so the parse (and its warnings) runs outside any
/// lock; the caller swaps the result in under the write lock.
fn parse_document(text: &str) -> Result<LinkConfig, ConfigError> {
    let root: Value = serde_json::from_str(text)?;
    let root = root.as_object().ok_or(ConfigError::NotAnObject)?;

    let mut config = LinkConfig::default();
    for kind in LinkKind::CONFIGURED {
        let key = kind.section_key().expect("configured link has a section key");
        let section = root
            .get(key)
            .and_then(Value::as_object)
            .ok_or(ConfigError::SectionMissing(key))?;

        let defaults = LinkConfig::defaults_for(kind);
        let params = config
            .params_mut(kind)
            .expect("configured link has a parameter slot");
        *params = defaults;

        for field in FIELD_KEYS {
            let slot = field_mut(params, field);
            let fallback = *slot;
            match section.get(field).and_then(Value::as_f64) {
                Some(v) if v.is_finite() && v >= 0.0 => *slot = v,
                Some(v) => {
                    log::warn!(
                        "[config] {key}.{field} = {v} is out of range; using default {fallback}"
                    );
                }
                None => {
                    log::warn!("[config] {key}.{field} missing; using default {fallback}");
                }
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp config file");
        file.write_all(json.as_bytes()).expect("write config");
        file.flush().expect("flush config");
        file
    }

    const FULL: &str = r#"{
        "earth_to_earth": { "base_latency_ms": 1, "latency_jitter_ms": 2,
            "latency_jitter_stddev": 3, "base_bit_error_rate": 0.5,
            "bit_error_rate_stddev": 0.25,
            "base_packet_loss_burst_freq_per_hour": 4,
            "packet_loss_burst_freq_stddev": 5,
            "base_packet_loss_burst_duration_ms": 6,
            "base_packet_loss_burst_duration_stddev": 7,
            "throughput_limit_mbps": 8 },
        "earth_to_moon": { "base_latency_ms": 10, "latency_jitter_ms": 20,
            "latency_jitter_stddev": 30, "base_bit_error_rate": 0.5,
            "bit_error_rate_stddev": 0.25,
            "base_packet_loss_burst_freq_per_hour": 40,
            "packet_loss_burst_freq_stddev": 50,
            "base_packet_loss_burst_duration_ms": 60,
            "base_packet_loss_burst_duration_stddev": 70,
            "throughput_limit_mbps": 80 },
        "moon_to_earth": { "base_latency_ms": 100, "latency_jitter_ms": 200,
            "latency_jitter_stddev": 300, "base_bit_error_rate": 0.5,
            "bit_error_rate_stddev": 0.25,
            "base_packet_loss_burst_freq_per_hour": 400,
            "packet_loss_burst_freq_stddev": 500,
            "base_packet_loss_burst_duration_ms": 600,
            "base_packet_loss_burst_duration_stddev": 700,
            "throughput_limit_mbps": 800 },
        "moon_to_moon": { "base_latency_ms": 11, "latency_jitter_ms": 12,
            "latency_jitter_stddev": 13, "base_bit_error_rate": 0.5,
            "bit_error_rate_stddev": 0.25,
            "base_packet_loss_burst_freq_per_hour": 14,
            "packet_loss_burst_freq_stddev": 15,
            "base_packet_loss_burst_duration_ms": 16,
            "base_packet_loss_burst_duration_stddev": 17,
            "throughput_limit_mbps": 18 }
    }"#;

    #[test]
    fn address_ranges_are_disjoint_slices_of_the_private_slash_24() {
        assert!(ROVER_ADDR_MIN < ROVER_ADDR_MAX);
        assert!(BASE_ADDR_MIN < BASE_ADDR_MAX);
        assert!(ROVER_ADDR_MAX < BASE_ADDR_MIN);
        assert_eq!(ROVER_ADDR_MIN & 0xFFFF_FF00, u32::from_be_bytes([10, 237, 0, 0]));
        assert_eq!(BASE_ADDR_MAX & 0xFFFF_FF00, u32::from_be_bytes([10, 237, 0, 0]));
    }

    #[test]
    fn missing_source_installs_defaults() {
        let store = ConfigStore::open(Some(Path::new("/nonexistent/lunalink.json")));
        assert_eq!(store.snapshot(), LinkConfig::default());
    }

    #[test]
    fn no_source_installs_defaults() {
        let store = ConfigStore::open(None);
        assert_eq!(store.snapshot(), LinkConfig::default());
        assert!(matches!(store.reload(), Err(ConfigError::NoSource)));
    }

    #[test]
    fn full_document_loads_every_field() {
        let file = write_config(FULL);
        let store = ConfigStore::open(Some(file.path()));
        let snap = store.snapshot();
        assert_eq!(snap.base_to_base.base_latency_ms, 1.0);
        assert_eq!(snap.base_to_rover.throughput_limit_mbps, 80.0);
        assert_eq!(snap.rover_to_base.base_packet_loss_burst_duration_ms, 600.0);
        assert_eq!(snap.rover_to_moon.packet_loss_burst_freq_stddev, 15.0);
    }

    #[test]
    fn missing_field_uses_that_links_default() {
        let file = write_config(
            r#"{
                "earth_to_earth": {},
                "earth_to_moon": { "base_latency_ms": 999 },
                "moon_to_earth": {},
                "moon_to_moon": {}
            }"#,
        );
        let store = ConfigStore::open(Some(file.path()));
        let snap = store.snapshot();
        assert_eq!(snap.base_to_base, DEFAULT_BASE_TO_BASE);
        assert_eq!(snap.base_to_rover.base_latency_ms, 999.0);
        assert_eq!(
            snap.base_to_rover.base_bit_error_rate,
            DEFAULT_BASE_TO_ROVER.base_bit_error_rate
        );
        assert_eq!(snap.rover_to_base, DEFAULT_ROVER_TO_BASE);
        assert_eq!(snap.rover_to_moon, DEFAULT_ROVER_TO_MOON);
    }

    #[test]
    fn negative_or_non_finite_fields_fall_back() {
        let file = write_config(
            r#"{
                "earth_to_earth": { "base_latency_ms": -5 },
                "earth_to_moon": {},
                "moon_to_earth": {},
                "moon_to_moon": { "base_bit_error_rate": -0.5 }
            }"#,
        );
        let store = ConfigStore::open(Some(file.path()));
        let snap = store.snapshot();
        assert_eq!(snap.base_to_base.base_latency_ms, 0.0);
        assert_eq!(
            snap.rover_to_moon.base_bit_error_rate,
            DEFAULT_ROVER_TO_MOON.base_bit_error_rate
        );
    }

    #[test]
    fn reload_with_missing_section_retains_previous_record() {
        let file = write_config(FULL);
        let store = ConfigStore::open(Some(file.path()));
        let before = store.snapshot();

        std::fs::write(
            file.path(),
            r#"{
                "earth_to_earth": {},
                "earth_to_moon": {},
                "moon_to_moon": {}
            }"#,
        )
        .expect("rewrite config");

        let err = store.reload().expect_err("moon_to_earth is missing");
        assert!(matches!(err, ConfigError::SectionMissing("moon_to_earth")));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn reload_with_invalid_json_retains_previous_record() {
        let file = write_config(FULL);
        let store = ConfigStore::open(Some(file.path()));
        let before = store.snapshot();

        std::fs::write(file.path(), "{ not json").expect("rewrite config");
        assert!(matches!(store.reload(), Err(ConfigError::Parse(_))));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn accessors_match_snapshot() {
        let file = write_config(FULL);
        let store = ConfigStore::open(Some(file.path()));
        let snap = store.snapshot();
        assert_eq!(store.base_to_base(), snap.base_to_base);
        assert_eq!(store.base_to_rover(), snap.base_to_rover);
        assert_eq!(store.rover_to_base(), snap.rover_to_base);
        assert_eq!(store.rover_to_moon(), snap.rover_to_moon);
        assert_eq!(store.params(LinkKind::Other), LinkParams::PRISTINE);
    }
}
