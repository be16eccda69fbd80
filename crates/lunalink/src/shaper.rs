// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Traffic-shaper collaborator.
//!
//! The engine never delays packets itself; it tags each verdict with a
//! per-link mark and this adapter builds the kernel-side queueing that reads
//! those marks: an `htb` root with one class per link (rate from the
//! configured throughput cap), a `netem` leaf per class carrying the link's
//! base latency and jitter, and one `fw` filter per mark.
//!
//! Teardown is best-effort: removing the root qdisc tears the whole
//! hierarchy down, and failures are logged rather than propagated so the
//! rest of the shutdown sequence still runs.

use crate::config::LinkConfig;
use crate::link::LinkKind;
use std::process::Command;
use thiserror::Error;

/// Class rate used when a link has no throughput cap.
const UNCAPPED_RATE_MBIT: f64 = 1000.0;

/// Shaper installation errors.
#[derive(Debug, Error)]
pub enum ShaperError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
    },
}

/// Handle over the installed qdisc hierarchy; removes it on drop.
#[derive(Debug)]
pub struct Shaper {
    interface: String,
}

impl Shaper {
    /// Build the per-class hierarchy on `interface`, seeded from `config`.
    ///
    /// Partial failures leave no hierarchy behind: the root qdisc is removed
    /// before the error is returned.
    pub fn install(interface: &str, config: &LinkConfig) -> Result<Self, ShaperError> {
        log::info!("[shaper] installing tc hierarchy on {interface}");

        // netem must be loadable before any leaf qdisc references it.
        run("modprobe", &["sch_netem".into()])?;

        let shaper = Self { interface: interface.to_string() };
        if let Err(err) = shaper.install_classes(config) {
            shaper.remove_root();
            return Err(err);
        }
        Ok(shaper)
    }

    fn install_classes(&self, config: &LinkConfig) -> Result<(), ShaperError> {
        let iface = &self.interface;
        let default_mark = LinkKind::BaseToBase.mark();

        // Root: unclassified traffic lands in the terrestrial class.
        self.tc(&format!(
            "qdisc add dev {iface} root handle 1: htb default {default_mark}"
        ))?;

        for kind in LinkKind::CONFIGURED {
            let params = config.params(kind).expect("configured link has parameters");
            let mark = kind.mark();

            let rate = if params.throughput_limit_mbps > 0.0 {
                params.throughput_limit_mbps
            } else {
                UNCAPPED_RATE_MBIT
            };
            self.tc(&format!(
                "class add dev {iface} parent 1: classid 1:{mark} htb rate {rate}mbit ceil {rate}mbit"
            ))?;

            // Leaf handles 10:, 20:, 30:, 40: keyed off the mark.
            self.tc(&format!(
                "qdisc add dev {iface} parent 1:{mark} handle {mark}0: netem delay {}ms {}ms 0%",
                params.base_latency_ms, params.latency_jitter_ms
            ))?;

            self.tc(&format!(
                "filter add dev {iface} parent 1: protocol ip prio 1 handle {mark} fw flowid 1:{mark}"
            ))?;
        }
        Ok(())
    }

    fn tc(&self, line: &str) -> Result<(), ShaperError> {
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        run("tc", &args)
    }

    fn remove_root(&self) {
        let iface = &self.interface;
        if let Err(err) = self.tc(&format!("qdisc del dev {iface} root")) {
            log::warn!("[shaper] failed to remove tc hierarchy on {iface}: {err}");
        } else {
            log::info!("[shaper] tc hierarchy on {iface} removed");
        }
    }
}

impl Drop for Shaper {
    fn drop(&mut self) {
        self.remove_root();
    }
}

/// Run one external command, mapping spawn failures and non-zero exits.
fn run(program: &str, args: &[String]) -> Result<(), ShaperError> {
    let rendered = format!("{program} {}", args.join(" "));
    log::debug!("[shaper] exec: {rendered}");

    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|source| ShaperError::Spawn { command: rendered.clone(), source })?;

    if !status.success() {
        return Err(ShaperError::Failed { command: rendered, status });
    }
    Ok(())
}
