// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet-diversion collaborator.
//!
//! Installs the iptables FORWARD rules that steer routed traffic on the
//! simulated interface into the kernel queue, for both directions. If the
//! second rule fails the first is rolled back so a failed startup leaves the
//! firewall untouched. Removal happens on drop and is best-effort.

use std::process::Command;
use thiserror::Error;

/// Diverter installation errors.
#[derive(Debug, Error)]
pub enum DivertError {
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

/// Handle over the installed FORWARD rules; removes them on drop.
#[derive(Debug)]
pub struct Diverter {
    interface: String,
    queue_num: u16,
}

impl Diverter {
    /// Steer FORWARD traffic entering and leaving `interface` into kernel
    /// queue `queue_num`.
    pub fn install(interface: &str, queue_num: u16) -> Result<Self, DivertError> {
        log::info!("[divert] steering {interface} FORWARD traffic into queue {queue_num}");

        iptables(&rule("-A", "-i", interface, queue_num))?;
        if let Err(err) = iptables(&rule("-A", "-o", interface, queue_num)) {
            // Roll the first rule back so we fail clean.
            if let Err(undo) = iptables(&rule("-D", "-i", interface, queue_num)) {
                log::warn!("[divert] rollback of the inbound rule failed: {undo}");
            }
            return Err(err);
        }

        Ok(Self { interface: interface.to_string(), queue_num })
    }
}

impl Drop for Diverter {
    fn drop(&mut self) {
        let mut clean = true;
        for dir in ["-i", "-o"] {
            if let Err(err) = iptables(&rule("-D", dir, &self.interface, self.queue_num)) {
                log::warn!("[divert] failed to remove {dir} rule: {err}");
                clean = false;
            }
        }
        if clean {
            log::info!("[divert] FORWARD rules for {} removed", self.interface);
        }
    }
}

fn rule(action: &str, direction: &str, interface: &str, queue_num: u16) -> Vec<String> {
    let queue = queue_num.to_string();
    [
        action,
        "FORWARD",
        direction,
        interface,
        "-j",
        "NFQUEUE",
        "--queue-num",
        queue.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn iptables(args: &[String]) -> Result<(), DivertError> {
    let rendered = format!("iptables {}", args.join(" "));
    log::debug!("[divert] exec: {rendered}");

    let status = Command::new("iptables")
        .args(args)
        .status()
        .map_err(|source| DivertError::Spawn { command: rendered.clone(), source })?;

    if !status.success() {
        return Err(DivertError::Failed { command: rendered, status });
    }
    Ok(())
}
