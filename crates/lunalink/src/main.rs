// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! lunalink daemon.
//!
//! Intercepts forwarded traffic on the simulated interface and applies the
//! configured per-link impairments. Requires CAP_NET_ADMIN and, for the real
//! kernel queue, a build with the `nfqueue` feature:
//!
//! ```bash
//! cargo build --release --features nfqueue
//! lunalink --config /etc/lunalink.json --interface wg0
//! ```
//!
//! `--dry-run` exercises the whole lifecycle against an in-memory queue and
//! needs neither the feature nor privileges.

use clap::Parser;
use lunalink::queue::MemoryDriver;
use lunalink::runtime::{self, EngineOptions};
use std::path::PathBuf;
use std::sync::Arc;

/// Userspace link-impairment engine for Earth/Moon analogue test networks.
#[derive(Parser, Debug)]
#[command(name = "lunalink")]
#[command(version)]
#[command(about = "Degrades routed traffic per logical link: bit errors, loss bursts, shaping marks")]
struct Args {
    /// Path to the JSON link configuration; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface whose forwarded traffic is intercepted.
    #[arg(short, long, default_value = "wg0")]
    interface: String,

    /// Kernel queue number.
    #[arg(short, long, default_value_t = lunalink::config::QUEUE_NUM)]
    queue_num: u16,

    /// Skip iptables/tc management (the rules are expected to exist).
    #[arg(long)]
    no_network: bool,

    /// Run the lifecycle against an empty in-memory queue and exit.
    #[arg(long)]
    dry_run: bool,

    /// Seconds between dispatch-counter log lines (0 disables).
    #[arg(long, default_value_t = 10)]
    stats_interval: u64,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level.as_str()),
    )
    .init();

    if let Err(err) = run(&args) {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), runtime::RuntimeError> {
    let opts = EngineOptions {
        config_path: args.config.clone(),
        interface: args.interface.clone(),
        queue_num: args.queue_num,
        manage_network: !args.no_network && !args.dry_run,
        handle_signals: !args.dry_run,
        stats_interval_secs: args.stats_interval,
    };

    if args.dry_run {
        log::info!("dry run: lifecycle over an in-memory queue, no kernel state touched");
        return runtime::run(&opts, |_, stop| {
            Ok(MemoryDriver::with_stop(Arc::clone(stop)))
        });
    }

    run_nfqueue(&opts)
}

#[cfg(feature = "nfqueue")]
fn run_nfqueue(opts: &EngineOptions) -> Result<(), runtime::RuntimeError> {
    runtime::run(opts, |opts, _stop| {
        lunalink::queue::NfqueueDriver::open(opts.queue_num)
    })
}

#[cfg(not(feature = "nfqueue"))]
fn run_nfqueue(_opts: &EngineOptions) -> Result<(), runtime::RuntimeError> {
    log::error!(
        "this build has no kernel-queue driver; rebuild with --features nfqueue \
         (or use --dry-run)"
    );
    std::process::exit(2);
}
