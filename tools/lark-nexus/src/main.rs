// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! lark-nexus - run the central relay node.
//!
//! All fabric traffic is routed through this process and its beacon lets
//! publishers and subscribers find it. If the nexus dies the fabric goes
//! quiet without raising errors anywhere; monitor it externally.

use clap::Parser;
use colored::*;
use lark::nexus::{Nexus, NexusConfig, NexusState};
use std::sync::Arc;
use std::time::Duration;

/// Run the lark nexus relay
#[derive(Parser, Debug)]
#[command(name = "lark-nexus")]
#[command(version)]
#[command(about = "Central relay and discovery beacon for the lark fabric")]
struct Args {
    /// Echo every forwarded message (debugging aid, costly under load)
    #[arg(long)]
    echo: bool,

    /// Seconds between discovery beacons
    #[arg(long, default_value = "1.0")]
    heartbeat_interval: f64,

    /// Fixed identifier instead of a generated one
    #[arg(long)]
    identifier: Option<String>,

    /// Subscriber-facing TCP port
    #[arg(long, default_value_t = lark::config::PUB_PORT)]
    pub_port: u16,

    /// Publisher-facing TCP port
    #[arg(long, default_value_t = lark::config::SUB_PORT)]
    sub_port: u16,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let nexus = Arc::new(Nexus::new(NexusConfig {
        pub_port: args.pub_port,
        sub_port: args.sub_port,
        heartbeat_interval: Duration::from_secs_f64(args.heartbeat_interval),
        echo: args.echo,
        identifier: args.identifier.clone(),
        ..NexusConfig::default()
    })?);

    let handle = Arc::clone(&nexus);
    ctrlc::set_handler(move || handle.stop())?;

    nexus.run()?;
    eprintln!(
        "{} {} {} (pub={}, sub={}, echo={})",
        ">>>".green().bold(),
        "Nexus".bold(),
        nexus.identifier().cyan(),
        args.pub_port,
        args.sub_port,
        args.echo
    );
    eprintln!("{}", "Press Ctrl+C to stop".dimmed());

    while nexus.state() != NexusState::Stopped {
        std::thread::sleep(Duration::from_millis(200));
    }
    eprintln!("{} clean shutdown", "---".dimmed());
    Ok(())
}
