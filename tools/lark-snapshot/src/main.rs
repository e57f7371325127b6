// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! lark-snapshot - record topic messages into a gzip JSONL file.
//!
//! Waits for a nexus to appear, then appends one JSON line per received
//! payload until the duration elapses or Ctrl+C is pressed.

use clap::Parser;
use colored::*;
use lark::endpoint::SubscriberConfig;
use lark::snapshot::SnapshotLogger;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot recorder
#[derive(Parser, Debug)]
#[command(name = "lark-snapshot")]
#[command(version)]
#[command(about = "Record lark topic messages into a gzip JSONL snapshot file")]
struct Args {
    /// Topic or pattern to record
    #[arg(short, long, default_value = "snapshot")]
    topic: String,

    /// Output file (default: timestamped name in the current directory)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Recording duration in seconds (default: until Ctrl+C)
    #[arg(short, long)]
    duration: Option<f64>,
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
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // Keep the original's convention: bare names get the full extension.
    let file = args.file.clone().map(|f| {
        if f.to_string_lossy().ends_with(".jsonl.gz") {
            f
        } else {
            PathBuf::from(format!("{}.jsonl.gz", f.to_string_lossy()))
        }
    });

    let logger = SnapshotLogger::new(&args.topic, SubscriberConfig::default(), None)?;
    eprintln!(
        "{} {} {} {}",
        ">>>".green().bold(),
        "Recording".bold(),
        args.topic.cyan(),
        "(waiting for a nexus)".dimmed()
    );
    let path = logger.start(file.as_deref())?;
    eprintln!("{} writing to {}", "---".dimmed(), path.display().to_string().bold());

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs));
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    logger.stop();
    eprintln!("{} snapshot closed", "---".dimmed());
    Ok(())
}
