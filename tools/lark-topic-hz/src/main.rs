// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! lark-topic-hz - measure the receive frequency of a topic.
//!
//! Prints the rate averaged over a sliding window of arrival timestamps,
//! once per second.

use clap::Parser;
use colored::*;
use lark::endpoint::{FnHandler, Subscriber, SubscriberConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Measure topic frequency
#[derive(Parser, Debug)]
#[command(name = "lark-topic-hz")]
#[command(version)]
#[command(about = "Measure the receive frequency of a lark topic")]
struct Args {
    /// Topic or pattern to measure
    topic: String,

    /// Window size in samples to average over
    #[arg(long, default_value = "1000")]
    window: usize,
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

    eprintln!(
        "{} {} {} (window={})",
        ">>>".green().bold(),
        "Measuring".bold(),
        args.topic.cyan(),
        args.window
    );

    let stamps: Arc<Mutex<VecDeque<Instant>>> = Arc::new(Mutex::new(VecDeque::new()));
    let sink = Arc::clone(&stamps);
    let window = args.window;

    let subscriber = Subscriber::new(SubscriberConfig::default())?;
    subscriber.subscribe(
        &args.topic,
        FnHandler::new(move |_payload, _topic| {
            let mut stamps = sink.lock();
            if stamps.len() == window {
                stamps.pop_front();
            }
            stamps.push_back(Instant::now());
        }),
    )?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));
        let (rate, samples) = {
            let stamps = stamps.lock();
            (mean_rate(&stamps), stamps.len())
        };
        println!(
            "{} {} over last {} samples",
            "Frequency:".yellow().bold(),
            format!("{:.4} Hz", rate).bold(),
            samples
        );
    }
    subscriber.stop();
    Ok(())
}

/// Mean rate over consecutive arrival gaps; zero until two samples exist.
fn mean_rate(stamps: &VecDeque<Instant>) -> f64 {
    if stamps.len() < 2 {
        return 0.0;
    }
    let span = stamps
        .back()
        .zip(stamps.front())
        .map(|(last, first)| last.duration_since(*first))
        .unwrap_or_default();
    if span.is_zero() {
        return 0.0;
    }
    (stamps.len() - 1) as f64 / span.as_secs_f64()
}
