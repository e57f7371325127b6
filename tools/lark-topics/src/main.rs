// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! lark-topics - live per-topic traffic table.
//!
//! Subscribes to a pattern (everything by default) and prints a table of the
//! concrete topics seen, with their receive rate and message count, once per
//! second.

use clap::Parser;
use colored::*;
use lark::endpoint::{FnHandler, Subscriber, SubscriberConfig};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Live topic monitor
#[derive(Parser, Debug)]
#[command(name = "lark-topics")]
#[command(version)]
#[command(about = "Live table of observed lark topics")]
struct Args {
    /// Pattern to monitor ('#' observes every topic)
    #[arg(long, default_value = "#")]
    topic: String,

    /// Window size in samples to average rates over
    #[arg(long, default_value = "1000")]
    window: usize,
}

struct TopicStats {
    stamps: VecDeque<Instant>,
    count: u64,
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
        "{} {} {}",
        ">>>".green().bold(),
        "Watching".bold(),
        args.topic.cyan()
    );

    let stats: Arc<Mutex<HashMap<String, TopicStats>>> = Arc::new(Mutex::new(HashMap::new()));
    let sink = Arc::clone(&stats);
    let window = args.window;

    let subscriber = Subscriber::new(SubscriberConfig::default())?;
    subscriber.subscribe(
        &args.topic,
        FnHandler::new(move |_payload, topic| {
            let mut stats = sink.lock();
            let entry = stats.entry(topic.to_string()).or_insert_with(|| TopicStats {
                stamps: VecDeque::new(),
                count: 0,
            });
            if entry.stamps.len() == window {
                entry.stamps.pop_front();
            }
            entry.stamps.push_back(Instant::now());
            entry.count += 1;
        }),
    )?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));
        print_table(&stats.lock());
    }
    subscriber.stop();
    Ok(())
}

fn print_table(stats: &HashMap<String, TopicStats>) {
    // Clear screen and home the cursor, like `watch` does.
    print!("\x1B[2J\x1B[H");
    println!("{}", "lark topics".bold().underline());

    let mut rows: Vec<(&String, &TopicStats)> = stats.iter().collect();
    rows.sort_by_key(|(topic, _)| topic.as_str());

    for (topic, entry) in rows {
        println!(
            "{:<32} {} {:>10}",
            topic.green().bold(),
            format!("{:>10.3} Hz", rate(&entry.stamps)).yellow(),
            format!("{} msgs", entry.count).cyan()
        );
    }
}

fn rate(stamps: &VecDeque<Instant>) -> f64 {
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
