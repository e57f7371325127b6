// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! lark-topic-echo - print messages on a topic or pattern in real-time.

use chrono::Local;
use clap::Parser;
use colored::*;
use lark::endpoint::{FnHandler, Subscriber, SubscriberConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Echo lark topic messages
#[derive(Parser, Debug)]
#[command(name = "lark-topic-echo")]
#[command(version)]
#[command(about = "Echo lark topic messages in real-time")]
struct Args {
    /// Topic or pattern to echo (wildcards: '*' one segment, '#' any)
    topic: String,

    /// Print raw payload bytes as a hex dump instead of JSON
    #[arg(long)]
    raw: bool,

    /// Quiet mode - data only, no header
    #[arg(short, long)]
    quiet: bool,
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

    if !args.quiet {
        eprintln!(
            "{} {} {}",
            ">>>".green().bold(),
            "Echoing".bold(),
            args.topic.cyan()
        );
        eprintln!("{}", "Press Ctrl+C to stop".dimmed());
    }

    let subscriber = Subscriber::new(SubscriberConfig::default())?;
    let raw = args.raw;
    subscriber.subscribe(
        &args.topic,
        FnHandler::new(move |payload, topic| {
            let stamp = Local::now().format("%H:%M:%S%.3f");
            println!(
                "{} {}",
                format!("[{}]", stamp).dimmed(),
                topic.cyan().bold()
            );
            if raw {
                print_hex_dump(payload);
            } else {
                print_payload(payload);
            }
        }),
    )?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }
    subscriber.stop();
    Ok(())
}

fn print_payload(payload: &[u8]) {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", String::from_utf8_lossy(payload)),
        },
        Err(_) => print_hex_dump(payload),
    }
}

fn print_hex_dump(data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        print!("  {:04x}  ", i * 16);
        for (j, byte) in chunk.iter().enumerate() {
            if j == 8 {
                print!(" ");
            }
            print!("{:02x} ", byte);
        }
        for j in chunk.len()..16 {
            if j == 8 {
                print!(" ");
            }
            print!("   ");
        }
        print!(" |");
        for byte in chunk {
            print!(
                "{}",
                if *byte >= 0x20 && *byte < 0x7f {
                    *byte as char
                } else {
                    '.'
                }
            );
        }
        println!("|");
    }
}
