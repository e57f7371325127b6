// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Lark - self-discovering pub/sub for LAN clusters
//!
//! Lark connects many publishers to many subscribers through a central relay
//! (the *nexus*) with hierarchical topic routing. Endpoints locate the nexus
//! by listening for its periodic UDP broadcast beacon, so a cluster needs no
//! configuration beyond starting one `lark-nexus` process.
//!
//! ## Quick start
//!
//! ```no_run
//! use lark::endpoint::{FnHandler, Publisher, PublisherConfig, Subscriber, SubscriberConfig};
//!
//! let subscriber = Subscriber::new(SubscriberConfig::default())?;
//! subscriber.subscribe(
//!     "sensors.#",
//!     FnHandler::new(|payload, topic| {
//!         println!("{}: {} bytes", topic, payload.len());
//!     }),
//! )?;
//!
//! let publisher = Publisher::new(PublisherConfig::default())?;
//! publisher.send("sensors.imu.acc", br#"{"x":0.1}"#)?;
//! # Ok::<(), lark::Error>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! publisher --tcp--> nexus (publisher-facing :9898)
//!                      |  prefix-filtered forwarding
//!                    nexus (subscriber-facing :8989) --tcp--> subscriber
//!                      |                                        |
//!                      +---- udp beacon :8899 ------------------+
//! ```
//!
//! Topics are dot-delimited; subscriptions may use `*` (exactly one segment)
//! and `#` (zero or more segments). The nexus filters coarsely on a concrete
//! topic prefix; exact wildcard matching happens at the subscriber.
//!
//! ## Delivery contract
//!
//! Best-effort, per-topic ordered, lossy under overload: each subscription
//! has a bounded queue and new messages are dropped when it is full. There
//! is no persistence, no replay, and no delivery guarantee across a nexus
//! restart - and a dead nexus is silent, so monitor it externally.

/// Global configuration constants (ports, timeouts, capacities).
pub mod config;
/// Discovery beacons and the per-endpoint nexus table.
pub mod discovery;
/// Publisher and subscriber endpoints.
pub mod endpoint;
/// Error and result types.
pub mod error;
/// The central relay.
pub mod nexus;
/// Gzip JSONL snapshot recording.
pub mod snapshot;
/// Topic grammar and wildcard matching.
pub mod topic;
/// Sockets, framing and the broker wire protocol.
pub mod transport;

pub use endpoint::{FnHandler, Handler, Publisher, PublisherConfig, Subscriber, SubscriberConfig};
pub use error::{Error, Result};
pub use nexus::{Nexus, NexusConfig, NexusState};
pub use snapshot::SnapshotLogger;

/// Lark version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
