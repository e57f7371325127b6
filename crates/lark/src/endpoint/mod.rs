// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client endpoints: the publisher and the subscriber.
//!
//! Both sides listen for nexus beacons on the well-known UDP port, maintain
//! a table of known nexus instances, and keep a TCP link to each one
//! (rewritten to loopback when the nexus runs on this host). Neither side
//! ever learns about the other: all routing happens at the nexus.

pub mod publisher;
pub mod subscriber;

pub use publisher::{Publisher, PublisherConfig};
pub use subscriber::{FnHandler, Handler, Subscriber, SubscriberConfig};
