// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lark global configuration - single source of truth.
//!
//! Every well-known constant of the fabric lives here. Components take the
//! defaults through their config structs so tests can run whole fabrics on
//! private port sets. **Never hardcode these values elsewhere.**

use std::time::Duration;

/// Subscriber-facing TCP port: the nexus binds it, subscribers connect to it.
pub const PUB_PORT: u16 = 8989;

/// Publisher-facing TCP port: the nexus binds it, publishers connect to it.
pub const SUB_PORT: u16 = 9898;

/// Well-known UDP port for discovery beacons (send and receive, both sides).
pub const BEACON_PORT: u16 = 8899;

/// Receive buffer for beacon datagrams. Beacons are short ASCII lines; a
/// datagram larger than this is truncated by the OS and dropped as malformed.
pub const BEACON_BUF_SIZE: usize = 1024;

/// Default interval between nexus heartbeat beacons.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Default capacity of each per-subscription FIFO.
///
/// When the queue is full, new messages for that subscription are dropped
/// silently (drop-on-overflow is the fabric's only backpressure valve).
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Poll timeout of the subscriber receive worker. Bounds how long `stop()`
/// can take to be observed by the worker.
pub const SUBSCRIBER_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Recv timeout of the publisher beacon-listen worker.
pub const PUBLISHER_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll timeout of the nexus broker thread.
pub const BROKER_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum wire frame size accepted by the broker and the endpoints
/// (anti-OOM guard on the length prefix).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length of the nexus identifier carried in beacons (leading hex chars of
/// a freshly generated UUID).
pub const IDENTIFIER_LEN: usize = 8;

/// Topic segment delimiter.
pub const TOPIC_DELIM: char = '.';

/// Single-segment wildcard token.
pub const WILDCARD_ONE: char = '*';

/// Multi-segment wildcard token.
pub const WILDCARD_MANY: char = '#';
