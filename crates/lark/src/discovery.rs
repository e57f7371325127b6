// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery beacon payloads and the per-endpoint nexus table.
//!
//! A nexus announces itself with a single ASCII datagram
//! `"<pub_port> <sub_port> <identifier>"`. Endpoints key what they learn by
//! the observed sender address; a change in any announced field replaces the
//! entry and re-triggers attachment. Operators should note that nexus death
//! is quiet: no beacon means no update, and endpoints simply keep polling.

use crate::config::IDENTIFIER_LEN;
use crate::transport::ifaces::local_ipv4_addresses;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Parsed beacon payload: the two advertised TCP ports plus the opaque
/// identifier the nexus chose at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    /// Subscriber-facing TCP port (subscribers connect here).
    pub pub_port: u16,
    /// Publisher-facing TCP port (publishers connect here).
    pub sub_port: u16,
    /// 8-character opaque tag, without whitespace.
    pub identifier: String,
}

impl Beacon {
    /// Parse a beacon datagram: three whitespace-separated tokens, the first
    /// two decimal port numbers. Anything else is `None` (dropped).
    pub fn parse(payload: &str) -> Option<Beacon> {
        let mut tokens = payload.split_whitespace();
        let pub_port = tokens.next()?.parse::<u16>().ok()?;
        let sub_port = tokens.next()?.parse::<u16>().ok()?;
        let identifier = tokens.next()?.to_string();
        if tokens.next().is_some() {
            return None;
        }
        Some(Beacon {
            pub_port,
            sub_port,
            identifier,
        })
    }

    /// Serialize for the wire.
    pub fn to_wire(&self) -> String {
        format!("{} {} {}", self.pub_port, self.sub_port, self.identifier)
    }
}

impl std::fmt::Display for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "nexus {} (pub={}, sub={})",
            self.identifier, self.pub_port, self.sub_port
        )
    }
}

/// Generate a fresh nexus identifier: the leading hex characters of a
/// version-4 UUID. Collisions are possible in principle but never matter:
/// the identifier only disambiguates beacons in logs and restart detection.
pub fn generate_identifier() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..IDENTIFIER_LEN].to_string()
}

/// Per-endpoint table of known nexus instances, keyed by beacon source
/// address. Touched only from the endpoint's receive worker.
#[derive(Debug, Default)]
pub struct NexusTable {
    entries: HashMap<SocketAddr, Beacon>,
    /// This host's own IPv4 addresses, for loopback rewriting.
    own_ips: HashSet<Ipv4Addr>,
}

impl NexusTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            own_ips: local_ipv4_addresses(),
        }
    }

    /// Record a beacon. Returns `true` when the entry is new or any field
    /// changed (i.e. the endpoint should run its attach routine).
    pub fn observe(&mut self, source: SocketAddr, beacon: Beacon) -> bool {
        match self.entries.get(&source) {
            Some(existing) if *existing == beacon => false,
            _ => {
                log::info!("[discovery] {} at {}", beacon, source);
                self.entries.insert(source, beacon);
                true
            }
        }
    }

    /// Forget a nexus (its TCP link dropped). The next beacon re-adds it and
    /// re-triggers attachment even if the identifier did not change.
    pub fn forget(&mut self, source: SocketAddr) {
        if let Some(beacon) = self.entries.remove(&source) {
            log::info!("[discovery] lost {} at {}", beacon, source);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(source, beacon)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&SocketAddr, &Beacon)> {
        self.entries.iter()
    }

    /// Compute the address to connect to for a beacon source: rewritten to
    /// loopback when the source IP is one of this host's own addresses.
    pub fn connect_ip(&self, source: &SocketAddr) -> IpAddr {
        match source.ip() {
            IpAddr::V4(v4) if self.own_ips.contains(&v4) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beacon_roundtrip() {
        let beacon = Beacon {
            pub_port: 8989,
            sub_port: 9898,
            identifier: "cafef00d".to_string(),
        };
        assert_eq!(Beacon::parse(&beacon.to_wire()), Some(beacon));
    }

    #[test]
    fn test_beacon_parse_rejects_malformed() {
        for payload in ["", "8989", "8989 9898", "x y z", "8989 9898 id extra", "99999 1 id"] {
            assert_eq!(Beacon::parse(payload), None, "payload '{}'", payload);
        }
    }

    #[test]
    fn test_identifier_is_short_hex() {
        let id = generate_identifier();
        assert_eq!(id.len(), IDENTIFIER_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_identifier());
    }

    #[test]
    fn test_table_dedup_and_replace() {
        let mut table = NexusTable::new();
        let source: SocketAddr = "192.0.2.7:48123".parse().unwrap();
        let beacon = Beacon {
            pub_port: 8989,
            sub_port: 9898,
            identifier: "aaaaaaaa".to_string(),
        };

        assert!(table.observe(source, beacon.clone()));
        // Unchanged tuple: no re-attach.
        assert!(!table.observe(source, beacon.clone()));
        // New identifier (nexus restart): replaces the entry.
        let restarted = Beacon {
            identifier: "bbbbbbbb".to_string(),
            ..beacon
        };
        assert!(table.observe(source, restarted));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_forget_triggers_reattach() {
        let mut table = NexusTable::new();
        let source: SocketAddr = "192.0.2.7:48123".parse().unwrap();
        let beacon = Beacon {
            pub_port: 8989,
            sub_port: 9898,
            identifier: "aaaaaaaa".to_string(),
        };
        assert!(table.observe(source, beacon.clone()));
        table.forget(source);
        // Same tuple again after a connection loss must re-attach.
        assert!(table.observe(source, beacon));
    }

    #[test]
    fn test_connect_ip_rewrites_own_address_to_loopback() {
        let table = NexusTable::new();
        let local: SocketAddr = "127.0.0.1:8899".parse().unwrap();
        assert_eq!(table.connect_ip(&local), IpAddr::V4(Ipv4Addr::LOCALHOST));

        // A documentation-range address is never one of ours.
        let remote: SocketAddr = "192.0.2.99:8899".parse().unwrap();
        assert_eq!(table.connect_ip(&remote), remote.ip());
    }
}
