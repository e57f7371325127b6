// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network interface discovery for beacon fan-out and loopback rewriting.
//!
//! A single `255.255.255.255` datagram is not guaranteed to leave every NIC
//! of a multi-homed host, so beacons are sent to the per-interface IPv4
//! broadcast address of each non-loopback, non-link-local interface.
//!
//! - Linux: parses `ip -4 addr show` (which prints the `brd` broadcast
//!   address per interface), falling back to the `local-ip-address` crate
//!   when the `ip` binary is unavailable (e.g. minimal containers).
//! - Other platforms: `local-ip-address` enumeration.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

/// Per-interface IPv4 broadcast addresses for beacon fan-out.
///
/// Loopback and link-local (169.254/16) interfaces are skipped. Falls back
/// to the limited broadcast address when nothing usable is found.
pub fn broadcast_addresses() -> Vec<Ipv4Addr> {
    let mut addrs = broadcast_addresses_platform();
    addrs.sort_unstable();
    addrs.dedup();
    if addrs.is_empty() {
        log::debug!("[ifaces] no broadcast-capable interface found, using 255.255.255.255");
        addrs.push(Ipv4Addr::BROADCAST);
    }
    addrs
}

#[cfg(target_os = "linux")]
fn broadcast_addresses_platform() -> Vec<Ipv4Addr> {
    use std::process::Command;

    let output = match Command::new("ip").args(["-4", "addr", "show"]).output() {
        Ok(o) => o,
        Err(_) => {
            log::debug!("[ifaces] 'ip' command not found, using local-ip-address crate");
            return broadcast_addresses_crate();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut addrs = Vec::new();

    // Lines look like:
    //   inet 192.168.1.22/24 brd 192.168.1.255 scope global dynamic wlan0
    for line in stdout.lines() {
        let line = line.trim();
        let Some(inet_part) = line.strip_prefix("inet ") else {
            continue;
        };
        let mut tokens = inet_part.split_whitespace();
        let Some(addr_str) = tokens.next().and_then(|cidr| cidr.split('/').next()) else {
            continue;
        };
        let Ok(addr) = addr_str.parse::<Ipv4Addr>() else {
            continue;
        };
        if addr.is_loopback() || addr.is_link_local() {
            continue;
        }
        // The token after "brd" is the interface broadcast address.
        let mut tokens = inet_part.split_whitespace();
        while let Some(tok) = tokens.next() {
            if tok == "brd" {
                if let Some(Ok(brd)) = tokens.next().map(str::parse::<Ipv4Addr>) {
                    addrs.push(brd);
                }
                break;
            }
        }
    }

    if addrs.is_empty() {
        return broadcast_addresses_crate();
    }
    addrs
}

#[cfg(not(target_os = "linux"))]
fn broadcast_addresses_platform() -> Vec<Ipv4Addr> {
    broadcast_addresses_crate()
}

/// Portable fallback: without netmask information the per-interface
/// broadcast address cannot be derived, so fan out to the limited broadcast
/// address whenever a non-loopback interface exists.
fn broadcast_addresses_crate() -> Vec<Ipv4Addr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => {
            let usable = ifs.iter().any(|(_, ip)| match ip {
                IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local(),
                IpAddr::V6(_) => false,
            });
            if usable {
                vec![Ipv4Addr::BROADCAST]
            } else {
                vec![]
            }
        }
        Err(e) => {
            log::debug!("[ifaces] failed to list network interfaces: {}", e);
            vec![]
        }
    }
}

/// The set of this host's IPv4 addresses, loopback included.
///
/// Endpoints use it to rewrite a beacon source address to `127.0.0.1` when
/// the nexus runs on the same host.
pub fn local_ipv4_addresses() -> HashSet<Ipv4Addr> {
    let mut addrs = HashSet::new();
    addrs.insert(Ipv4Addr::LOCALHOST);
    match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => {
            for (_name, ip) in ifs {
                if let IpAddr::V4(v4) = ip {
                    addrs.insert(v4);
                }
            }
        }
        Err(e) => {
            log::debug!("[ifaces] failed to list network interfaces: {}", e);
        }
    }
    addrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_addresses_never_empty() {
        assert!(!broadcast_addresses().is_empty());
    }

    #[test]
    fn test_broadcast_addresses_skip_loopback() {
        for addr in broadcast_addresses() {
            assert!(!addr.is_loopback());
        }
    }

    #[test]
    fn test_local_addresses_contain_loopback() {
        assert!(local_ipv4_addresses().contains(&Ipv4Addr::LOCALHOST));
    }
}
