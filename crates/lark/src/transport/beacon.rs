// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP broadcast socket for discovery beacons.
//!
//! One-line ASCII announcements are fanned out to the broadcast address of
//! every usable interface (plus loopback, so same-host endpoints hear a
//! nexus even when no broadcast-capable interface exists). Reception is a
//! plain blocking datagram read with a 1024-byte buffer.

use crate::config::BEACON_BUF_SIZE;
use crate::transport::ifaces::broadcast_addresses;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

/// A UDP socket bound to `0.0.0.0:PORT` with SO_BROADCAST and SO_REUSEADDR,
/// shared by beacon senders (nexus) and listeners (endpoints).
pub struct BeaconSocket {
    socket: UdpSocket,
    port: u16,
    /// Broadcast fan-out targets, discovered once at construction.
    targets: Vec<Ipv4Addr>,
}

impl BeaconSocket {
    /// Bind the beacon socket on the given well-known port.
    pub fn bind(port: u16) -> io::Result<Self> {
        let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        socket2.set_broadcast(true)?;
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        socket2.bind(&bind_addr.into())?;
        let socket: UdpSocket = socket2.into();

        let mut targets = broadcast_addresses();
        targets.push(Ipv4Addr::LOCALHOST);
        log::debug!("[beacon] bound 0.0.0.0:{} targets={:?}", port, targets);

        Ok(Self {
            socket,
            port,
            targets,
        })
    }

    /// Broadcast one UTF-8 datagram to every fan-out target.
    ///
    /// Per-target failures are logged and swallowed; this never raises.
    pub fn send(&self, message: &str) {
        for target in &self.targets {
            let dest = SocketAddrV4::new(*target, self.port);
            if let Err(e) = self.socket.send_to(message.as_bytes(), dest) {
                log::debug!("[beacon] send to {} failed: {}", dest, e);
            }
        }
    }

    /// Blocking datagram receive. Returns `None` when the datagram is not
    /// valid UTF-8 (dropped as malformed).
    pub fn recv(&self) -> io::Result<Option<(String, SocketAddr)>> {
        let mut buf = [0u8; BEACON_BUF_SIZE];
        let (len, addr) = self.socket.recv_from(&mut buf)?;
        match std::str::from_utf8(&buf[..len]) {
            Ok(s) => Ok(Some((s.to_string(), addr))),
            Err(_) => {
                log::debug!("[beacon] dropping non-UTF-8 datagram from {}", addr);
                Ok(None)
            }
        }
    }

    /// Set the blocking-recv timeout (cooperative-cancellation bound for
    /// listener workers).
    pub fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.socket.set_read_timeout(Some(timeout))
    }

    /// The well-known port this socket is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Unwrap into the underlying socket (for mio registration).
    pub fn into_std(self) -> UdpSocket {
        self.socket
    }
}
