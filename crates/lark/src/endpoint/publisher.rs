// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The publisher endpoint.
//!
//! A publisher discovers nexus instances via their beacons and keeps one
//! outbound TCP link per nexus. [`Publisher::send`] validates the topic,
//! encodes the message once and hands it to every link's sender thread
//! through an unbounded channel, so the caller never blocks on network I/O
//! (and sees no backpressure; overload shows up as process memory).

use crate::config::{BEACON_PORT, PUBLISHER_POLL_TIMEOUT};
use crate::discovery::{Beacon, NexusTable};
use crate::error::{Error, Result};
use crate::topic::validate_concrete;
use crate::transport::{BeaconSocket, FrameCodec, WireMessage};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// UDP port to listen for beacons on.
    pub beacon_port: u16,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            beacon_port: BEACON_PORT,
        }
    }
}

/// One outbound link to a nexus: an unbounded channel feeding a dedicated
/// sender thread, which is the link's single socket owner.
struct Link {
    tx: Sender<Vec<u8>>,
    worker: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    /// Beacon source this link was attached for; `None` for static peers.
    source: Option<SocketAddr>,
}

impl Link {
    fn spawn(target: SocketAddr, source: Option<SocketAddr>) -> io::Result<Link> {
        let (tx, rx) = unbounded::<Vec<u8>>();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_flag = Arc::clone(&alive);
        let worker = thread::Builder::new()
            .name("lark-pub-link".to_string())
            .spawn(move || link_loop(target, &rx, &alive_flag))?;
        Ok(Link {
            tx,
            worker: Some(worker),
            alive,
            source,
        })
    }

    fn shutdown(mut self) {
        drop(self.tx);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn link_loop(target: SocketAddr, rx: &Receiver<Vec<u8>>, alive: &AtomicBool) {
    let mut stream = match TcpStream::connect(target) {
        Ok(s) => {
            let _ = s.set_nodelay(true);
            log::info!("[pub] connected to nexus at {}", target);
            s
        }
        Err(e) => {
            log::warn!("[pub] connect to {} failed: {}", target, e);
            alive.store(false, Ordering::Relaxed);
            return;
        }
    };

    while let Ok(frame) = rx.recv() {
        if let Err(e) = stream.write_all(&frame) {
            log::warn!("[pub] link to {} broken: {}", target, e);
            alive.store(false, Ordering::Relaxed);
            return;
        }
    }
    // Channel closed: endpoint is stopping.
}

/// The publisher endpoint. See the module docs.
pub struct Publisher {
    running: Arc<AtomicBool>,
    links: Arc<RwLock<HashMap<SocketAddr, Link>>>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Publisher {
    pub fn new(config: PublisherConfig) -> Result<Self> {
        let beacon = BeaconSocket::bind(config.beacon_port)
            .map_err(|e| Error::BindFailed(format!("beacon port {}: {}", config.beacon_port, e)))?;
        beacon.set_read_timeout(PUBLISHER_POLL_TIMEOUT)?;

        let running = Arc::new(AtomicBool::new(true));
        let links: Arc<RwLock<HashMap<SocketAddr, Link>>> = Arc::new(RwLock::new(HashMap::new()));

        let running_flag = Arc::clone(&running);
        let links_shared = Arc::clone(&links);
        let worker = thread::Builder::new()
            .name("lark-pub-beacon".to_string())
            .spawn(move || beacon_loop(&beacon, &running_flag, &links_shared))
            .map_err(Error::Io)?;

        Ok(Self {
            running,
            links,
            worker: parking_lot::Mutex::new(Some(worker)),
        })
    }

    /// Publish a payload on a concrete topic.
    ///
    /// Validates the topic and fans the encoded message out to every known
    /// nexus. Never blocks on the network; messages to nexuses that are
    /// still connecting are queued on the link.
    pub fn send(&self, topic: &str, payload: &[u8]) -> Result<()> {
        validate_concrete(topic)?;
        let frame = FrameCodec::encode(&WireMessage::encode_data(topic, payload));

        let links = self.links.read();
        for link in links.values() {
            if link.alive.load(Ordering::Relaxed) {
                let _ = link.tx.send(frame.clone());
            }
        }
        Ok(())
    }

    /// Number of nexus links currently attached (including ones still
    /// connecting).
    pub fn nexus_count(&self) -> usize {
        self.links.read().len()
    }

    /// Attach to a nexus at a known address (its publisher-facing socket),
    /// bypassing discovery. Static links are not pruned by beacon loss and
    /// are meant for environments where UDP broadcast cannot reach.
    pub fn add_static_nexus(&self, target: SocketAddr) -> Result<()> {
        let mut links = self.links.write();
        if links.contains_key(&target) {
            return Ok(()); // duplicate attach is a no-op
        }
        let link = Link::spawn(target, None).map_err(Error::Io)?;
        links.insert(target, link);
        Ok(())
    }

    /// Stop the endpoint: join the beacon worker and all sender threads.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        let links = std::mem::take(&mut *self.links.write());
        for (_, link) in links {
            link.shutdown();
        }
        log::info!("[pub] stopped");
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Beacon-listen worker: parse announcements, keep the nexus table, attach
/// new links and prune dead ones. The nexus table is touched only here.
fn beacon_loop(
    beacon: &BeaconSocket,
    running: &AtomicBool,
    links: &RwLock<HashMap<SocketAddr, Link>>,
) {
    let mut table = NexusTable::new();

    while running.load(Ordering::Relaxed) {
        prune_dead_links(&mut table, links);

        match beacon.recv() {
            Ok(Some((payload, source))) => {
                let Some(parsed) = Beacon::parse(&payload) else {
                    log::debug!("[pub] ignoring malformed beacon from {}", source);
                    continue;
                };
                if table.observe(source, parsed) {
                    attach_all(&table, links);
                }
            }
            Ok(None) => {} // non-UTF-8 datagram, dropped
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::warn!("[pub] beacon recv error: {}", e);
            }
        }
    }
}

/// Connect a link to every known nexus that lacks one. Duplicate attach
/// calls are no-ops, so this can run on every table change.
fn attach_all(table: &NexusTable, links: &RwLock<HashMap<SocketAddr, Link>>) {
    for (source, beacon) in table.iter() {
        let target = SocketAddr::new(table.connect_ip(source), beacon.sub_port);
        let mut links = links.write();
        if links.contains_key(&target) {
            continue;
        }
        match Link::spawn(target, Some(*source)) {
            Ok(link) => {
                links.insert(target, link);
            }
            Err(e) => log::warn!("[pub] failed to start link to {}: {}", target, e),
        }
    }
}

/// Drop links whose sender thread died and forget their nexus entry, so the
/// next beacon re-attaches even when the announced tuple is unchanged.
fn prune_dead_links(table: &mut NexusTable, links: &RwLock<HashMap<SocketAddr, Link>>) {
    let dead: Vec<SocketAddr> = links
        .read()
        .iter()
        .filter(|(_, link)| !link.alive.load(Ordering::Relaxed))
        .map(|(addr, _)| *addr)
        .collect();
    for addr in dead {
        if let Some(link) = links.write().remove(&addr) {
            if let Some(source) = link.source {
                table.forget(source);
            }
            link.shutdown();
        }
    }
}
