// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The nexus: central relay bridging publishers to subscribers.
//!
//! A nexus binds two TCP sockets (publishers connect to one, subscribers to
//! the other), forwards messages between them with byte-prefix subscription
//! filtering, and announces itself on the LAN with a periodic UDP beacon so
//! endpoints can find it without configuration.
//!
//! # Example
//!
//! ```no_run
//! use lark::nexus::{Nexus, NexusConfig};
//!
//! let nexus = Nexus::new(NexusConfig::default())?;
//! nexus.run()?;
//! // ... serve until shutdown ...
//! nexus.stop();
//! # Ok::<(), lark::Error>(())
//! ```
//!
//! If the nexus dies, messages stop flowing but endpoints raise no error:
//! discovery loss is quiet by design. Monitor the process externally.

mod broker;

use crate::config::{BEACON_PORT, DEFAULT_HEARTBEAT_INTERVAL, PUB_PORT, SUB_PORT};
use crate::discovery::{generate_identifier, Beacon};
use crate::error::{Error, Result};
use crate::transport::{BeaconSocket, WireMessage};
use broker::Broker;
use crossbeam::channel::{bounded, Receiver};
use mio::Waker;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Nexus configuration. The defaults are the fabric's well-known ports.
#[derive(Debug, Clone)]
pub struct NexusConfig {
    /// Subscriber-facing TCP bind port.
    pub pub_port: u16,
    /// Publisher-facing TCP bind port.
    pub sub_port: u16,
    /// UDP beacon port.
    pub beacon_port: u16,
    /// Interval between heartbeat beacons.
    pub heartbeat_interval: Duration,
    /// Echo every forwarded message through the observer tap. Useful for
    /// debugging, costly under high load.
    pub echo: bool,
    /// Identifier carried in beacons; generated when `None`.
    pub identifier: Option<String>,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            pub_port: PUB_PORT,
            sub_port: SUB_PORT,
            beacon_port: BEACON_PORT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            echo: false,
            identifier: None,
        }
    }
}

/// Nexus lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NexusState {
    /// Sockets bound, workers not yet started.
    Init,
    /// Workers running.
    Running,
    /// `stop()` observed, workers joining.
    Stopping,
    /// All workers joined, sockets closed.
    Stopped,
}

/// Parts handed to worker threads when `run()` is called.
struct RunParts {
    broker: Broker,
    beacon: BeaconSocket,
    observer_rx: Option<Receiver<Vec<u8>>>,
}

/// The relay node. See the module docs for the overall data flow.
pub struct Nexus {
    config: NexusConfig,
    identifier: String,
    state: Mutex<NexusState>,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    parts: Mutex<Option<RunParts>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Nexus {
    /// Bind all sockets. The nexus stays in [`NexusState::Init`] until
    /// [`run()`](Self::run).
    pub fn new(config: NexusConfig) -> Result<Self> {
        let identifier = config
            .identifier
            .clone()
            .unwrap_or_else(generate_identifier);
        let shutdown = Arc::new(AtomicBool::new(false));

        let (observer_tx, observer_rx) = if config.echo {
            let (tx, rx) = bounded(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let (broker, waker) = Broker::bind(
            config.pub_port,
            config.sub_port,
            Arc::clone(&shutdown),
            observer_tx,
        )
        .map_err(|e| {
            Error::BindFailed(format!(
                "broker ports {}/{}: {}",
                config.pub_port, config.sub_port, e
            ))
        })?;

        let beacon = BeaconSocket::bind(config.beacon_port)
            .map_err(|e| Error::BindFailed(format!("beacon port {}: {}", config.beacon_port, e)))?;

        log::info!(
            "[nexus] {} bound (pub={}, sub={}, beacon={})",
            identifier,
            config.pub_port,
            config.sub_port,
            config.beacon_port
        );

        Ok(Self {
            config,
            identifier,
            state: Mutex::new(NexusState::Init),
            shutdown,
            waker,
            parts: Mutex::new(Some(RunParts {
                broker,
                beacon,
                observer_rx,
            })),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// The identifier announced in beacons.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NexusState {
        *self.state.lock()
    }

    /// Spawn the broker, heartbeat and (optional) observer workers.
    pub fn run(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != NexusState::Init {
                return Err(Error::InvalidState(format!(
                    "nexus is {:?}, expected Init",
                    *state
                )));
            }
            *state = NexusState::Running;
        }

        let parts = self
            .parts
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidState("nexus already consumed".to_string()))?;

        let mut workers = self.workers.lock();

        let broker = parts.broker;
        workers.push(
            thread::Builder::new()
                .name("lark-broker".to_string())
                .spawn(move || broker.run())
                .map_err(Error::Io)?,
        );

        let heartbeat = Beacon {
            pub_port: self.config.pub_port,
            sub_port: self.config.sub_port,
            identifier: self.identifier.clone(),
        };
        let interval = self.config.heartbeat_interval;
        let beacon_socket = parts.beacon;
        let shutdown = Arc::clone(&self.shutdown);
        workers.push(
            thread::Builder::new()
                .name("lark-heartbeat".to_string())
                .spawn(move || heartbeat_loop(&beacon_socket, &heartbeat, interval, &shutdown))
                .map_err(Error::Io)?,
        );

        if let Some(rx) = parts.observer_rx {
            workers.push(
                thread::Builder::new()
                    .name("lark-observer".to_string())
                    .spawn(move || observer_loop(&rx))
                    .map_err(Error::Io)?,
            );
        }

        log::info!("[nexus] {} running", self.identifier);
        Ok(())
    }

    /// Stop the nexus and join all workers. Idempotent; safe to call from a
    /// signal handler thread.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                NexusState::Stopping | NexusState::Stopped => return,
                NexusState::Init => {
                    // Never ran: just release the bound sockets.
                    *state = NexusState::Stopped;
                    self.parts.lock().take();
                    return;
                }
                NexusState::Running => *state = NexusState::Stopping,
            }
        }

        log::info!("[nexus] {} stopping", self.identifier);
        self.shutdown.store(true, Ordering::Relaxed);
        // The heartbeat and observer workers notice the flag / channel close;
        // the broker is parked in poll and needs a wake.
        if let Err(e) = self.waker.wake() {
            log::debug!("[nexus] waker failed: {}", e);
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.join();
        }

        *self.state.lock() = NexusState::Stopped;
        log::info!("[nexus] {} stopped", self.identifier);
    }
}

impl Drop for Nexus {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Heartbeat worker: broadcast the beacon at the configured interval.
/// Sleeps in small chunks so `stop()` is observed within ~50 ms.
fn heartbeat_loop(
    socket: &BeaconSocket,
    beacon: &Beacon,
    interval: Duration,
    shutdown: &AtomicBool,
) {
    let wire = beacon.to_wire();
    log::debug!("[nexus] heartbeat '{}' every {:?}", wire, interval);
    while !shutdown.load(Ordering::Relaxed) {
        socket.send(&wire);
        let sleep_end = Instant::now() + interval;
        while Instant::now() < sleep_end {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}

/// Observer worker: echo teed messages until the broker closes the channel.
fn observer_loop(rx: &Receiver<Vec<u8>>) {
    while let Ok(body) = rx.recv() {
        match WireMessage::decode(&body) {
            Some(WireMessage::Data { topic, payload }) => {
                log::info!(
                    "[observer] {} ({} bytes): {}",
                    topic,
                    payload.len(),
                    String::from_utf8_lossy(&payload)
                );
            }
            _ => log::debug!("[observer] undecodable tee ({} bytes)", body.len()),
        }
    }
    log::debug!("[observer] tap closed");
}
