// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The nexus broker: a single poll-driven I/O thread that owns both
//! listeners and every broker connection.
//!
//! ```text
//! publishers ---> publisher-facing listener -+
//!                                            |  prefix filters
//!                                            v
//!                                     +-------------+
//!                                     |   broker    | --- tee ---> observer
//!                                     +-------------+
//!                                            |
//! subscribers <-- subscriber-facing listener-+
//! ```
//!
//! `Data` messages read from publisher-side connections are forwarded to
//! every subscriber-side connection holding a matching byte-prefix filter.
//! `Subscribe`/`Unsubscribe` messages read from subscriber-side connections
//! update that connection's filter set. Each connection has a single reader
//! (this thread) and writes are flushed from a per-connection send queue.

use crate::config::{BROKER_POLL_TIMEOUT, MAX_FRAME_SIZE};
use crate::transport::{FrameCodec, WireMessage};
use crossbeam::channel::{Sender, TrySendError};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SUBSCRIBER_LISTENER_TOKEN: Token = Token(0);
const PUBLISHER_LISTENER_TOKEN: Token = Token(1);
const WAKER_TOKEN: Token = Token(2);
const CONNECTION_TOKEN_START: usize = 3;

const MAX_EVENTS: usize = 128;

/// Cap on a subscriber connection's pending send queue. A stalled subscriber
/// link drops further messages here rather than growing without bound; the
/// fabric's delivery contract is lossy anyway.
const SEND_QUEUE_CAP: usize = 8 * 1024 * 1024;

/// Which side of the broker a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Connected to the publisher-facing socket; sends `Data`.
    Publisher,
    /// Connected to the subscriber-facing socket; sends filters, receives
    /// `Data`.
    Subscriber,
}

struct Connection {
    stream: TcpStream,
    role: Role,
    peer: SocketAddr,
    codec: FrameCodec,
    send_queue: Vec<u8>,
    send_offset: usize,
    /// Byte-prefix filters with refcounts (subscriber side only).
    filters: HashMap<Vec<u8>, usize>,
}

impl Connection {
    fn filter_matches(&self, topic: &[u8]) -> bool {
        self.filters.keys().any(|prefix| topic.starts_with(prefix))
    }
}

/// The broker state moved into its I/O thread by [`crate::nexus::Nexus::run`].
pub(crate) struct Broker {
    poll: Poll,
    subscriber_listener: TcpListener,
    publisher_listener: TcpListener,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    shutdown: Arc<AtomicBool>,
    /// Depth-1 advisory tap; `None` when echo is disabled.
    observer_tx: Option<Sender<Vec<u8>>>,
}

impl Broker {
    /// Bind both listeners and set up the poll registry. Returns the broker
    /// plus the waker handle used by `stop()`.
    pub(crate) fn bind(
        pub_port: u16,
        sub_port: u16,
        shutdown: Arc<AtomicBool>,
        observer_tx: Option<Sender<Vec<u8>>>,
    ) -> io::Result<(Self, Arc<Waker>)> {
        let poll = Poll::new()?;

        let mut subscriber_listener =
            TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], pub_port)))?;
        poll.registry().register(
            &mut subscriber_listener,
            SUBSCRIBER_LISTENER_TOKEN,
            Interest::READABLE,
        )?;

        let mut publisher_listener =
            TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], sub_port)))?;
        poll.registry().register(
            &mut publisher_listener,
            PUBLISHER_LISTENER_TOKEN,
            Interest::READABLE,
        )?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok((
            Self {
                poll,
                subscriber_listener,
                publisher_listener,
                connections: HashMap::new(),
                next_token: CONNECTION_TOKEN_START,
                shutdown,
                observer_tx,
            },
            waker,
        ))
    }

    /// Run the broker event loop until shutdown.
    pub(crate) fn run(mut self) {
        log::info!(
            "[broker] forwarding {} -> {}",
            self.publisher_listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            self.subscriber_listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default(),
        );

        let mut events = Events::with_capacity(MAX_EVENTS);
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(BROKER_POLL_TIMEOUT)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::warn!("[broker] poll error: {}", e);
                }
                continue;
            }

            for event in events.iter() {
                match event.token() {
                    SUBSCRIBER_LISTENER_TOKEN => self.handle_accept(Role::Subscriber),
                    PUBLISHER_LISTENER_TOKEN => self.handle_accept(Role::Publisher),
                    WAKER_TOKEN => {} // shutdown flag re-checked by the loop
                    token => {
                        if event.is_readable() {
                            self.handle_readable(token);
                        }
                        if event.is_writable() {
                            self.handle_writable(token);
                        }
                    }
                }
            }
        }

        for (_, conn) in self.connections.drain() {
            log::debug!("[broker] closing {:?} link to {}", conn.role, conn.peer);
        }
        log::info!("[broker] stopped");
    }

    fn handle_accept(&mut self, role: Role) {
        let listener = match role {
            Role::Subscriber => &self.subscriber_listener,
            Role::Publisher => &self.publisher_listener,
        };

        loop {
            match listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        log::warn!("[broker] failed to register {}: {}", peer, e);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);

                    log::debug!("[broker] accepted {:?} link from {}", role, peer);
                    self.connections.insert(
                        token,
                        Connection {
                            stream,
                            role,
                            peer,
                            codec: FrameCodec::new(MAX_FRAME_SIZE),
                            send_queue: Vec::new(),
                            send_offset: 0,
                            filters: HashMap::new(),
                        },
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("[broker] accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, token: Token) {
        loop {
            let conn = match self.connections.get_mut(&token) {
                Some(c) => c,
                None => return,
            };
            match conn.codec.decode(&mut conn.stream) {
                Ok(Some(body)) => self.handle_message(token, body),
                Ok(None) => return,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.close_connection(token, "closed by peer");
                    return;
                }
                Err(e) => {
                    self.close_connection(token, &e.to_string());
                    return;
                }
            }
        }
    }

    fn handle_message(&mut self, token: Token, body: Vec<u8>) {
        let (role, peer) = match self.connections.get(&token) {
            Some(c) => (c.role, c.peer),
            None => return,
        };

        match role {
            Role::Publisher => {
                // Hot path: prefix filtering only needs the topic bytes.
                if WireMessage::peek_data_topic(&body).is_some() {
                    self.forward_data(body);
                } else {
                    log::debug!("[broker] dropping malformed message from {}", peer);
                }
            }
            Role::Subscriber => {
                let Some(conn) = self.connections.get_mut(&token) else {
                    return;
                };
                match WireMessage::decode(&body) {
                    Some(WireMessage::Subscribe(prefix)) => {
                        log::debug!("[broker] {} subscribes prefix '{}'", peer, prefix);
                        *conn.filters.entry(prefix.into_bytes()).or_insert(0) += 1;
                    }
                    Some(WireMessage::Unsubscribe(prefix)) => {
                        log::debug!("[broker] {} unsubscribes prefix '{}'", peer, prefix);
                        let key = prefix.into_bytes();
                        if let Some(count) = conn.filters.get_mut(&key) {
                            *count -= 1;
                            if *count == 0 {
                                conn.filters.remove(&key);
                            }
                        }
                    }
                    _ => {
                        log::debug!("[broker] dropping unexpected message from {}", peer);
                    }
                }
            }
        }
    }

    /// Fan a `Data` body out to every subscriber link with a matching filter
    /// and tee it to the observer.
    fn forward_data(&mut self, body: Vec<u8>) {
        let mut observer_gone = false;
        if let Some(tx) = &self.observer_tx {
            match tx.try_send(body.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => {} // observer is advisory
                Err(TrySendError::Disconnected(_)) => observer_gone = true,
            }
        }
        if observer_gone {
            self.observer_tx = None;
        }

        let matched: Vec<Token> = {
            let Some(topic) = WireMessage::peek_data_topic(&body) else {
                return;
            };
            self.connections
                .iter()
                .filter(|(_, conn)| conn.role == Role::Subscriber && conn.filter_matches(topic))
                .map(|(token, _)| *token)
                .collect()
        };

        for token in matched {
            let Some(conn) = self.connections.get_mut(&token) else {
                continue;
            };
            if conn.send_queue.len() - conn.send_offset + body.len() > SEND_QUEUE_CAP {
                log::debug!("[broker] send queue full for {}, dropping", conn.peer);
                continue;
            }
            FrameCodec::encode_into(&body, &mut conn.send_queue);
            self.try_flush(token);
        }
    }

    fn handle_writable(&mut self, token: Token) {
        self.try_flush(token);
    }

    fn try_flush(&mut self, token: Token) {
        let conn = match self.connections.get_mut(&token) {
            Some(c) => c,
            None => return,
        };
        if conn.send_queue.is_empty() {
            return;
        }

        while conn.send_offset < conn.send_queue.len() {
            match conn.stream.write(&conn.send_queue[conn.send_offset..]) {
                Ok(0) => {
                    self.close_connection(token, "write returned 0");
                    return;
                }
                Ok(n) => conn.send_offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close_connection(token, &e.to_string());
                    return;
                }
            }
        }
        conn.send_queue.clear();
        conn.send_offset = 0;
    }

    fn close_connection(&mut self, token: Token, reason: &str) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            log::debug!(
                "[broker] dropped {:?} link to {}: {}",
                conn.role,
                conn.peer,
                reason
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn(filters: &[&str]) -> Connection {
        // A connected pair is overkill for filter tests; use a listener-backed
        // stream so the struct can be built.
        let listener =
            std::net::TcpListener::bind("127.0.0.1:0").expect("bind throwaway listener");
        let addr = listener.local_addr().expect("local addr");
        let std_stream = std::net::TcpStream::connect(addr).expect("connect");
        std_stream.set_nonblocking(true).expect("nonblocking");
        let mut conn = Connection {
            stream: TcpStream::from_std(std_stream),
            role: Role::Subscriber,
            peer: addr,
            codec: FrameCodec::new(MAX_FRAME_SIZE),
            send_queue: Vec::new(),
            send_offset: 0,
            filters: HashMap::new(),
        };
        for f in filters {
            conn.filters.insert(f.as_bytes().to_vec(), 1);
        }
        conn
    }

    #[test]
    fn test_filter_prefix_semantics() {
        let conn = test_conn(&["sensors"]);
        assert!(conn.filter_matches(b"sensors"));
        assert!(conn.filter_matches(b"sensors.imu"));
        // Byte-prefix filters are deliberately coarse: refinement happens
        // client-side.
        assert!(conn.filter_matches(b"sensorsX"));
        assert!(!conn.filter_matches(b"other"));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let conn = test_conn(&[""]);
        assert!(conn.filter_matches(b"anything"));
        assert!(conn.filter_matches(b""));
    }

    #[test]
    fn test_no_filters_match_nothing() {
        let conn = test_conn(&[]);
        assert!(!conn.filter_matches(b"anything"));
    }
}
