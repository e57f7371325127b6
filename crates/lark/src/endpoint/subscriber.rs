// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The subscriber endpoint.
//!
//! One receive worker owns every socket: the UDP beacon socket and one TCP
//! link per discovered nexus, multiplexed through a poll with a finite
//! timeout so `stop()` is observed within one interval. Incoming messages
//! are matched against the subscription table (exact-topic lookup first,
//! then the wildcard list) and enqueued on bounded per-subscription FIFOs
//! consumed by per-subscription dispatcher threads.
//!
//! The two-stage queue isolates slow callbacks from the shared reader: a
//! handler that blocks for seconds costs only its own subscription's queue
//! depth, never cross-topic starvation. When a FIFO is full, new messages
//! for that subscription are dropped silently.

use crate::config::{
    BEACON_BUF_SIZE, BEACON_PORT, DEFAULT_QUEUE_CAPACITY, MAX_FRAME_SIZE,
    SUBSCRIBER_POLL_TIMEOUT,
};
use crate::discovery::{Beacon, NexusTable};
use crate::error::{Error, Result};
use crate::topic::{is_pattern, upstream_prefix, validate, TopicMatcher};
use crate::transport::{BeaconSocket, FrameCodec, WireMessage};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use mio::net::{TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const UDP_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const LINK_TOKEN_START: usize = 2;
const MAX_EVENTS: usize = 128;

/// Subscription handler: invoked by the subscription's dispatcher thread for
/// every matching message.
///
/// Payloads are opaque byte strings at this interface; decoding is the
/// handler's concern.
pub trait Handler: Send + Sync {
    fn deliver(&self, payload: &[u8], topic: &str);
}

/// Closure adapter so plain functions can be registered as handlers.
///
/// ```no_run
/// use lark::endpoint::{FnHandler, Subscriber, SubscriberConfig};
///
/// let sub = Subscriber::new(SubscriberConfig::default())?;
/// sub.subscribe(
///     "sensors.#",
///     FnHandler::new(|payload, topic| {
///         println!("{}: {} bytes", topic, payload.len());
///     }),
/// )?;
/// # Ok::<(), lark::Error>(())
/// ```
pub struct FnHandler<F>
where
    F: Fn(&[u8], &str) + Send + Sync,
{
    callback: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&[u8], &str) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&[u8], &str) + Send + Sync,
{
    fn deliver(&self, payload: &[u8], topic: &str) {
        (self.callback)(payload, topic);
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// UDP port to listen for beacons on.
    pub beacon_port: u16,
    /// Capacity of each per-subscription FIFO.
    pub queue_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            beacon_port: BEACON_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

enum QueueItem {
    Message { payload: Vec<u8>, topic: String },
    Stop,
}

struct Subscription {
    prefix: String,
    tx: Sender<QueueItem>,
    dispatcher: Option<JoinHandle<()>>,
}

/// The subscription table: exact-pattern map plus the wildcard scan list.
/// Mutated by `subscribe`/`unsubscribe` callers, read by the receive worker.
#[derive(Default)]
struct SubTable {
    by_pattern: HashMap<String, Subscription>,
    wildcards: Vec<(String, TopicMatcher)>,
}

impl SubTable {
    /// Route one message. A subscription registered under the concrete topic
    /// string is found in step 1; wildcard subscriptions only in step 2, so
    /// each subscription sees a message at most once.
    fn dispatch(&self, topic: &str, payload: &[u8]) {
        if let Some(sub) = self.by_pattern.get(topic) {
            Self::enqueue(sub, topic, payload);
        }
        for (pattern, matcher) in &self.wildcards {
            if matcher.matches(topic) {
                if let Some(sub) = self.by_pattern.get(pattern) {
                    Self::enqueue(sub, topic, payload);
                }
            }
        }
    }

    fn enqueue(sub: &Subscription, topic: &str, payload: &[u8]) {
        let item = QueueItem::Message {
            payload: payload.to_vec(),
            topic: topic.to_string(),
        };
        match sub.tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::debug!("[sub] queue full, dropping message on '{}'", topic);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

enum Control {
    /// A subscription filter to forward upstream on all current and future
    /// nexus links.
    Upstream(WireMessage),
    /// A nexus made known out-of-band (static peer).
    AddNexus { source: SocketAddr, beacon: Beacon },
}

/// The subscriber endpoint. See the module docs.
pub struct Subscriber {
    running: Arc<AtomicBool>,
    stopped: AtomicBool,
    table: Arc<RwLock<SubTable>>,
    control_tx: Sender<Control>,
    waker: Arc<Waker>,
    worker: Mutex<Option<JoinHandle<()>>>,
    nexus_count: Arc<AtomicUsize>,
    queue_capacity: usize,
}

impl Subscriber {
    pub fn new(config: SubscriberConfig) -> Result<Self> {
        let beacon = BeaconSocket::bind(config.beacon_port)
            .map_err(|e| Error::BindFailed(format!("beacon port {}: {}", config.beacon_port, e)))?;
        let std_udp = beacon.into_std();
        std_udp.set_nonblocking(true)?;
        let mut udp = UdpSocket::from_std(std_udp);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut udp, UDP_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let (control_tx, control_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let table: Arc<RwLock<SubTable>> = Arc::new(RwLock::new(SubTable::default()));
        let nexus_count = Arc::new(AtomicUsize::new(0));

        let worker_state = RecvWorker {
            poll,
            udp,
            control_rx,
            table: Arc::clone(&table),
            nexus_table: NexusTable::new(),
            links: HashMap::new(),
            next_token: LINK_TOKEN_START,
            prefixes: HashMap::new(),
            running: Arc::clone(&running),
            nexus_count: Arc::clone(&nexus_count),
        };
        let worker = thread::Builder::new()
            .name("lark-sub-recv".to_string())
            .spawn(move || worker_state.run())
            .map_err(Error::Io)?;

        Ok(Self {
            running,
            stopped: AtomicBool::new(false),
            table,
            control_tx,
            waker,
            worker: Mutex::new(Some(worker)),
            nexus_count,
            queue_capacity: config.queue_capacity,
        })
    }

    /// Register a handler for a topic pattern.
    ///
    /// The upstream subscription sent to each nexus is the longest concrete
    /// prefix of the pattern; exact filtering happens here. Registering the
    /// same pattern string twice is an error (unsubscribe first).
    pub fn subscribe<H>(&self, pattern: &str, handler: H) -> Result<()>
    where
        H: Handler + 'static,
    {
        if !validate(pattern) {
            return Err(Error::InvalidTopic(pattern.to_string()));
        }
        if !self.running.load(Ordering::Relaxed) {
            return Err(Error::InvalidState("subscriber is stopped".to_string()));
        }

        let prefix = upstream_prefix(pattern).to_string();
        let matcher = if is_pattern(pattern) {
            Some(TopicMatcher::compile(pattern)?)
        } else {
            None
        };

        let (tx, rx) = bounded(self.queue_capacity);
        {
            let mut table = self.table.write();
            if table.by_pattern.contains_key(pattern) {
                return Err(Error::DuplicateSubscription(pattern.to_string()));
            }
            let dispatcher = thread::Builder::new()
                .name("lark-dispatch".to_string())
                .spawn(move || dispatch_loop(&rx, &handler))
                .map_err(Error::Io)?;
            table.by_pattern.insert(
                pattern.to_string(),
                Subscription {
                    prefix: prefix.clone(),
                    tx,
                    dispatcher: Some(dispatcher),
                },
            );
            if let Some(matcher) = matcher {
                table.wildcards.push((pattern.to_string(), matcher));
            }
        }

        log::debug!("[sub] subscribed '{}' (upstream prefix '{}')", pattern, prefix);
        self.send_control(Control::Upstream(WireMessage::Subscribe(prefix)));
        Ok(())
    }

    /// Remove a subscription: upstream unsubscribe, unblock and join its
    /// dispatcher, drop it from the tables.
    pub fn unsubscribe(&self, pattern: &str) -> Result<()> {
        let mut sub = {
            let mut table = self.table.write();
            let Some(sub) = table.by_pattern.remove(pattern) else {
                return Err(Error::UnknownSubscription(pattern.to_string()));
            };
            table.wildcards.retain(|(p, _)| p != pattern);
            sub
        };

        self.send_control(Control::Upstream(WireMessage::Unsubscribe(
            sub.prefix.clone(),
        )));
        let _ = sub.tx.send(QueueItem::Stop);
        if let Some(handle) = sub.dispatcher.take() {
            let _ = handle.join();
        }
        log::debug!("[sub] unsubscribed '{}'", pattern);
        Ok(())
    }

    /// Number of nexus instances currently known.
    pub fn nexus_count(&self) -> usize {
        self.nexus_count.load(Ordering::Relaxed)
    }

    /// Attach to a nexus at a known address (its subscriber-facing socket),
    /// bypassing discovery. Meant for environments where UDP broadcast
    /// cannot reach.
    pub fn add_static_nexus(&self, target: SocketAddr) {
        self.send_control(Control::AddNexus {
            source: target,
            beacon: Beacon {
                pub_port: target.port(),
                sub_port: 0,
                identifier: "static00".to_string(),
            },
        });
    }

    /// Stop the endpoint: unsubscribe everything, stop the receive worker,
    /// close all sockets. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let patterns: Vec<String> = self.table.read().by_pattern.keys().cloned().collect();
        for pattern in patterns {
            let _ = self.unsubscribe(&pattern);
        }

        self.running.store(false, Ordering::Relaxed);
        if let Err(e) = self.waker.wake() {
            log::debug!("[sub] waker failed: {}", e);
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        log::info!("[sub] stopped");
    }

    fn send_control(&self, control: Control) {
        // Best effort: the worker may already be gone during shutdown.
        if self.control_tx.send(control).is_ok() {
            let _ = self.waker.wake();
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop<H: Handler>(rx: &Receiver<QueueItem>, handler: &H) {
    while let Ok(item) = rx.recv() {
        match item {
            QueueItem::Stop => break,
            QueueItem::Message { payload, topic } => handler.deliver(&payload, &topic),
        }
    }
}

/// One TCP link to a nexus, owned by the receive worker.
struct Link {
    stream: TcpStream,
    codec: FrameCodec,
    send_queue: Vec<u8>,
    send_offset: usize,
    connected: bool,
    source: SocketAddr,
}

/// The receive worker: single reader for every socket of the endpoint.
struct RecvWorker {
    poll: Poll,
    udp: UdpSocket,
    control_rx: Receiver<Control>,
    table: Arc<RwLock<SubTable>>,
    nexus_table: NexusTable,
    links: HashMap<Token, Link>,
    next_token: usize,
    /// Refcounted upstream prefixes, replayed onto newly attached links.
    prefixes: HashMap<String, usize>,
    running: Arc<AtomicBool>,
    nexus_count: Arc<AtomicUsize>,
}

impl RecvWorker {
    fn run(mut self) {
        let mut events = Events::with_capacity(MAX_EVENTS);
        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(SUBSCRIBER_POLL_TIMEOUT)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::warn!("[sub] poll error: {}", e);
                }
                continue;
            }

            let tokens: Vec<(Token, bool, bool)> = events
                .iter()
                .map(|e| (e.token(), e.is_readable(), e.is_writable()))
                .collect();
            for (token, readable, writable) in tokens {
                match token {
                    UDP_TOKEN => self.drain_beacons(),
                    WAKER_TOKEN => self.drain_control(),
                    token => {
                        if writable {
                            self.link_writable(token);
                        }
                        if readable {
                            self.link_readable(token);
                        }
                    }
                }
            }
        }
        log::debug!("[sub] receive worker exiting");
    }

    fn drain_beacons(&mut self) {
        let mut buf = [0u8; BEACON_BUF_SIZE];
        loop {
            match self.udp.recv_from(&mut buf) {
                Ok((len, source)) => {
                    let Ok(payload) = std::str::from_utf8(&buf[..len]) else {
                        log::debug!("[sub] dropping non-UTF-8 beacon from {}", source);
                        continue;
                    };
                    let Some(beacon) = Beacon::parse(payload) else {
                        log::debug!("[sub] ignoring malformed beacon from {}", source);
                        continue;
                    };
                    if self.nexus_table.observe(source, beacon) {
                        self.attach_all();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("[sub] beacon recv error: {}", e);
                    break;
                }
            }
        }
    }

    fn drain_control(&mut self) {
        while let Ok(control) = self.control_rx.try_recv() {
            match control {
                Control::Upstream(msg) => {
                    // The broker refcounts filters per connection, but each
                    // link is preloaded with one Subscribe per distinct
                    // prefix on attach. Keep the wire balanced the same way:
                    // only the first subscription of a prefix sends the
                    // Subscribe frame and only the last one sends the
                    // Unsubscribe, so shared-prefix patterns never tear the
                    // filter down early.
                    let emit = match &msg {
                        WireMessage::Subscribe(prefix) => {
                            let count = self.prefixes.entry(prefix.clone()).or_insert(0);
                            *count += 1;
                            *count == 1
                        }
                        WireMessage::Unsubscribe(prefix) => {
                            match self.prefixes.get_mut(prefix) {
                                Some(count) => {
                                    *count -= 1;
                                    if *count == 0 {
                                        self.prefixes.remove(prefix);
                                        true
                                    } else {
                                        false
                                    }
                                }
                                None => false,
                            }
                        }
                        WireMessage::Data { .. } => continue,
                    };
                    if !emit {
                        continue;
                    }
                    let frame = FrameCodec::encode(&msg.encode());
                    let tokens: Vec<Token> = self.links.keys().copied().collect();
                    for token in tokens {
                        if let Some(link) = self.links.get_mut(&token) {
                            link.send_queue.extend_from_slice(&frame);
                        }
                        self.link_flush(token);
                    }
                }
                Control::AddNexus { source, beacon } => {
                    if self.nexus_table.observe(source, beacon) {
                        self.attach_all();
                    }
                }
            }
        }
    }

    /// Connect a link to every known nexus that lacks one, preloading the
    /// current upstream filter set.
    fn attach_all(&mut self) {
        self.nexus_count
            .store(self.nexus_table.len(), Ordering::Relaxed);

        let pending: Vec<(SocketAddr, SocketAddr)> = self
            .nexus_table
            .iter()
            .filter(|(source, _)| !self.links.values().any(|l| l.source == **source))
            .map(|(source, beacon)| {
                (
                    *source,
                    SocketAddr::new(self.nexus_table.connect_ip(source), beacon.pub_port),
                )
            })
            .collect();

        for (source, target) in pending {
            match TcpStream::connect(target) {
                Ok(mut stream) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        log::warn!("[sub] failed to register link to {}: {}", target, e);
                        self.nexus_table.forget(source);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);

                    let mut send_queue = Vec::new();
                    for prefix in self.prefixes.keys() {
                        FrameCodec::encode_into(
                            &WireMessage::Subscribe(prefix.clone()).encode(),
                            &mut send_queue,
                        );
                    }
                    log::info!("[sub] attaching to nexus at {}", target);
                    self.links.insert(
                        token,
                        Link {
                            stream,
                            codec: FrameCodec::new(MAX_FRAME_SIZE),
                            send_queue,
                            send_offset: 0,
                            connected: false,
                            source,
                        },
                    );
                }
                Err(e) => {
                    log::warn!("[sub] connect to {} failed: {}", target, e);
                    self.nexus_table.forget(source);
                }
            }
        }
        self.nexus_count
            .store(self.nexus_table.len(), Ordering::Relaxed);
    }

    fn link_readable(&mut self, token: Token) {
        loop {
            let link = match self.links.get_mut(&token) {
                Some(l) => l,
                None => return,
            };
            match link.codec.decode(&mut link.stream) {
                Ok(Some(body)) => match WireMessage::decode(&body) {
                    Some(WireMessage::Data { topic, payload }) => {
                        self.table.read().dispatch(&topic, &payload);
                    }
                    _ => {
                        log::debug!("[sub] dropping malformed message");
                    }
                },
                Ok(None) => return,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.close_link(token, "closed by nexus");
                    return;
                }
                Err(e) => {
                    self.close_link(token, &e.to_string());
                    return;
                }
            }
        }
    }

    fn link_writable(&mut self, token: Token) {
        let link = match self.links.get_mut(&token) {
            Some(l) => l,
            None => return,
        };
        if !link.connected {
            match link.stream.take_error() {
                Ok(None) => {
                    link.connected = true;
                    log::debug!("[sub] link to {} established", link.source);
                }
                Ok(Some(e)) => {
                    self.close_link(token, &format!("connect failed: {}", e));
                    return;
                }
                Err(e) => {
                    self.close_link(token, &format!("connect error: {}", e));
                    return;
                }
            }
        }
        self.link_flush(token);
    }

    fn link_flush(&mut self, token: Token) {
        let link = match self.links.get_mut(&token) {
            Some(l) => l,
            None => return,
        };
        if !link.connected || link.send_queue.is_empty() {
            return;
        }
        while link.send_offset < link.send_queue.len() {
            match link.stream.write(&link.send_queue[link.send_offset..]) {
                Ok(0) => {
                    self.close_link(token, "write returned 0");
                    return;
                }
                Ok(n) => link.send_offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close_link(token, &e.to_string());
                    return;
                }
            }
        }
        link.send_queue.clear();
        link.send_offset = 0;
    }

    fn close_link(&mut self, token: Token, reason: &str) {
        if let Some(mut link) = self.links.remove(&token) {
            let _ = self.poll.registry().deregister(&mut link.stream);
            log::info!("[sub] link to nexus {} dropped: {}", link.source, reason);
            // Forget the nexus so its next beacon re-attaches even when the
            // announced tuple is unchanged.
            self.nexus_table.forget(link.source);
            self.nexus_count
                .store(self.nexus_table.len(), Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_subscriber(port: u16) -> Subscriber {
        Subscriber::new(SubscriberConfig {
            beacon_port: port,
            queue_capacity: 16,
        })
        .expect("bind subscriber")
    }

    #[test]
    fn test_subscribe_rejects_invalid_pattern() {
        let sub = test_subscriber(29400);
        let result = sub.subscribe("foo..bar", FnHandler::new(|_, _| {}));
        assert!(matches!(result, Err(Error::InvalidTopic(_))));
        sub.stop();
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let sub = test_subscriber(29410);
        sub.subscribe("dup.topic", FnHandler::new(|_, _| {}))
            .expect("first subscribe");
        let second = sub.subscribe("dup.topic", FnHandler::new(|_, _| {}));
        assert!(matches!(second, Err(Error::DuplicateSubscription(_))));
        sub.stop();
    }

    #[test]
    fn test_unsubscribe_unknown_pattern() {
        let sub = test_subscriber(29420);
        assert!(matches!(
            sub.unsubscribe("never.registered"),
            Err(Error::UnknownSubscription(_))
        ));
        sub.stop();
    }

    #[test]
    fn test_subscribe_unsubscribe_joins_dispatcher() {
        let sub = test_subscriber(29430);
        sub.subscribe("a.topic", FnHandler::new(|_, _| {}))
            .expect("subscribe");
        sub.unsubscribe("a.topic").expect("unsubscribe");
        sub.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let sub = test_subscriber(29440);
        sub.subscribe("x", FnHandler::new(|_, _| {})).expect("subscribe");
        sub.stop();
        sub.stop();
    }

    #[test]
    fn test_table_dispatch_exact_and_wildcard() {
        // Table-level routing without any network.
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = SubTable::default();

        let (tx, rx) = bounded(4);
        table.by_pattern.insert(
            "sensors.#".to_string(),
            Subscription {
                prefix: "sensors".to_string(),
                tx,
                dispatcher: None,
            },
        );
        table.wildcards.push((
            "sensors.#".to_string(),
            TopicMatcher::compile("sensors.#").unwrap(),
        ));

        table.dispatch("sensors.imu.acc", b"a");
        table.dispatch("sensors.gps", b"b");
        table.dispatch("other", b"c");

        drop(table);
        while let Ok(item) = rx.try_recv() {
            if let QueueItem::Message { .. } = item {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_table_dispatch_drop_on_overflow() {
        let mut table = SubTable::default();
        let (tx, rx) = bounded(2);
        table.by_pattern.insert(
            "t".to_string(),
            Subscription {
                prefix: "t".to_string(),
                tx,
                dispatcher: None,
            },
        );
        for _ in 0..10 {
            table.dispatch("t", b"x");
        }
        // Only the queue capacity survives; the rest were dropped silently.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
    }
}
