// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end fabric tests: nexus + publisher + subscriber triads on
//! private loopback port sets.
//!
//! Attachment uses the static-peer path (or directly injected beacon
//! datagrams where discovery itself is under test) so the tests never depend
//! on the host's broadcast configuration.

use lark::endpoint::{FnHandler, Publisher, PublisherConfig, Subscriber, SubscriberConfig};
use lark::nexus::{Nexus, NexusConfig};
use lark::snapshot::SnapshotLogger;
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-test port block: nexus pub/sub/beacon, then one beacon port per
/// endpoint so injected datagrams have exactly one receiver.
struct Ports {
    nexus_pub: u16,
    nexus_sub: u16,
    nexus_beacon: u16,
    sub_beacon: u16,
    pub_beacon: u16,
}

fn ports(base: u16) -> Ports {
    Ports {
        nexus_pub: base,
        nexus_sub: base + 1,
        nexus_beacon: base + 2,
        sub_beacon: base + 3,
        pub_beacon: base + 4,
    }
}

fn start_nexus(p: &Ports, identifier: Option<&str>) -> Nexus {
    let nexus = Nexus::new(NexusConfig {
        pub_port: p.nexus_pub,
        sub_port: p.nexus_sub,
        beacon_port: p.nexus_beacon,
        heartbeat_interval: Duration::from_millis(500),
        echo: false,
        identifier: identifier.map(str::to_string),
    })
    .expect("bind nexus");
    nexus.run().expect("run nexus");
    nexus
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Prove the whole pipeline live: subscribe a warmup topic and publish
/// probes until one arrives. Subscription filters sent earlier on the same
/// subscriber link are then guaranteed to be installed at the broker.
fn wait_live(publisher: &Publisher, subscriber: &Subscriber) {
    let live = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&live);
    subscriber
        .subscribe(
            "warmup.probe",
            FnHandler::new(move |_payload, _topic| {
                flag.store(true, Ordering::SeqCst);
            }),
        )
        .expect("subscribe warmup");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !live.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "fabric did not come up in time");
        publisher.send("warmup.probe", b"ping").expect("send probe");
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    done()
}

// S1: single host, single topic, in-order delivery.
#[test]
fn test_single_topic_in_order() {
    let p = ports(18000);
    let nexus = start_nexus(&p, None);

    let subscriber = Subscriber::new(SubscriberConfig {
        beacon_port: p.sub_beacon,
        queue_capacity: 10_000,
    })
    .expect("subscriber");
    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    subscriber
        .subscribe(
            "snapshot",
            FnHandler::new(move |payload, _topic| {
                sink.lock().push(payload.to_vec());
            }),
        )
        .expect("subscribe");
    subscriber.add_static_nexus(loopback(p.nexus_pub));

    let publisher = Publisher::new(PublisherConfig {
        beacon_port: p.pub_beacon,
    })
    .expect("publisher");
    publisher.add_static_nexus(loopback(p.nexus_sub));

    wait_live(&publisher, &subscriber);

    for i in 0..10 {
        publisher
            .send("snapshot", format!("{{\"i\":{}}}", i).as_bytes())
            .expect("send");
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(
        wait_until(Duration::from_secs(5), || received.lock().len() >= 10),
        "expected 10 messages, got {}",
        received.lock().len()
    );
    let got = received.lock().clone();
    let expected: Vec<Vec<u8>> = (0..10)
        .map(|i| format!("{{\"i\":{}}}", i).into_bytes())
        .collect();
    assert_eq!(got, expected);

    publisher.stop();
    subscriber.stop();
    nexus.stop();
}

// S2: trailing multi-segment wildcard with concrete topics passed through.
#[test]
fn test_wildcard_subscription() {
    let p = ports(18020);
    let nexus = start_nexus(&p, None);

    let subscriber = Subscriber::new(SubscriberConfig {
        beacon_port: p.sub_beacon,
        queue_capacity: 10_000,
    })
    .expect("subscriber");
    let topics: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&topics);
    subscriber
        .subscribe(
            "sensors.#",
            FnHandler::new(move |_payload, topic| {
                sink.lock().push(topic.to_string());
            }),
        )
        .expect("subscribe");
    subscriber.add_static_nexus(loopback(p.nexus_pub));

    let publisher = Publisher::new(PublisherConfig {
        beacon_port: p.pub_beacon,
    })
    .expect("publisher");
    publisher.add_static_nexus(loopback(p.nexus_sub));

    wait_live(&publisher, &subscriber);

    publisher.send("sensors.imu.acc", b"a").expect("send");
    publisher.send("sensors.gps", b"b").expect("send");
    publisher.send("other", b"c").expect("send");

    assert!(wait_until(Duration::from_secs(5), || topics.lock().len() >= 2));
    // Grace period: nothing further may arrive.
    std::thread::sleep(Duration::from_millis(300));
    let got = topics.lock().clone();
    assert_eq!(got, vec!["sensors.imu.acc".to_string(), "sensors.gps".to_string()]);

    publisher.stop();
    subscriber.stop();
    nexus.stop();
}

// S3: leading multi-segment wildcard forces a subscribe-all upstream filter.
#[test]
fn test_prefix_wildcard_subscription() {
    let p = ports(18040);
    let nexus = start_nexus(&p, None);

    let subscriber = Subscriber::new(SubscriberConfig {
        beacon_port: p.sub_beacon,
        queue_capacity: 10_000,
    })
    .expect("subscriber");
    let topics: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&topics);
    subscriber
        .subscribe(
            "#.err",
            FnHandler::new(move |_payload, topic| {
                sink.lock().push(topic.to_string());
            }),
        )
        .expect("subscribe");
    subscriber.add_static_nexus(loopback(p.nexus_pub));

    let publisher = Publisher::new(PublisherConfig {
        beacon_port: p.pub_beacon,
    })
    .expect("publisher");
    publisher.add_static_nexus(loopback(p.nexus_sub));

    wait_live(&publisher, &subscriber);

    for topic in ["err", "a.err", "a.b.err", "err.a"] {
        publisher.send(topic, b"x").expect("send");
    }

    assert!(wait_until(Duration::from_secs(5), || topics.lock().len() >= 3));
    std::thread::sleep(Duration::from_millis(300));
    let got = topics.lock().clone();
    assert_eq!(
        got,
        vec!["err".to_string(), "a.err".to_string(), "a.b.err".to_string()]
    );

    publisher.stop();
    subscriber.stop();
    nexus.stop();
}

// S4: overload with a slow handler drops on the bounded queue, never blocks
// the fabric, never crashes the handler.
#[test]
fn test_overload_drops_not_blocks() {
    let p = ports(18060);
    let nexus = start_nexus(&p, None);

    let subscriber = Subscriber::new(SubscriberConfig {
        beacon_port: p.sub_beacon,
        queue_capacity: 10,
    })
    .expect("subscriber");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    subscriber
        .subscribe(
            "firehose",
            FnHandler::new(move |_payload, _topic| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(250));
            }),
        )
        .expect("subscribe");
    subscriber.add_static_nexus(loopback(p.nexus_pub));

    let publisher = Publisher::new(PublisherConfig {
        beacon_port: p.pub_beacon,
    })
    .expect("publisher");
    publisher.add_static_nexus(loopback(p.nexus_sub));

    wait_live(&publisher, &subscriber);

    for _ in 0..100 {
        publisher.send("firehose", b"burst").expect("send");
    }

    // 10 queued + the one in flight is the ceiling; everything else must be
    // dropped at the full queue.
    std::thread::sleep(Duration::from_secs(4));
    let total = calls.load(Ordering::SeqCst);
    assert!(total >= 1, "no message was delivered");
    assert!(total <= 11, "expected at most 11 callbacks, got {}", total);

    publisher.stop();
    subscriber.stop();
    nexus.stop();
}

// S5: beacon-driven discovery, nexus death and reattachment after restart.
#[test]
fn test_nexus_restart_reattach() {
    let p = ports(18080);
    let injector = UdpSocket::bind("127.0.0.1:0").expect("bind injector");
    let beacon_wire = |id: &str| format!("{} {} {}", p.nexus_pub, p.nexus_sub, id);
    let inject = |wire: &str| {
        injector
            .send_to(wire.as_bytes(), loopback(p.sub_beacon))
            .expect("inject to subscriber");
        injector
            .send_to(wire.as_bytes(), loopback(p.pub_beacon))
            .expect("inject to publisher");
    };

    let nexus = start_nexus(&p, Some("aaaa1111"));

    let subscriber = Subscriber::new(SubscriberConfig {
        beacon_port: p.sub_beacon,
        queue_capacity: 10_000,
    })
    .expect("subscriber");
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    subscriber
        .subscribe(
            "restart.topic",
            FnHandler::new(move |_payload, _topic| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("subscribe");

    let publisher = Publisher::new(PublisherConfig {
        beacon_port: p.pub_beacon,
    })
    .expect("publisher");

    // Attach both endpoints through the discovery path.
    let deadline = Instant::now() + Duration::from_secs(10);
    while count.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "initial attach did not happen");
        inject(&beacon_wire("aaaa1111"));
        publisher.send("restart.topic", b"first").expect("send");
        std::thread::sleep(Duration::from_millis(100));
    }

    // Kill the nexus and bring up a replacement with a fresh identifier.
    nexus.stop();
    drop(nexus);
    let baseline = count.load(Ordering::SeqCst);
    let restarted = start_nexus(&p, Some("bbbb2222"));

    let deadline = Instant::now() + Duration::from_secs(10);
    while count.load(Ordering::SeqCst) == baseline {
        assert!(Instant::now() < deadline, "reattach did not happen");
        inject(&beacon_wire("bbbb2222"));
        publisher.send("restart.topic", b"second").expect("send");
        std::thread::sleep(Duration::from_millis(100));
    }

    publisher.stop();
    subscriber.stop();
    restarted.stop();
}

// S6: snapshot logger records every payload as one gzip JSONL line.
#[test]
fn test_snapshot_logger_end_to_end() {
    use std::io::{BufRead, BufReader};

    let p = ports(18100);
    let nexus = start_nexus(&p, None);

    let logger = SnapshotLogger::new(
        "snapshot",
        SubscriberConfig {
            beacon_port: p.sub_beacon,
            queue_capacity: 10_000,
        },
        None,
    )
    .expect("logger");
    logger.add_static_nexus(loopback(p.nexus_pub));

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run_snapshot.jsonl.gz");
    let written = logger.start(Some(path.as_path())).expect("start logger");
    assert_eq!(written, path);

    let publisher = Publisher::new(PublisherConfig {
        beacon_port: p.pub_beacon,
    })
    .expect("publisher");
    publisher.add_static_nexus(loopback(p.nexus_sub));

    // The logger's filter is installed once its link is up; give the broker
    // a moment, then stream the records.
    std::thread::sleep(Duration::from_secs(1));
    for i in 0..1000 {
        publisher
            .send("snapshot", format!("{{\"i\": {}}}", i).as_bytes())
            .expect("send");
    }

    // Let the pipeline drain before raising the stop sentinel.
    std::thread::sleep(Duration::from_secs(2));
    logger.stop();
    publisher.stop();
    nexus.stop();

    let file = std::fs::File::open(&path).expect("open snapshot");
    let reader = BufReader::new(flate2::read::GzDecoder::new(file));
    let mut values = Vec::new();
    for line in reader.lines() {
        let line = line.expect("read line");
        let value: serde_json::Value = serde_json::from_str(&line).expect("well-formed JSON");
        values.push(value["i"].as_i64().expect("integer field"));
    }

    assert_eq!(values.len(), 1000, "expected every record to be written");
    // In-order subsequence of 0..1000 with no drops expected here.
    let expected: Vec<i64> = (0..1000).collect();
    assert_eq!(values, expected);
}

// Two subscriptions sharing an upstream prefix, with the nexus attached
// after both: unsubscribing one must leave the shared broker filter alive
// for the other.
#[test]
fn test_shared_prefix_unsubscribe_keeps_filter() {
    let p = ports(18140);
    let nexus = start_nexus(&p, None);

    let subscriber = Subscriber::new(SubscriberConfig {
        beacon_port: p.sub_beacon,
        queue_capacity: 10_000,
    })
    .expect("subscriber");

    // Both patterns compute the upstream prefix "sensors".
    let exact_hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&exact_hits);
    subscriber
        .subscribe(
            "sensors",
            FnHandler::new(move |_payload, _topic| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("subscribe exact");
    let wildcard_topics: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&wildcard_topics);
    subscriber
        .subscribe(
            "sensors.#",
            FnHandler::new(move |_payload, topic| {
                sink.lock().push(topic.to_string());
            }),
        )
        .expect("subscribe wildcard");

    // Attach only now, so the link is preloaded from the prefix set.
    subscriber.add_static_nexus(loopback(p.nexus_pub));

    let publisher = Publisher::new(PublisherConfig {
        beacon_port: p.pub_beacon,
    })
    .expect("publisher");
    publisher.add_static_nexus(loopback(p.nexus_sub));

    wait_live(&publisher, &subscriber);

    // Dropping one of the two shared-prefix subscriptions must not tear the
    // "sensors" filter down at the broker.
    subscriber.unsubscribe("sensors").expect("unsubscribe");
    std::thread::sleep(Duration::from_millis(300));

    publisher.send("sensors.imu", b"still flowing").expect("send");
    assert!(
        wait_until(Duration::from_secs(5), || {
            wildcard_topics.lock().iter().any(|t| t == "sensors.imu")
        }),
        "wildcard subscription stopped receiving after the shared-prefix unsubscribe"
    );
    assert_eq!(exact_hits.load(Ordering::SeqCst), 0);

    publisher.stop();
    subscriber.stop();
    nexus.stop();
}

// Shutdown liveness: workers terminate within one poll interval plus the
// in-flight callback.
#[test]
fn test_shutdown_liveness() {
    let p = ports(18120);
    let nexus = start_nexus(&p, None);

    let subscriber = Subscriber::new(SubscriberConfig {
        beacon_port: p.sub_beacon,
        queue_capacity: 64,
    })
    .expect("subscriber");
    subscriber
        .subscribe("anything.#", FnHandler::new(|_, _| {}))
        .expect("subscribe");
    subscriber.add_static_nexus(loopback(p.nexus_pub));

    let publisher = Publisher::new(PublisherConfig {
        beacon_port: p.pub_beacon,
    })
    .expect("publisher");
    publisher.add_static_nexus(loopback(p.nexus_sub));

    std::thread::sleep(Duration::from_millis(300));

    let start = Instant::now();
    publisher.stop();
    subscriber.stop();
    nexus.stop();
    assert!(
        start.elapsed() < Duration::from_secs(3),
        "shutdown took {:?}",
        start.elapsed()
    );
}
