// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Snapshot logger: record every message on a pattern into a gzip-compressed
//! JSONL file.
//!
//! The logger owns a [`Subscriber`], funnels each received payload through an
//! unbounded FIFO into a writer thread, and appends one JSON line per record
//! to the output file. Mixing topics with different payload schemas into one
//! file works but produces a logically incoherent stream; keep snapshot
//! files per-topic.
//!
//! The file is opened in append mode, so repeated starts with the same
//! filename concatenate.

use crate::endpoint::{FnHandler, Subscriber, SubscriberConfig};
use crate::error::{Error, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Gzip compression level for snapshot files.
const COMPRESSION_LEVEL: u32 = 6;

/// Re-encode a raw payload into one JSON line. Returning `None` skips the
/// record (logged as a warning by the writer).
pub type EncodeFn = dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync;

/// Default encoding: parse the payload as JSON and re-serialize it compactly,
/// so malformed input never corrupts the file.
pub fn json_encode(payload: &[u8]) -> Option<Vec<u8>> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    serde_json::to_vec(&value).ok()
}

enum WriterItem {
    Record(Vec<u8>),
    Stop,
}

/// Snapshot recorder. See the module docs.
pub struct SnapshotLogger {
    subscriber: Subscriber,
    records_tx: Sender<WriterItem>,
    records_rx: Mutex<Option<Receiver<WriterItem>>>,
    encode: Mutex<Option<Arc<EncodeFn>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
}

impl SnapshotLogger {
    /// Create a logger subscribed to `pattern`. The pattern may contain
    /// wildcards as usual. `encode` defaults to [`json_encode`].
    pub fn new(
        pattern: &str,
        config: SubscriberConfig,
        encode: Option<Box<EncodeFn>>,
    ) -> Result<Self> {
        let subscriber = Subscriber::new(config)?;
        let (records_tx, records_rx) = unbounded();

        let tx = records_tx.clone();
        subscriber.subscribe(
            pattern,
            FnHandler::new(move |payload: &[u8], _topic: &str| {
                let _ = tx.send(WriterItem::Record(payload.to_vec()));
            }),
        )?;

        let encode: Arc<EncodeFn> = match encode {
            Some(f) => Arc::from(f),
            None => Arc::new(json_encode),
        };

        Ok(Self {
            subscriber,
            records_tx,
            records_rx: Mutex::new(Some(records_rx)),
            encode: Mutex::new(Some(encode)),
            writer: Mutex::new(None),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start recording. Blocks until at least one nexus has been discovered,
    /// then opens the file (append mode) and spawns the writer thread.
    ///
    /// Returns the path written to; when `file` is `None` the default
    /// `YYYY-MM-DDTHH-MM-SS_snapshot.jsonl.gz` in the current directory is
    /// used.
    pub fn start(&self, file: Option<&Path>) -> Result<PathBuf> {
        let mut writer_slot = self.writer.lock();
        if writer_slot.is_some() {
            return Err(Error::InvalidState("snapshot logger already started".into()));
        }
        let rx = self
            .records_rx
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidState("snapshot logger already stopped".into()))?;
        let encode = self
            .encode
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidState("snapshot logger already stopped".into()))?;

        // Defer until the fabric is reachable; a file of zero records from a
        // logger that never attached anywhere is worse than a late start.
        while self.subscriber.nexus_count() == 0 {
            if self.stopped.load(Ordering::Relaxed) {
                return Err(Error::InvalidState("stopped before a nexus was found".into()));
            }
            thread::sleep(Duration::from_millis(100));
        }

        // Discard anything queued before the start.
        while rx.try_recv().is_ok() {}

        let path = match file {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(default_file_name()),
        };
        let handle = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(Error::Io)?;
        let gz = GzEncoder::new(handle, Compression::new(COMPRESSION_LEVEL));

        log::info!("[snapshot] recording to {}", path.display());
        let worker = thread::Builder::new()
            .name("lark-snapshot".to_string())
            .spawn(move || writer_loop(&rx, gz, encode.as_ref()))
            .map_err(Error::Io)?;
        *writer_slot = Some(worker);

        Ok(path)
    }

    /// Stop recording: the writer drains the FIFO, finishes the gzip stream
    /// and closes the file; then the underlying subscriber shuts down.
    /// Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.records_tx.send(WriterItem::Stop);
        if let Some(handle) = self.writer.lock().take() {
            let _ = handle.join();
        }
        self.subscriber.stop();
        log::info!("[snapshot] stopped");
    }

    /// Known-nexus count of the underlying subscriber (start gating).
    pub fn nexus_count(&self) -> usize {
        self.subscriber.nexus_count()
    }

    /// Attach the underlying subscriber to a nexus at a known address,
    /// bypassing discovery.
    pub fn add_static_nexus(&self, target: std::net::SocketAddr) {
        self.subscriber.add_static_nexus(target);
    }
}

impl Drop for SnapshotLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

fn writer_loop(
    rx: &Receiver<WriterItem>,
    mut gz: GzEncoder<std::fs::File>,
    encode: &EncodeFn,
) {
    let mut written = 0u64;
    let mut skipped = 0u64;

    while let Ok(item) = rx.recv() {
        match item {
            WriterItem::Stop => break,
            WriterItem::Record(payload) => match encode(&payload) {
                Some(line) => {
                    if let Err(e) = gz.write_all(&line).and_then(|()| gz.write_all(b"\n")) {
                        log::error!("[snapshot] write failed: {}", e);
                        break;
                    }
                    written += 1;
                }
                None => {
                    skipped += 1;
                    log::warn!("[snapshot] skipping undecodable payload ({} bytes)", payload.len());
                }
            },
        }
    }

    match gz.finish() {
        Ok(mut file) => {
            let _ = file.flush();
        }
        Err(e) => log::error!("[snapshot] failed to finish gzip stream: {}", e),
    }
    log::info!("[snapshot] wrote {} records ({} skipped)", written, skipped);
}

/// Timestamped default filename in the current working directory.
fn default_file_name() -> String {
    format!(
        "{}_snapshot.jsonl.gz",
        chrono::Local::now().format("%Y-%m-%dT%H-%M-%S")
    )
}
