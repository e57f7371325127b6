// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing for the broker TCP links.
//!
//! TCP is a stream protocol without message boundaries, so every wire
//! message travels as:
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | message body      |
//! +----------------+-------------------+
//! ```
//!
//! The codec keeps partial-read state so it can be driven from non-blocking
//! sockets: call [`FrameCodec::decode`] whenever the socket is readable until
//! it returns `Ok(None)`.

use std::io::{self, Read};

/// Frame header size (4 bytes for length).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Length-prefix frame codec.
#[derive(Debug)]
pub struct FrameCodec {
    state: ReadState,
    buffer: Vec<u8>,
    /// Maximum allowed body size (anti-OOM guard on the length prefix).
    max_size: usize,
    frames_decoded: u64,
    frames_rejected: u64,
}

#[derive(Debug, Clone, Copy)]
enum ReadState {
    ReadingLength { bytes_read: usize },
    ReadingBody { expected_len: usize, bytes_read: usize },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::ReadingLength { bytes_read: 0 }
    }
}

impl FrameCodec {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: ReadState::default(),
            buffer: vec![0u8; FRAME_HEADER_SIZE],
            max_size,
            frames_decoded: 0,
            frames_rejected: 0,
        }
    }

    /// Number of frames successfully decoded on this link.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Number of frames rejected for exceeding the size cap.
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// True while a frame is partially read.
    pub fn is_partial(&self) -> bool {
        match self.state {
            ReadState::ReadingLength { bytes_read } => bytes_read > 0,
            ReadState::ReadingBody { .. } => true,
        }
    }

    /// Frame a message body: `[length: u32 BE][body]`.
    pub fn encode(body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        Self::encode_into(body, &mut frame);
        frame
    }

    /// Append a framed message body to an existing buffer.
    pub fn encode_into(body: &[u8], buf: &mut Vec<u8>) {
        let len = body.len() as u32;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(body);
    }

    /// Try to decode one complete frame body from the reader.
    ///
    /// Returns `Ok(Some(body))` on a complete frame, `Ok(None)` when the
    /// socket would block mid-frame, and `Err` on I/O errors, EOF, or an
    /// oversized length prefix.
    pub fn decode<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<Vec<u8>>> {
        loop {
            match self.state {
                ReadState::ReadingLength { bytes_read } => {
                    match reader.read(&mut self.buffer[bytes_read..FRAME_HEADER_SIZE]) {
                        Ok(0) => {
                            let msg = if bytes_read == 0 {
                                "connection closed"
                            } else {
                                "incomplete frame header"
                            };
                            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, msg));
                        }
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < FRAME_HEADER_SIZE {
                                self.state = ReadState::ReadingLength { bytes_read: total };
                                continue;
                            }
                            let len = u32::from_be_bytes([
                                self.buffer[0],
                                self.buffer[1],
                                self.buffer[2],
                                self.buffer[3],
                            ]) as usize;
                            if len > self.max_size {
                                self.frames_rejected += 1;
                                self.state = ReadState::default();
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    format!("frame too large: {} bytes (max {})", len, self.max_size),
                                ));
                            }
                            if len == 0 {
                                self.frames_decoded += 1;
                                self.state = ReadState::default();
                                return Ok(Some(Vec::new()));
                            }
                            self.buffer.resize(len, 0);
                            self.state = ReadState::ReadingBody {
                                expected_len: len,
                                bytes_read: 0,
                            };
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            self.state = ReadState::ReadingLength { bytes_read };
                            return Ok(None);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                ReadState::ReadingBody {
                    expected_len,
                    bytes_read,
                } => {
                    match reader.read(&mut self.buffer[bytes_read..expected_len]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "incomplete frame body",
                            ));
                        }
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < expected_len {
                                self.state = ReadState::ReadingBody {
                                    expected_len,
                                    bytes_read: total,
                                };
                                continue;
                            }
                            let body = self.buffer[..expected_len].to_vec();
                            self.frames_decoded += 1;
                            self.buffer.resize(FRAME_HEADER_SIZE, 0);
                            self.state = ReadState::default();
                            return Ok(Some(body));
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            self.state = ReadState::ReadingBody {
                                expected_len,
                                bytes_read,
                            };
                            return Ok(None);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}
