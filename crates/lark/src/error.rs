// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by lark operations.
//!
//! The fabric's propagation policy is deliberately narrow: anything that
//! would impede liveness of a whole endpoint is absorbed by the worker that
//! observed it (logged, then retried on the next poll or the worker exits).
//! Only topic validation failures and constructor-time I/O errors cross the
//! API boundary.

/// Errors surfaced by the public lark API.
#[derive(Debug)]
pub enum Error {
    /// Topic string fails the grammar (empty segment, leading/trailing
    /// delimiter, wildcard inside a segment, ...). Reported synchronously to
    /// the caller of `send` or `subscribe`; never propagates into the network.
    InvalidTopic(String),

    /// A wildcard pattern was passed where a concrete topic is required.
    PatternNotConcrete(String),

    /// A subscription for this exact pattern string already exists on the
    /// endpoint.
    DuplicateSubscription(String),

    /// No subscription registered for this pattern string.
    UnknownSubscription(String),

    /// Operation attempted in a state that does not allow it (e.g. `run()`
    /// on an already-stopped nexus).
    InvalidState(String),

    /// Failed to bind a socket to an address.
    BindFailed(String),

    /// I/O error with underlying cause.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTopic(topic) => write!(
                f,
                "invalid topic '{}': segments are non-empty runs without '.', '*' or '#', \
                 wildcards must occupy a whole segment",
                topic
            ),
            Error::PatternNotConcrete(topic) => {
                write!(f, "topic '{}' contains wildcard segments", topic)
            }
            Error::DuplicateSubscription(pattern) => {
                write!(f, "pattern '{}' is already subscribed", pattern)
            }
            Error::UnknownSubscription(pattern) => {
                write!(f, "no subscription for pattern '{}'", pattern)
            }
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::BindFailed(msg) => write!(f, "bind failed: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
