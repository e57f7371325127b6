// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic grammar and wildcard matching.
//!
//! A topic is a non-empty dot-delimited string. Each segment is either a run
//! of characters excluding `.`, `*`, `#`, or a wildcard token occupying the
//! whole segment: `*` matches exactly one segment, `#` matches zero or more.
//! A topic with no wildcard segment is *concrete*; published messages carry
//! concrete topics, subscriptions may carry patterns.
//!
//! Patterns compile to a segment list matched recursively against concrete
//! topics, so `sensors.#` accepts `sensors`, `sensors.imu` and
//! `sensors.imu.acc` but rejects `sensorsX` and `other.sensors`.

use crate::config::{TOPIC_DELIM, WILDCARD_MANY, WILDCARD_ONE};
use crate::error::{Error, Result};

/// Validate a topic or pattern string.
///
/// Accepted iff the string matches `SEG ('.' SEG)*` where
/// `SEG = [^.*#]+ | '*' | '#'`. In particular: no empty segments, no
/// leading/trailing/adjacent delimiters, and wildcard tokens must occupy an
/// entire segment (`foo*` is rejected).
pub fn validate(topic: &str) -> bool {
    if topic.is_empty() {
        return false;
    }
    topic.split(TOPIC_DELIM).all(valid_segment)
}

fn valid_segment(seg: &str) -> bool {
    if seg.is_empty() {
        return false;
    }
    if seg.len() == WILDCARD_ONE.len_utf8() {
        let c = seg.chars().next();
        if c == Some(WILDCARD_ONE) || c == Some(WILDCARD_MANY) {
            return true;
        }
    }
    !seg.contains([TOPIC_DELIM, WILDCARD_ONE, WILDCARD_MANY])
}

/// True if the (valid) topic contains at least one wildcard segment.
pub fn is_pattern(topic: &str) -> bool {
    topic
        .split(TOPIC_DELIM)
        .any(|s| s == "*" || s == "#")
}

/// Validate a topic and additionally reject wildcard segments.
///
/// Published messages must carry concrete topics; a pattern on the wire
/// would never hit the exact-topic dispatch step at any subscriber.
pub fn validate_concrete(topic: &str) -> Result<()> {
    if !validate(topic) {
        return Err(Error::InvalidTopic(topic.to_string()));
    }
    if is_pattern(topic) {
        return Err(Error::PatternNotConcrete(topic.to_string()));
    }
    Ok(())
}

/// Compute the coarse upstream subscription prefix for a pattern: the
/// longest concrete prefix before the first wildcard segment, with the
/// trailing delimiter stripped.
///
/// For a pattern whose first segment is a wildcard this is the empty string,
/// i.e. a subscribe-all upstream filter. That is correct but expensive on
/// busy networks: every message crosses the wire and is filtered client-side.
pub fn upstream_prefix(pattern: &str) -> &str {
    let mut end = 0usize;
    for seg in pattern.split(TOPIC_DELIM) {
        if seg == "*" || seg == "#" {
            break;
        }
        if end > 0 {
            end += TOPIC_DELIM.len_utf8();
        }
        end += seg.len();
    }
    &pattern[..end]
}

/// One compiled pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    One,
    Many,
}

/// Compiled wildcard matcher answering "does concrete topic T match
/// pattern P?".
#[derive(Debug, Clone)]
pub struct TopicMatcher {
    segments: Vec<Segment>,
}

impl TopicMatcher {
    /// Compile a pattern. The pattern must pass [`validate`].
    pub fn compile(pattern: &str) -> Result<Self> {
        if !validate(pattern) {
            return Err(Error::InvalidTopic(pattern.to_string()));
        }
        let segments = pattern
            .split(TOPIC_DELIM)
            .map(|seg| match seg {
                "*" => Segment::One,
                "#" => Segment::Many,
                lit => Segment::Literal(lit.to_string()),
            })
            .collect();
        Ok(Self { segments })
    }

    /// Match a concrete topic against the compiled pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let segs: Vec<&str> = topic.split(TOPIC_DELIM).collect();
        Self::match_from(&self.segments, &segs)
    }

    fn match_from(pattern: &[Segment], segs: &[&str]) -> bool {
        match pattern.first() {
            None => segs.is_empty(),
            Some(Segment::Literal(lit)) => {
                segs.first() == Some(&lit.as_str()) && Self::match_from(&pattern[1..], &segs[1..])
            }
            Some(Segment::One) => {
                !segs.is_empty() && Self::match_from(&pattern[1..], &segs[1..])
            }
            // `#` absorbs zero or more segments; try every split point.
            Some(Segment::Many) => {
                (0..=segs.len()).any(|k| Self::match_from(&pattern[1..], &segs[k..]))
            }
        }
    }
}
