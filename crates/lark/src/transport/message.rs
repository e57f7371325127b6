// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker wire messages.
//!
//! Every frame body on a broker link is one wire message, tagged with a
//! leading kind byte:
//!
//! ```text
//! 0x00  UNSUBSCRIBE  body = prefix (UTF-8)
//! 0x01  SUBSCRIBE    body = prefix (UTF-8)
//! 0x02  DATA         body = [topic_len: u32 BE][topic (UTF-8)][payload]
//! ```
//!
//! `SUBSCRIBE`/`UNSUBSCRIBE` flow from subscribers to the nexus and carry a
//! byte-prefix filter over the topic of subsequent `DATA` messages (the empty
//! prefix subscribes to everything). `DATA` carries the two-part message
//! unit: the concrete topic and an opaque payload.
//!
//! Decoding is total over untrusted input: any malformed body decodes to
//! `None` and the caller drops the message silently.

const KIND_UNSUBSCRIBE: u8 = 0x00;
const KIND_SUBSCRIBE: u8 = 0x01;
const KIND_DATA: u8 = 0x02;

/// One decoded wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Remove a byte-prefix subscription filter.
    Unsubscribe(String),
    /// Add a byte-prefix subscription filter.
    Subscribe(String),
    /// A published message: concrete topic plus opaque payload.
    Data { topic: String, payload: Vec<u8> },
}

impl WireMessage {
    /// Encode into a frame body.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            WireMessage::Unsubscribe(prefix) => {
                let mut body = Vec::with_capacity(1 + prefix.len());
                body.push(KIND_UNSUBSCRIBE);
                body.extend_from_slice(prefix.as_bytes());
                body
            }
            WireMessage::Subscribe(prefix) => {
                let mut body = Vec::with_capacity(1 + prefix.len());
                body.push(KIND_SUBSCRIBE);
                body.extend_from_slice(prefix.as_bytes());
                body
            }
            WireMessage::Data { topic, payload } => {
                let mut body = Vec::with_capacity(5 + topic.len() + payload.len());
                body.push(KIND_DATA);
                body.extend_from_slice(&(topic.len() as u32).to_be_bytes());
                body.extend_from_slice(topic.as_bytes());
                body.extend_from_slice(payload);
                body
            }
        }
    }

    /// Encode a `DATA` message without building the struct first.
    pub fn encode_data(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(5 + topic.len() + payload.len());
        body.push(KIND_DATA);
        body.extend_from_slice(&(topic.len() as u32).to_be_bytes());
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload);
        body
    }

    /// Decode a frame body. Returns `None` for anything malformed.
    pub fn decode(body: &[u8]) -> Option<WireMessage> {
        let (&kind, rest) = body.split_first()?;
        match kind {
            KIND_UNSUBSCRIBE => {
                let prefix = std::str::from_utf8(rest).ok()?;
                Some(WireMessage::Unsubscribe(prefix.to_string()))
            }
            KIND_SUBSCRIBE => {
                let prefix = std::str::from_utf8(rest).ok()?;
                Some(WireMessage::Subscribe(prefix.to_string()))
            }
            KIND_DATA => {
                if rest.len() < 4 {
                    return None;
                }
                let topic_len =
                    u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
                let rest = &rest[4..];
                if rest.len() < topic_len {
                    return None;
                }
                let topic = std::str::from_utf8(&rest[..topic_len]).ok()?;
                Some(WireMessage::Data {
                    topic: topic.to_string(),
                    payload: rest[topic_len..].to_vec(),
                })
            }
            _ => None,
        }
    }

    /// Peek the topic bytes of an encoded `DATA` body without a full decode.
    ///
    /// The broker's fan-out path only needs the topic bytes for prefix
    /// filtering; the payload stays untouched.
    pub fn peek_data_topic(body: &[u8]) -> Option<&[u8]> {
        let (&kind, rest) = body.split_first()?;
        if kind != KIND_DATA || rest.len() < 4 {
            return None;
        }
        let topic_len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let rest = &rest[4..];
        if rest.len() < topic_len {
            return None;
        }
        Some(&rest[..topic_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_roundtrip() {
        let msg = WireMessage::Data {
            topic: "sensors.imu.acc".to_string(),
            payload: vec![1, 2, 3, 0xFF],
        };
        let body = msg.encode();
        assert_eq!(WireMessage::decode(&body), Some(msg));
    }

    #[test]
    fn test_subscribe_roundtrip() {
        let msg = WireMessage::Subscribe("sensors".to_string());
        assert_eq!(WireMessage::decode(&msg.encode()), Some(msg));
        let msg = WireMessage::Unsubscribe(String::new());
        assert_eq!(WireMessage::decode(&msg.encode()), Some(msg));
    }

    #[test]
    fn test_encode_data_matches_struct_encode() {
        let msg = WireMessage::Data {
            topic: "t".to_string(),
            payload: b"payload".to_vec(),
        };
        assert_eq!(msg.encode(), WireMessage::encode_data("t", b"payload"));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        // Empty body, unknown kind, truncated topic length, short topic.
        assert_eq!(WireMessage::decode(&[]), None);
        assert_eq!(WireMessage::decode(&[0x7F, 1, 2]), None);
        assert_eq!(WireMessage::decode(&[KIND_DATA, 0, 0]), None);
        assert_eq!(WireMessage::decode(&[KIND_DATA, 0, 0, 0, 9, b'x']), None);
    }

    #[test]
    fn test_decode_rejects_invalid_utf8_topic() {
        let mut body = vec![KIND_DATA];
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(&[0xFF, 0xFE]);
        assert_eq!(WireMessage::decode(&body), None);
    }

    #[test]
    fn test_peek_data_topic() {
        let body = WireMessage::encode_data("foo.bar", b"xyz");
        assert_eq!(WireMessage::peek_data_topic(&body), Some(b"foo.bar".as_slice()));
        assert_eq!(
            WireMessage::peek_data_topic(&WireMessage::Subscribe("p".into()).encode()),
            None
        );
    }

    #[test]
    fn test_empty_payload_allowed() {
        let body = WireMessage::encode_data("t", b"");
        match WireMessage::decode(&body) {
            Some(WireMessage::Data { topic, payload }) => {
                assert_eq!(topic, "t");
                assert!(payload.is_empty());
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }
}
