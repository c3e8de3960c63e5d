//! Length-prefixed frame codec.
//!
//! Every frame is a 4-byte big-endian body length followed by exactly that
//! many bytes of JSON-encoded [`Message`]. Two limits apply on the way in:
//! a soft limit (also enforced when encoding) and an independent hard limit
//! that flags hostile or badly misconfigured peers.

use crate::message::Message;
use crate::types::{DEFAULT_HARD_MAX, DEFAULT_SOFT_MAX, LENGTH_PREFIX_LEN};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer declared a zero-length body.
    #[error("protocol violation: zero-length frame")]
    ZeroLength,
    /// Body length is above the soft limit.
    #[error("frame size {size} exceeds limit {max}")]
    SizeExceeded {
        /// Declared or encoded body size.
        size: usize,
        /// Limit that was exceeded.
        max: usize,
    },
    /// Declared length is above the hard limit.
    #[error("declared frame size {size} exceeds hard limit {max}, possible attack")]
    AttackSuspected {
        /// Declared body size.
        size: usize,
        /// Hard limit.
        max: usize,
    },
    /// The body is not a valid message.
    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),
    /// Underlying transport error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Soft and hard body-size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Enforced on encode and decode.
    pub soft_max: usize,
    /// Enforced on decode only.
    pub hard_max: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            soft_max: DEFAULT_SOFT_MAX,
            hard_max: DEFAULT_HARD_MAX,
        }
    }
}

impl FrameLimits {
    /// Creates limits from explicit values.
    #[must_use]
    pub const fn new(soft_max: usize, hard_max: usize) -> Self {
        Self { soft_max, hard_max }
    }

    /// Validates a length read from a frame prefix.
    ///
    /// The hard limit is checked on its own so a soft limit set too high
    /// still cannot admit an oversized frame.
    ///
    /// # Errors
    ///
    /// [`FrameError::ZeroLength`], [`FrameError::AttackSuspected`] or
    /// [`FrameError::SizeExceeded`].
    pub fn check_declared(&self, len: usize) -> Result<(), FrameError> {
        if len == 0 {
            return Err(FrameError::ZeroLength);
        }
        if len > self.hard_max {
            return Err(FrameError::AttackSuspected {
                size: len,
                max: self.hard_max,
            });
        }
        if len > self.soft_max {
            return Err(FrameError::SizeExceeded {
                size: len,
                max: self.soft_max,
            });
        }
        Ok(())
    }
}

/// Serializes `msg` into a complete frame (prefix + body).
///
/// # Errors
///
/// [`FrameError::SizeExceeded`] if the body is larger than `max_size` or
/// than a 4-byte prefix can describe.
///
/// # Examples
///
/// ```
/// use silent_common::frame::encode_message;
/// use silent_common::Message;
///
/// let bytes = encode_message(&Message::chat("ann", "hello"), 1024).unwrap();
/// let len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
/// assert_eq!(len, bytes.len() - 4);
/// ```
pub fn encode_message(msg: &Message, max_size: usize) -> Result<Vec<u8>, FrameError> {
    let body = serialize_body(msg, max_size)?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + body.len());
    out.extend_from_slice(&prefix_for(body.len())?);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parses a frame body (without its prefix).
///
/// # Errors
///
/// [`FrameError::Decode`] if the body is not a valid message.
pub fn decode_body(body: &[u8]) -> Result<Message, FrameError> {
    Ok(serde_json::from_slice(body)?)
}

fn serialize_body(msg: &Message, max_size: usize) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > max_size {
        return Err(FrameError::SizeExceeded {
            size: body.len(),
            max: max_size,
        });
    }
    Ok(body)
}

fn prefix_for(len: usize) -> Result<[u8; LENGTH_PREFIX_LEN], FrameError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| FrameError::SizeExceeded {
            size: len,
            max: u32::MAX as usize,
        })
}

/// `tokio_util` codec for [`Message`] frames.
///
/// Decoding is incremental: a partially received frame stays in the read
/// buffer, so a read abandoned by a timeout can be resumed later without
/// losing stream alignment. Oversized prefixes are rejected as soon as the
/// four length bytes arrive, before any of the body is awaited.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    limits: FrameLimits,
}

impl FrameCodec {
    /// Creates a codec enforcing `limits`.
    #[must_use]
    pub const fn new(limits: FrameLimits) -> Self {
        Self { limits }
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_LEN]);
        let len = u32::from_be_bytes(prefix) as usize;
        self.limits.check_declared(len)?;

        let total = LENGTH_PREFIX_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        let body = src.split_to(len);
        decode_body(&body).map(Some)
    }
}

impl Encoder<&Message> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, msg: &Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body = serialize_body(msg, self.limits.soft_max)?;
        let prefix = prefix_for(body.len())?;
        dst.reserve(LENGTH_PREFIX_LEN + body.len());
        dst.put_slice(&prefix);
        dst.put_slice(&body);
        Ok(())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_message() -> impl Strategy<Value = Message> {
        prop_oneof![
            (".{0,32}", "[0-9a-f]{64}").prop_map(|(u, d)| Message::auth(&u, &d)),
            (any::<bool>(), proptest::option::of(".{0,64}"))
                .prop_map(|(success, error)| Message::AuthResult { success, error }),
            (".{0,32}", ".{0,512}", proptest::option::of("[0-9.]{7,15}")).prop_map(
                |(sender_name, text, sender_ip)| Message::Chat {
                    sender_name,
                    text,
                    sender_ip
                }
            ),
            "[a-zA-Z0-9]{1,19}".prop_map(Message::fake),
        ]
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrip(msg in arb_message()) {
            let limits = FrameLimits::default();
            let bytes = encode_message(&msg, limits.soft_max).unwrap();
            let mut buf = BytesMut::from(bytes.as_slice());
            let decoded = FrameCodec::new(limits).decode(&mut buf).unwrap();
            prop_assert_eq!(decoded, Some(msg));
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn encode_fails_iff_body_over_max(msg in arb_message(), max in 1usize..700) {
            let body_len = serde_json::to_vec(&msg).unwrap().len();
            let result = encode_message(&msg, max);
            prop_assert_eq!(result.is_err(), body_len > max);
        }

        #[test]
        fn declared_length_classification(
            len in 0usize..4096,
            soft in 1usize..2048,
            hard in 1usize..2048,
        ) {
            let limits = FrameLimits::new(soft, hard);
            match limits.check_declared(len) {
                Err(FrameError::ZeroLength) => prop_assert_eq!(len, 0),
                Err(FrameError::AttackSuspected { .. }) => prop_assert!(len > hard),
                Err(FrameError::SizeExceeded { .. }) => prop_assert!(len > soft && len <= hard),
                Ok(()) => prop_assert!(len > 0 && len <= soft.min(hard)),
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
    }
}
