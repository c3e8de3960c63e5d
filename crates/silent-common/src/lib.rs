//! Wire-level building blocks for the silent chat protocol.
//!
//! This crate provides:
//! - The tagged message model ([`message`])
//! - Length-prefixed frame codec with soft/hard size limits ([`frame`])
//! - Certificate fingerprinting and pin checks ([`fingerprint`])
//! - Credential digest and decoy filler helpers ([`crypto`])
//! - Protocol constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod fingerprint;
pub mod frame;
pub mod message;
pub mod types;

pub use frame::{FrameCodec, FrameError, FrameLimits};
pub use message::Message;
