//! Shared leaf types for the strom client stack.
//!
//! This crate carries everything that both producers and consumers (and the
//! tests that exercise them) need to agree on:
//!
//! - [`Message`] — a fetched record with its topic/partition/offset identity
//! - [`Envelope`] — the structured publish/update/unpublish payload format
//! - [`hash`] — Kafka-compatible murmur2 partition hashing
//! - [`serde_utils`] — serde adapters for [`bytes::Bytes`] fields

pub mod envelope;
pub mod error;
pub mod hash;
pub mod message;
pub mod serde_utils;

pub use envelope::{Envelope, EnvelopeBody};
pub use error::{Error, Result};
pub use message::{Message, TopicPartition};
