//! Typed notification channels.
//!
//! Each consumer/producer instance owns one unbounded channel; the caller
//! takes the receiver once via `events()` and matches on the typed variants.
//! There is no string-keyed event dispatch — every notification carries its
//! own payload type.

use crate::analytics::AnalyticsSnapshot;
use crate::error::Error;

/// Notifications emitted by a consumer instance.
#[derive(Debug)]
pub enum ConsumerEvent {
    /// A commit succeeded; `messages` is the number of messages covered by
    /// this commit (since the previous one, not a running total).
    Commit { messages: u64 },
    /// Periodic throughput snapshot.
    Analytics(AnalyticsSnapshot),
    /// A non-fatal processing or transport error.
    Error(Error),
}

/// Notifications emitted by a producer instance.
#[derive(Debug)]
pub enum ProducerEvent {
    /// Periodic throughput snapshot.
    Analytics(AnalyticsSnapshot),
    /// A non-fatal send or transport error.
    Error(Error),
}
