//! Topic → partition-count cache.
//!
//! Metadata lookups are cheap but not free; partition counts are stable
//! enough that one successful lookup per topic is all a process needs. The
//! cache never expires entries implicitly — an entry lives until
//! [`discard`](PartitionCountCache::discard) drops it. Failed lookups are
//! **never** cached, so a topic that becomes available later is discoverable
//! without a restart. Concurrent misses for the same topic may both hit the
//! broker; the last successful write wins, which is harmless because
//! metadata fetches are idempotent.

use crate::broker::BrokerClient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Sentinel returned when the partition count cannot be determined.
pub const UNKNOWN_PARTITION_COUNT: i64 = -1;

/// A cached partition count and when it was learned.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PartitionCountEntry {
    pub count: u32,
    pub cached_at: DateTime<Utc>,
}

/// Memoized topic → partition-count lookups.
#[derive(Debug, Default)]
pub struct PartitionCountCache {
    entries: RwLock<HashMap<String, PartitionCountEntry>>,
}

impl PartitionCountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partition count for `topic`.
    ///
    /// Cache hits return without a network call. Misses query the broker's
    /// topic metadata; success populates the cache, failure returns
    /// [`UNKNOWN_PARTITION_COUNT`] and caches nothing.
    pub async fn count_of<B: BrokerClient>(&self, broker: &B, topic: &str) -> i64 {
        if let Some(entry) = self.entries.read().await.get(topic) {
            return entry.count as i64;
        }

        match broker.fetch_topic_metadata(topic).await {
            Ok(metadata) => {
                let count = metadata.partition_count;
                self.entries.write().await.insert(
                    topic.to_string(),
                    PartitionCountEntry {
                        count,
                        cached_at: Utc::now(),
                    },
                );
                count as i64
            }
            Err(e) => {
                debug!(topic = %topic, error = %e, "Partition count lookup failed, not caching");
                UNKNOWN_PARTITION_COUNT
            }
        }
    }

    /// Read-only view of the cache, for diagnostics and tests.
    pub async fn snapshot(&self) -> HashMap<String, PartitionCountEntry> {
        self.entries.read().await.clone()
    }

    /// Explicitly drop one entry. Returns whether it existed. This is the
    /// only way an entry leaves the cache.
    pub async fn discard(&self, topic: &str) -> bool {
        self.entries.write().await.remove(topic).is_some()
    }
}
