use crate::serde_utils::{bytes_serde, option_bytes_serde};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single fetched record. Immutable once it leaves the broker client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Topic the record was fetched from
    pub topic: String,

    /// Partition number
    pub partition: u32,

    /// Offset within the partition, monotonic per partition
    pub offset: u64,

    /// Record key (optional, used for partitioning)
    #[serde(with = "option_bytes_serde")]
    pub key: Option<Bytes>,

    /// Record payload
    #[serde(with = "bytes_serde")]
    pub value: Bytes,

    /// Broker-side timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message for the given log position.
    pub fn new(topic: impl Into<String>, partition: u32, offset: u64, value: Bytes) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Attach a key.
    pub fn with_key(mut self, key: Bytes) -> Self {
        self.key = Some(key);
        self
    }

    /// The (topic, partition) identity of this message.
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(&self.topic, self.partition)
    }
}

/// A (topic, partition) pair — the unit of ordering and offset accounting.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_partition_identity() {
        let msg = Message::new("events", 3, 17, Bytes::from_static(b"x"));
        assert_eq!(msg.topic_partition(), TopicPartition::new("events", 3));
        assert_eq!(msg.topic_partition().to_string(), "events/3");
    }

    #[test]
    fn key_attachment() {
        let msg = Message::new("events", 0, 0, Bytes::from_static(b"v"))
            .with_key(Bytes::from_static(b"k"));
        assert_eq!(msg.key.as_deref(), Some(b"k".as_slice()));
    }
}
