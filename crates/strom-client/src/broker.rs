//! The raw broker client seam.
//!
//! Everything below this trait — connection management, reconnects, the wire
//! protocol, partition assignment and rebalancing — belongs to the broker
//! client implementation. The orchestration layer only requires the fetch/
//! send/commit/metadata contract defined here.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use strom_core::{Message, TopicPartition};

/// What a consumer instance is subscribed to.
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    /// Topics to consume from
    pub topics: Vec<String>,
    /// Consumer group for offset bookkeeping
    pub group_id: String,
}

impl Subscription {
    pub fn new(topics: Vec<String>, group_id: impl Into<String>) -> Self {
        Self {
            topics,
            group_id: group_id.into(),
        }
    }

    /// Single-topic convenience constructor.
    pub fn topic(topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self::new(vec![topic.into()], group_id)
    }
}

/// Broker acknowledgment for an accepted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAck {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// Topic metadata as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub partition_count: u32,
}

/// Contract consumed from the raw broker client.
///
/// Implementations are expected to handle reconnection internally; transient
/// failures surface as `Err` and callers keep going. Offsets passed to
/// [`commit_offsets`](Self::commit_offsets) are next-to-consume positions
/// (highest acknowledged + 1).
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Establish the connection. A failure here is fatal to the session
    /// being started.
    async fn connect(&self) -> Result<()>;

    /// Fetch up to `max_messages` across the subscription's assigned
    /// partitions, in per-partition offset order. An empty result means no
    /// data is currently available.
    async fn fetch_batch(
        &self,
        subscription: &Subscription,
        max_messages: usize,
    ) -> Result<Vec<Message>>;

    /// Send one record. `partition: None` delegates to the broker's default
    /// partitioner. Resolves once the broker has accepted the record.
    async fn send(
        &self,
        topic: &str,
        partition: Option<u32>,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<DeliveryAck>;

    /// Commit consumed offsets. `sync` requests confirmation before the
    /// returned future resolves.
    async fn commit_offsets(
        &self,
        offsets: &HashMap<TopicPartition, u64>,
        sync: bool,
    ) -> Result<()>;

    /// Look up topic metadata (partition count).
    async fn fetch_topic_metadata(&self, topic: &str) -> Result<TopicMetadata>;

    /// Current high-water-mark (next offset to be written) of a partition.
    async fn fetch_high_water_mark(&self, topic: &str, partition: u32) -> Result<u64>;

    /// Partitions currently assigned for a subscription.
    async fn assigned_partitions(&self, subscription: &Subscription) -> Result<Vec<TopicPartition>>;

    /// Tear the connection down, optionally flushing buffered sends.
    async fn close(&self, flush: bool) -> Result<()>;
}
