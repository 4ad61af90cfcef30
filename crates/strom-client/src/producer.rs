//! Producer facade.
//!
//! Wraps the raw send path with the structured publish envelope, key-hash
//! partition selection backed by the partition-count cache, and throughput
//! accounting. Raw byte sends stay available next to the envelope helpers.

use crate::analytics::{
    spawn_throughput_task, AnalyticsConfig, AnalyticsHandle, AnalyticsSnapshot,
};
use crate::broker::{BrokerClient, DeliveryAck, TopicMetadata};
use crate::error::Result;
use crate::events::ProducerEvent;
use crate::health::{self, HealthStatus};
use crate::partition_cache::{PartitionCountCache, PartitionCountEntry};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strom_core::{hash, Envelope};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::debug;

#[derive(Debug, Default)]
struct ProducerStats {
    total_published: AtomicU64,
    envelopes_published: AtomicU64,
    send_errors: AtomicU64,
}

/// Point-in-time view of a producer's counters.
#[derive(Debug, Clone, Serialize)]
pub struct ProducerStatsSnapshot {
    /// Records acknowledged by the broker, raw and envelope alike
    pub total_published: u64,
    /// Acknowledged records that carried a publish envelope
    pub envelopes_published: u64,
    pub send_errors: u64,
}

/// High-level producer over a raw broker client.
pub struct Producer<B: BrokerClient> {
    broker: Arc<B>,
    cache: PartitionCountCache,
    stats: Arc<ProducerStats>,
    last_snapshot: Arc<RwLock<Option<AnalyticsSnapshot>>>,
    event_tx: mpsc::UnboundedSender<ProducerEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<ProducerEvent>>,
    analytics: Option<AnalyticsHandle>,
}

impl<B: BrokerClient> Producer<B> {
    pub fn new(broker: Arc<B>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            broker,
            cache: PartitionCountCache::new(),
            stats: Arc::new(ProducerStats::default()),
            last_snapshot: Arc::new(RwLock::new(None)),
            event_tx,
            event_rx: Some(event_rx),
            analytics: None,
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.broker.connect().await
    }

    /// Take the event receiver. Yields `Some` exactly once.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<ProducerEvent>> {
        self.event_rx.take()
    }

    /// Send one raw record, letting the broker pick the partition.
    pub async fn send(&self, topic: &str, value: impl Into<Bytes>) -> Result<DeliveryAck> {
        self.dispatch(topic, None, None, value.into()).await
    }

    /// Send a `publish` envelope. See [`Self::send_envelope`] for partition
    /// and record-key resolution.
    pub async fn buffer_format_publish(
        &self,
        topic: &str,
        id: &str,
        payload: serde_json::Value,
        version: i64,
        partition_key: Option<&str>,
        partition: Option<u32>,
    ) -> Result<DeliveryAck> {
        self.send_envelope(topic, Envelope::publish(id, payload, version), partition_key, partition)
            .await
    }

    /// Send an `update` envelope.
    pub async fn buffer_format_update(
        &self,
        topic: &str,
        id: &str,
        payload: serde_json::Value,
        version: i64,
        partition_key: Option<&str>,
        partition: Option<u32>,
    ) -> Result<DeliveryAck> {
        self.send_envelope(topic, Envelope::update(id, payload, version), partition_key, partition)
            .await
    }

    /// Send an `unpublish` envelope.
    pub async fn buffer_format_unpublish(
        &self,
        topic: &str,
        id: &str,
        payload: serde_json::Value,
        version: i64,
        partition_key: Option<&str>,
        partition: Option<u32>,
    ) -> Result<DeliveryAck> {
        self.send_envelope(topic, Envelope::unpublish(id, payload, version), partition_key, partition)
            .await
    }

    /// Encode and send one envelope.
    ///
    /// Partition resolution: an explicit `partition` wins verbatim; else a
    /// `partition_key` is murmur2-hashed over the cached partition count;
    /// else (no key, or count unavailable) the broker's default partitioner
    /// decides. The record key is `partition_key` when given, the entity id
    /// otherwise, so revisions of one entity land on one partition.
    pub async fn send_envelope(
        &self,
        topic: &str,
        envelope: Envelope,
        partition_key: Option<&str>,
        partition: Option<u32>,
    ) -> Result<DeliveryAck> {
        let value = Bytes::from(envelope.to_bytes()?);
        let partition = match partition {
            Some(p) => Some(p),
            None => match partition_key {
                Some(key) => self.derive_partition(topic, key).await,
                None => None,
            },
        };
        let key = Bytes::from(
            partition_key
                .unwrap_or_else(|| envelope.body().id.as_str())
                .to_owned(),
        );

        let ack = self.dispatch(topic, partition, Some(key), value).await?;
        self.stats.envelopes_published.fetch_add(1, Ordering::Relaxed);
        Ok(ack)
    }

    async fn derive_partition(&self, topic: &str, key: &str) -> Option<u32> {
        let count = self.cache.count_of(&*self.broker, topic).await;
        if count > 0 {
            Some(hash::murmur2_partition(key.as_bytes(), count as u32))
        } else {
            debug!(topic, "Partition count unavailable, deferring to the default partitioner");
            None
        }
    }

    async fn dispatch(
        &self,
        topic: &str,
        partition: Option<u32>,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<DeliveryAck> {
        match self.broker.send(topic, partition, key, value).await {
            Ok(ack) => {
                // Counts acknowledged records, not attempts.
                self.stats.total_published.fetch_add(1, Ordering::Relaxed);
                Ok(ack)
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                let _ = self.event_tx.send(ProducerEvent::Error(e.replicate()));
                Err(e)
            }
        }
    }

    /// Look the topic's metadata up at the broker, bypassing the cache.
    pub async fn topic_metadata(&self, topic: &str) -> Result<TopicMetadata> {
        self.broker.fetch_topic_metadata(topic).await
    }

    /// Cached partition count for `topic`, fetching on a miss. Returns -1
    /// when the broker cannot resolve the topic; failures are not cached.
    pub async fn partition_count_of_topic(&self, topic: &str) -> i64 {
        self.cache.count_of(&*self.broker, topic).await
    }

    /// Current cache contents, with the time each count was stored.
    pub async fn stored_partition_counts(&self) -> HashMap<String, PartitionCountEntry> {
        self.cache.snapshot().await
    }

    /// Drop one topic's cached count, forcing a refetch on next use.
    pub async fn discard_partition_count(&self, topic: &str) -> bool {
        self.cache.discard(topic).await
    }

    pub fn stats(&self) -> ProducerStatsSnapshot {
        ProducerStatsSnapshot {
            total_published: self.stats.total_published.load(Ordering::Relaxed),
            envelopes_published: self.stats.envelopes_published.load(Ordering::Relaxed),
            send_errors: self.stats.send_errors.load(Ordering::Relaxed),
        }
    }

    /// Latest analytics snapshot, if analytics are enabled and at least one
    /// interval has elapsed.
    pub async fn analytics(&self) -> Option<AnalyticsSnapshot> {
        self.last_snapshot.read().await.clone()
    }

    pub async fn check_health(&self) -> HealthStatus {
        let stats = self.stats();
        let window = self.last_snapshot.read().await.as_ref().map(|s| s.delta);
        health::grade(
            self.analytics.is_some(),
            window,
            stats.total_published,
            stats.send_errors,
        )
    }

    /// Start the throughput timer. Producers carry no lag monitor; the only
    /// sampled series is acknowledged sends.
    pub fn enable_analytics(&mut self, config: AnalyticsConfig) {
        self.disable_analytics();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::clone(&self.stats);
        let throughput = spawn_throughput_task(
            move || stats.total_published.load(Ordering::Relaxed),
            config.analytics_interval,
            Arc::clone(&self.last_snapshot),
            self.event_tx.clone(),
            ProducerEvent::Analytics,
            shutdown_rx,
        );

        self.analytics = Some(AnalyticsHandle::new(shutdown_tx, vec![throughput]));
    }

    /// Cancel the throughput timer. No snapshot is emitted afterwards.
    pub fn disable_analytics(&mut self) {
        if let Some(handle) = self.analytics.take() {
            handle.disable();
        }
    }

    /// Flush buffered sends and tear the connection down.
    pub async fn close(&mut self) -> Result<()> {
        self.disable_analytics();
        self.broker.close(true).await
    }
}
