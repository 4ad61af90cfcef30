//! In-memory broker used by the integration tests.
//!
//! Keeps per-partition append-only logs with a fetch cursor per partition,
//! so one `MockBroker` can back a producer and a consumer in the same test.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use strom_client::{
    BrokerClient, DeliveryAck, Error, Result, Subscription, TopicMetadata,
};
use strom_core::{hash, Message, TopicPartition};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    value: Bytes,
}

#[derive(Debug, Default)]
struct Inner {
    /// topic -> one log per partition
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// next fetch index per partition
    cursors: HashMap<TopicPartition, usize>,
    committed: HashMap<TopicPartition, u64>,
}

#[derive(Debug, Default)]
pub struct MockBroker {
    inner: Mutex<Inner>,
    pub connected: AtomicBool,
    pub metadata_fetches: AtomicU64,
    pub commit_calls: AtomicU64,
    pub fail_commits: AtomicBool,
    pub fail_fetches: AtomicBool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_topic(&self, topic: &str, partitions: u32) {
        let mut inner = self.inner.lock().await;
        inner
            .topics
            .insert(topic.to_string(), vec![Vec::new(); partitions as usize]);
    }

    /// Raw values of one partition's log, in append order.
    pub async fn log(&self, topic: &str, partition: u32) -> Vec<Bytes> {
        let inner = self.inner.lock().await;
        inner
            .topics
            .get(topic)
            .and_then(|logs| logs.get(partition as usize))
            .map(|log| log.iter().map(|r| r.value.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn log_len(&self, topic: &str, partition: u32) -> usize {
        self.log(topic, partition).await.len()
    }

    /// Offset the broker has recorded as committed, if any.
    pub async fn committed(&self, topic: &str, partition: u32) -> Option<u64> {
        let inner = self.inner.lock().await;
        inner
            .committed
            .get(&TopicPartition::new(topic, partition))
            .copied()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn fetch_batch(
        &self,
        subscription: &Subscription,
        max_messages: usize,
    ) -> Result<Vec<Message>> {
        if self.fail_fetches.load(Ordering::Relaxed) {
            return Err(Error::Transport("fetch refused".to_string()));
        }

        let mut inner = self.inner.lock().await;
        let mut batch = Vec::new();

        // Round-robin one message per partition per pass, so multi-partition
        // topics interleave inside a batch.
        let mut progressed = true;
        while progressed && batch.len() < max_messages {
            progressed = false;
            for topic in &subscription.topics {
                let partition_count = match inner.topics.get(topic) {
                    Some(logs) => logs.len(),
                    None => continue,
                };
                for partition in 0..partition_count {
                    if batch.len() >= max_messages {
                        break;
                    }
                    let tp = TopicPartition::new(topic.clone(), partition as u32);
                    let cursor = inner.cursors.get(&tp).copied().unwrap_or(0);
                    let record = inner.topics[topic][partition].get(cursor).cloned();
                    if let Some(record) = record {
                        inner.cursors.insert(tp, cursor + 1);
                        let mut message =
                            Message::new(topic.clone(), partition as u32, cursor as u64, record.value);
                        if let Some(key) = record.key {
                            message = message.with_key(key);
                        }
                        batch.push(message);
                        progressed = true;
                    }
                }
            }
        }

        Ok(batch)
    }

    async fn send(
        &self,
        topic: &str,
        partition: Option<u32>,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<DeliveryAck> {
        let mut inner = self.inner.lock().await;
        let logs = inner
            .topics
            .get_mut(topic)
            .ok_or_else(|| Error::Metadata(format!("unknown topic: {topic}")))?;

        let partition = match partition {
            Some(p) => p,
            // The default partitioner: key hash when present, else partition 0.
            None => match &key {
                Some(key) => hash::murmur2_partition(key, logs.len() as u32),
                None => 0,
            },
        };
        let log = logs
            .get_mut(partition as usize)
            .ok_or_else(|| Error::Metadata(format!("unknown partition: {topic}/{partition}")))?;
        log.push(StoredRecord { key, value });

        Ok(DeliveryAck {
            topic: topic.to_string(),
            partition,
            offset: (log.len() - 1) as u64,
        })
    }

    async fn commit_offsets(
        &self,
        offsets: &HashMap<TopicPartition, u64>,
        _sync: bool,
    ) -> Result<()> {
        self.commit_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_commits.load(Ordering::Relaxed) {
            return Err(Error::Transport("commit refused".to_string()));
        }

        let mut inner = self.inner.lock().await;
        for (tp, offset) in offsets {
            let entry = inner.committed.entry(tp.clone()).or_insert(0);
            *entry = (*entry).max(*offset);
        }
        Ok(())
    }

    async fn fetch_topic_metadata(&self, topic: &str) -> Result<TopicMetadata> {
        self.metadata_fetches.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.lock().await;
        match inner.topics.get(topic) {
            Some(logs) => Ok(TopicMetadata {
                name: topic.to_string(),
                partition_count: logs.len() as u32,
            }),
            None => Err(Error::Metadata(format!("unknown topic: {topic}"))),
        }
    }

    async fn fetch_high_water_mark(&self, topic: &str, partition: u32) -> Result<u64> {
        let inner = self.inner.lock().await;
        inner
            .topics
            .get(topic)
            .and_then(|logs| logs.get(partition as usize))
            .map(|log| log.len() as u64)
            .ok_or_else(|| Error::Metadata(format!("unknown partition: {topic}/{partition}")))
    }

    async fn assigned_partitions(&self, subscription: &Subscription) -> Result<Vec<TopicPartition>> {
        let inner = self.inner.lock().await;
        let mut assigned = Vec::new();
        for topic in &subscription.topics {
            if let Some(logs) = inner.topics.get(topic) {
                for partition in 0..logs.len() {
                    assigned.push(TopicPartition::new(topic.clone(), partition as u32));
                }
            }
        }
        Ok(assigned)
    }

    async fn close(&self, _flush: bool) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }
}

/// Poll `cond` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
