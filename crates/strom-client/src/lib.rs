//! High-level batch consumer and producer over a raw broker client.
//!
//! This crate is an orchestration layer: it owns no sockets and speaks no
//! wire protocol. Anything implementing [`BrokerClient`] plugs in underneath,
//! and the layer adds the semantics a raw client leaves out:
//!
//! - [`Consumer`] — batch fetch scheduling, bounded-concurrency callback
//!   dispatch with per-partition ordering, and batch-counted commit
//!   coordination with at-least-once semantics
//! - [`Producer`] — raw sends plus the structured publish/update/unpublish
//!   envelope with key-hash partition selection
//! - Analytics — periodic throughput snapshots and a per-partition lag
//!   monitor, surfaced on typed event channels and through [`HealthStatus`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strom_client::{Consumer, ConsumeOptions, Subscription};
//!
//! let broker = Arc::new(my_broker_client);
//! let mut consumer = Consumer::new(broker, Subscription::topic("events", "billing"));
//! consumer.connect().await?;
//! consumer
//!     .consume(
//!         |message| async move { handle(message).await },
//!         ConsumeOptions {
//!             batch_size: 100,
//!             commit_every_n_batch: 5,
//!             concurrency: 4,
//!             commit_sync: true,
//!         },
//!     )
//!     .await?;
//! ```

pub mod analytics;
pub mod broker;
mod commit;
pub mod consumer;
pub mod error;
pub mod events;
pub mod health;
pub mod partition_cache;
pub mod producer;

pub use analytics::{AnalyticsConfig, AnalyticsSnapshot, LagEntry};
pub use broker::{BrokerClient, DeliveryAck, Subscription, TopicMetadata};
pub use consumer::{ConsumeOptions, Consumer, ConsumerStatsSnapshot};
pub use error::{Error, Result};
pub use events::{ConsumerEvent, ProducerEvent};
pub use health::{HealthLevel, HealthStatus};
pub use partition_cache::{PartitionCountCache, PartitionCountEntry, UNKNOWN_PARTITION_COUNT};
pub use producer::{Producer, ProducerStatsSnapshot};

// Re-exported so callers can build and parse envelopes without a direct
// strom-core dependency.
pub use strom_core::{Envelope, EnvelopeBody, Message, TopicPartition};
