//! Batch consumption engine.
//!
//! Provides a [`Consumer`] that turns a raw fetch/commit broker client into
//! a batch-oriented stream processor:
//! - Messages are fetched in batches of at most `batch_size`
//! - A user callback is driven per message with bounded concurrency
//! - Completed offsets flow to the commit coordinator, which flushes them
//!   every `commit_every_n_batch` completed batches
//! - Commits, analytics snapshots, and non-fatal errors are surfaced on a
//!   typed event channel
//!
//! # Example
//!
//! ```rust,ignore
//! use strom_client::{Consumer, ConsumeOptions, Subscription};
//!
//! let mut consumer = Consumer::new(broker, Subscription::topic("events", "group-1"));
//! consumer.connect().await?;
//!
//! let mut events = consumer.events().unwrap();
//! consumer
//!     .consume(
//!         |message| async move {
//!             println!("{}/{}@{}", message.topic, message.partition, message.offset);
//!             Ok(())
//!         },
//!         ConsumeOptions::default(),
//!     )
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     // ConsumerEvent::Commit / Analytics / Error
//! }
//! ```
//!
//! # Delivery semantics
//!
//! At-least-once: an offset is committed only after its callback has
//! completed, and a crash between processing and commit re-delivers. Within
//! one topic-partition, callbacks run in broker offset order even with
//! `concurrency > 1`; no ordering holds across partitions.

use crate::analytics::{
    compute_lag, spawn_lag_task, spawn_throughput_task, AnalyticsConfig, AnalyticsHandle,
    AnalyticsSnapshot, LagEntry,
};
use crate::broker::{BrokerClient, Subscription};
use crate::commit::{CommitCoordinator, OffsetLedger};
use crate::error::{Error, Result};
use crate::events::ConsumerEvent;
use crate::health::{self, HealthStatus};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strom_core::{Message, TopicPartition};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Delay before re-fetching when the broker had no data.
const IDLE_FETCH_DELAY: Duration = Duration::from_millis(50);
/// Backoff after a failed fetch; the raw client owns real reconnection.
const FETCH_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Per-session tuning. Fixed for the lifetime of one consume session;
/// values below 1 are clamped to 1.
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Maximum messages fetched and processed per batch
    pub batch_size: usize,
    /// Completed batches between commit flushes
    pub commit_every_n_batch: usize,
    /// Maximum callback invocations outstanding at once
    pub concurrency: usize,
    /// Block the next fetch until the broker confirms each commit
    pub commit_sync: bool,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            commit_every_n_batch: 1,
            concurrency: 1,
            commit_sync: false,
        }
    }
}

impl ConsumeOptions {
    fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.commit_every_n_batch = self.commit_every_n_batch.max(1);
        self.concurrency = self.concurrency.max(1);
        self
    }
}

/// Fetch-side counters, mutated by the session driver task.
#[derive(Debug, Default)]
pub(crate) struct ConsumerStats {
    pub(crate) total_incoming: AtomicU64,
    pub(crate) batches_processed: AtomicU64,
    pub(crate) commits: AtomicU64,
    pub(crate) callback_errors: AtomicU64,
    pub(crate) commit_errors: AtomicU64,
    pub(crate) transport_errors: AtomicU64,
}

/// Point-in-time view of a consumer's counters.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub total_incoming: u64,
    pub batches_processed: u64,
    pub commits: u64,
    pub callback_errors: u64,
    pub commit_errors: u64,
    pub transport_errors: u64,
}

impl ConsumerStatsSnapshot {
    /// All error counters combined.
    pub fn error_total(&self) -> u64 {
        self.callback_errors + self.commit_errors + self.transport_errors
    }
}

struct Session {
    shutdown: watch::Sender<bool>,
    commit_final: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Batch consumption scheduler over a raw broker client.
pub struct Consumer<B: BrokerClient> {
    broker: Arc<B>,
    subscription: Subscription,
    stats: Arc<ConsumerStats>,
    ledger: Arc<RwLock<OffsetLedger>>,
    lag_report: Arc<RwLock<Vec<LagEntry>>>,
    last_snapshot: Arc<RwLock<Option<AnalyticsSnapshot>>>,
    event_tx: mpsc::UnboundedSender<ConsumerEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<ConsumerEvent>>,
    session: Option<Session>,
    analytics: Option<AnalyticsHandle>,
}

impl<B: BrokerClient> Consumer<B> {
    pub fn new(broker: Arc<B>, subscription: Subscription) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            broker,
            subscription,
            stats: Arc::new(ConsumerStats::default()),
            ledger: Arc::new(RwLock::new(OffsetLedger::default())),
            lag_report: Arc::new(RwLock::new(Vec::new())),
            last_snapshot: Arc::new(RwLock::new(None)),
            event_tx,
            event_rx: Some(event_rx),
            session: None,
            analytics: None,
        }
    }

    /// Connect the underlying broker client. A failure here is fatal to the
    /// session being started and is returned to the caller; every later
    /// error is surfaced on the event channel instead.
    pub async fn connect(&self) -> Result<()> {
        self.broker.connect().await
    }

    /// Take the event receiver. Yields `Some` exactly once.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<ConsumerEvent>> {
        self.event_rx.take()
    }

    /// Start a consume session driving `callback` for every fetched message.
    ///
    /// The callback's future completing is the message's `done` signal: only
    /// then does the message enter commit accounting. A callback error is
    /// reported on the event channel and the message still counts as done —
    /// the stream never stalls on a poison message.
    pub async fn consume<F, Fut>(&mut self, callback: F, options: ConsumeOptions) -> Result<()>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.session.is_some() {
            return Err(Error::Config(
                "a consume session is already active".to_string(),
            ));
        }

        let options = options.normalized();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let commit_final = Arc::new(AtomicBool::new(false));

        let ctx = SessionContext {
            broker: Arc::clone(&self.broker),
            subscription: self.subscription.clone(),
            options,
            stats: Arc::clone(&self.stats),
            ledger: Arc::clone(&self.ledger),
            event_tx: self.event_tx.clone(),
            commit_final: Arc::clone(&commit_final),
        };

        let task = tokio::spawn(run_session(ctx, Arc::new(callback), shutdown_rx));
        self.session = Some(Session {
            shutdown: shutdown_tx,
            commit_final,
            task,
        });
        Ok(())
    }

    /// Stop the session: no new fetches, the in-flight batch drains, and if
    /// `commit_final_offsets` is set a final commit is forced regardless of
    /// the batch threshold (skipped when nothing is pending). Also tears
    /// down analytics timers and closes the broker client.
    pub async fn close(&mut self, commit_final_offsets: bool) -> Result<()> {
        self.disable_analytics();

        match self.session.take() {
            Some(session) => {
                session
                    .commit_final
                    .store(commit_final_offsets, Ordering::Relaxed);
                let _ = session.shutdown.send(true);
                // The driver closes the broker client on its way out.
                let _ = session.task.await;
                Ok(())
            }
            None => self.broker.close(false).await,
        }
    }

    /// Consumed position (next offset) for one topic-partition, committed if
    /// available, else the latest done-but-uncommitted position.
    pub async fn offset_for_topic_partition(&self, topic: &str, partition: u32) -> Option<u64> {
        self.ledger
            .read()
            .await
            .consumed_offset(&TopicPartition::new(topic, partition))
    }

    /// All offsets confirmed committed at the broker.
    pub async fn committed_offsets(&self) -> HashMap<TopicPartition, u64> {
        self.ledger.read().await.committed().clone()
    }

    /// Partitions currently assigned for this subscription.
    pub async fn assigned_partitions(&self) -> Result<Vec<TopicPartition>> {
        self.broker.assigned_partitions(&self.subscription).await
    }

    /// Per-partition lag report. Returns the lag monitor's latest report
    /// when one exists; otherwise computes one on demand.
    pub async fn lag_status(&self) -> Result<Vec<LagEntry>> {
        {
            let report = self.lag_report.read().await;
            if !report.is_empty() {
                return Ok(report.clone());
            }
        }
        compute_lag(&*self.broker, &self.subscription, &self.ledger).await
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            total_incoming: self.stats.total_incoming.load(Ordering::Relaxed),
            batches_processed: self.stats.batches_processed.load(Ordering::Relaxed),
            commits: self.stats.commits.load(Ordering::Relaxed),
            callback_errors: self.stats.callback_errors.load(Ordering::Relaxed),
            commit_errors: self.stats.commit_errors.load(Ordering::Relaxed),
            transport_errors: self.stats.transport_errors.load(Ordering::Relaxed),
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
            stats.total_incoming,
            stats.error_total(),
        )
    }

    /// Start the analytics and lag timers. Replaces any previous timers.
    pub fn enable_analytics(&mut self, config: AnalyticsConfig) {
        self.disable_analytics();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::clone(&self.stats);
        let throughput = spawn_throughput_task(
            move || stats.total_incoming.load(Ordering::Relaxed),
            config.analytics_interval,
            Arc::clone(&self.last_snapshot),
            self.event_tx.clone(),
            ConsumerEvent::Analytics,
            shutdown_rx.clone(),
        );
        let lag = spawn_lag_task(
            Arc::clone(&self.broker),
            self.subscription.clone(),
            Arc::clone(&self.ledger),
            Arc::clone(&self.lag_report),
            config.lag_fetch_interval,
            self.event_tx.clone(),
            ConsumerEvent::Error,
            shutdown_rx,
        );

        self.analytics = Some(AnalyticsHandle::new(shutdown_tx, vec![throughput, lag]));
    }

    /// Cancel both analytics timers. No snapshot is emitted afterwards.
    pub fn disable_analytics(&mut self) {
        if let Some(handle) = self.analytics.take() {
            handle.disable();
        }
    }
}

// ============================================================================
// Session driver
// ============================================================================

struct SessionContext<B: BrokerClient> {
    broker: Arc<B>,
    subscription: Subscription,
    options: ConsumeOptions,
    stats: Arc<ConsumerStats>,
    ledger: Arc<RwLock<OffsetLedger>>,
    event_tx: mpsc::UnboundedSender<ConsumerEvent>,
    commit_final: Arc<AtomicBool>,
}

async fn run_session<B, F, Fut>(
    ctx: SessionContext<B>,
    callback: Arc<F>,
    mut shutdown: watch::Receiver<bool>,
) where
    B: BrokerClient,
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut coordinator = CommitCoordinator::new(&ctx.options);
    info!(
        group_id = %ctx.subscription.group_id,
        topics = ?ctx.subscription.topics,
        batch_size = ctx.options.batch_size,
        "Consume session started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let batch = tokio::select! {
            _ = shutdown.changed() => continue,
            fetched = ctx.broker.fetch_batch(&ctx.subscription, ctx.options.batch_size) => {
                match fetched {
                    Ok(batch) => batch,
                    Err(e) => {
                        ctx.stats.transport_errors.fetch_add(1, Ordering::Relaxed);
                        let _ = ctx.event_tx.send(ConsumerEvent::Error(e));
                        pause(&mut shutdown, FETCH_ERROR_BACKOFF).await;
                        continue;
                    }
                }
            }
        };

        if batch.is_empty() {
            pause(&mut shutdown, IDLE_FETCH_DELAY).await;
            continue;
        }

        // A short fetch is still a complete batch.
        process_batch(&ctx, &callback, &mut coordinator, batch).await;
        ctx.stats.batches_processed.fetch_add(1, Ordering::Relaxed);

        if coordinator.batch_complete() {
            flush_commit(&ctx, &mut coordinator, false).await;
        }
    }

    if ctx.commit_final.load(Ordering::Relaxed) && coordinator.has_pending() {
        flush_commit(&ctx, &mut coordinator, true).await;
    }

    if let Err(e) = ctx.broker.close(false).await {
        let _ = ctx.event_tx.send(ConsumerEvent::Error(e));
    }
    debug!("Consume session closed");
}

/// Drive the callback over one batch and feed completed offsets into the
/// coordinator. Completion of every message is awaited here, so the fetch
/// loop never runs ahead of an unfinished batch.
async fn process_batch<B, F, Fut>(
    ctx: &SessionContext<B>,
    callback: &Arc<F>,
    coordinator: &mut CommitCoordinator,
    batch: Vec<Message>,
) where
    B: BrokerClient,
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    // Group per partition, preserving broker order inside each group. Groups
    // run concurrently; messages within a group stay sequential, which keeps
    // per-partition offset-order delivery.
    let mut groups: Vec<(TopicPartition, Vec<Message>)> = Vec::new();
    for message in batch {
        let tp = message.topic_partition();
        match groups.iter_mut().find(|(existing, _)| *existing == tp) {
            Some((_, messages)) => messages.push(message),
            None => groups.push((tp, vec![message])),
        }
    }

    let acked: Vec<(TopicPartition, u64)> = if ctx.options.concurrency == 1 {
        let mut acked = Vec::new();
        for (tp, messages) in groups {
            for message in messages {
                let offset = message.offset;
                deliver(&ctx.stats, &ctx.event_tx, callback.as_ref(), message).await;
                acked.push((tp.clone(), offset));
            }
        }
        acked
    } else {
        futures::stream::iter(groups.into_iter().map(|(tp, messages)| {
            let stats = Arc::clone(&ctx.stats);
            let event_tx = ctx.event_tx.clone();
            let callback = Arc::clone(callback);
            async move {
                let mut acks = Vec::with_capacity(messages.len());
                for message in messages {
                    let offset = message.offset;
                    deliver(&stats, &event_tx, callback.as_ref(), message).await;
                    acks.push((tp.clone(), offset));
                }
                acks
            }
        }))
        .buffer_unordered(ctx.options.concurrency)
        .collect::<Vec<Vec<_>>>()
        .await
        .into_iter()
        .flatten()
        .collect()
    };

    let mut ledger = ctx.ledger.write().await;
    for (tp, offset) in acked {
        ledger.mark(tp.clone(), offset + 1);
        coordinator.record_done(tp, offset);
    }
}

/// Invoke the callback for one message. An error is reported and the
/// message still counts as done.
async fn deliver<F, Fut>(
    stats: &ConsumerStats,
    event_tx: &mpsc::UnboundedSender<ConsumerEvent>,
    callback: &F,
    message: Message,
) where
    F: Fn(Message) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if let Err(e) = callback(message).await {
        stats.callback_errors.fetch_add(1, Ordering::Relaxed);
        let _ = event_tx.send(ConsumerEvent::Error(Error::Callback(e.to_string())));
    }
    stats.total_incoming.fetch_add(1, Ordering::Relaxed);
}

/// Flush the accumulated range. Synchronous commits keep their offsets on
/// failure so the next threshold covers the larger range; fire-and-forget
/// commits hand the range off with the request and report failures on the
/// event channel (later commits re-cover the range via cumulative offsets).
async fn flush_commit<B: BrokerClient>(
    ctx: &SessionContext<B>,
    coordinator: &mut CommitCoordinator,
    force_sync: bool,
) {
    if !coordinator.has_pending() {
        return;
    }

    let count = coordinator.pending_messages();
    let offsets = coordinator.begin_commit();

    if coordinator.sync() || force_sync {
        match ctx.broker.commit_offsets(&offsets, true).await {
            Ok(()) => {
                ctx.ledger.write().await.apply_commit(&offsets);
                ctx.stats.commits.fetch_add(1, Ordering::Relaxed);
                let _ = ctx.event_tx.send(ConsumerEvent::Commit { messages: count });
                coordinator.finish_commit();
            }
            Err(e) => {
                ctx.stats.commit_errors.fetch_add(1, Ordering::Relaxed);
                let _ = ctx
                    .event_tx
                    .send(ConsumerEvent::Error(Error::Commit(e.to_string())));
                coordinator.abort_commit();
            }
        }
    } else {
        coordinator.finish_commit();
        let broker = Arc::clone(&ctx.broker);
        let ledger = Arc::clone(&ctx.ledger);
        let stats = Arc::clone(&ctx.stats);
        let event_tx = ctx.event_tx.clone();
        tokio::spawn(async move {
            match broker.commit_offsets(&offsets, false).await {
                Ok(()) => {
                    ledger.write().await.apply_commit(&offsets);
                    stats.commits.fetch_add(1, Ordering::Relaxed);
                    let _ = event_tx.send(ConsumerEvent::Commit { messages: count });
                }
                Err(e) => {
                    stats.commit_errors.fetch_add(1, Ordering::Relaxed);
                    let _ = event_tx.send(ConsumerEvent::Error(Error::Commit(e.to_string())));
                }
            }
        });
    }
}

async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.changed() => {}
    }
}
