//! Commit coordination.
//!
//! The [`CommitCoordinator`] owns the decision of *when* consumed offsets go
//! back to the broker: it accumulates acknowledged offsets per partition,
//! counts completed batches, and flips to `Committing` when the configured
//! threshold is reached. The [`OffsetLedger`] is the shared view of that
//! accounting — written by the coordinator, read by the lag monitor and the
//! caller-facing offset getters.

use crate::consumer::ConsumeOptions;
use std::collections::HashMap;
use strom_core::TopicPartition;

/// Committed and in-flight offset positions, all in next-to-consume
/// convention (highest acknowledged + 1).
#[derive(Debug, Default)]
pub struct OffsetLedger {
    /// Offsets confirmed committed at the broker
    committed: HashMap<TopicPartition, u64>,
    /// Latest done-but-not-necessarily-committed positions
    marked: HashMap<TopicPartition, u64>,
}

impl OffsetLedger {
    /// Record a completed callback at `next_offset`. Positions only move
    /// forward.
    pub fn mark(&mut self, tp: TopicPartition, next_offset: u64) {
        let slot = self.marked.entry(tp).or_insert(0);
        *slot = (*slot).max(next_offset);
    }

    /// Apply a confirmed commit.
    pub fn apply_commit(&mut self, offsets: &HashMap<TopicPartition, u64>) {
        for (tp, next_offset) in offsets {
            let slot = self.committed.entry(tp.clone()).or_insert(0);
            *slot = (*slot).max(*next_offset);
        }
    }

    pub fn committed(&self) -> &HashMap<TopicPartition, u64> {
        &self.committed
    }

    /// Committed position, falling back to the latest marked position when
    /// nothing has been committed for the partition yet.
    pub fn consumed_offset(&self, tp: &TopicPartition) -> Option<u64> {
        self.committed.get(tp).or_else(|| self.marked.get(tp)).copied()
    }
}

/// Coordinator phases. `Accumulating` between commits; `Committing` while a
/// commit request is outstanding. There is no terminal state — `close`
/// drives one final `Committing` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Accumulating,
    Committing,
}

/// Decides when consumed offsets are flushed to the broker.
#[derive(Debug)]
pub struct CommitCoordinator {
    every_n_batches: u64,
    sync: bool,
    state: CommitState,
    batch_counter: u64,
    /// Highest acknowledged offset per partition since the previous commit
    acked: HashMap<TopicPartition, u64>,
    /// Messages acknowledged since the previous commit
    pending_messages: u64,
}

impl CommitCoordinator {
    pub fn new(options: &ConsumeOptions) -> Self {
        Self {
            every_n_batches: options.commit_every_n_batch.max(1) as u64,
            sync: options.commit_sync,
            state: CommitState::Accumulating,
            batch_counter: 0,
            acked: HashMap::new(),
            pending_messages: 0,
        }
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    pub fn sync(&self) -> bool {
        self.sync
    }

    pub fn batch_counter(&self) -> u64 {
        self.batch_counter
    }

    /// Number of messages the next commit will cover.
    pub fn pending_messages(&self) -> u64 {
        self.pending_messages
    }

    pub fn has_pending(&self) -> bool {
        self.pending_messages > 0
    }

    /// Record a message whose callback has completed. Only offsets recorded
    /// here ever appear in a commit request.
    pub fn record_done(&mut self, tp: TopicPartition, offset: u64) {
        let slot = self.acked.entry(tp).or_insert(offset);
        *slot = (*slot).max(offset);
        self.pending_messages += 1;
    }

    /// Account a completed batch; returns whether the commit threshold was
    /// reached.
    pub fn batch_complete(&mut self) -> bool {
        self.batch_counter += 1;
        self.batch_counter % self.every_n_batches == 0
    }

    /// Enter `Committing` and produce the commit request: next-to-consume
    /// offsets per partition.
    pub fn begin_commit(&mut self) -> HashMap<TopicPartition, u64> {
        self.state = CommitState::Committing;
        self.acked
            .iter()
            .map(|(tp, offset)| (tp.clone(), offset + 1))
            .collect()
    }

    /// The commit succeeded (or was handed off fire-and-forget): clear the
    /// accumulated range and return to `Accumulating`.
    pub fn finish_commit(&mut self) {
        self.acked.clear();
        self.pending_messages = 0;
        self.state = CommitState::Accumulating;
    }

    /// The commit failed: keep the accumulated offsets and counter so the
    /// next threshold covers the whole (larger) range. No message loses its
    /// commit obligation.
    pub fn abort_commit(&mut self) {
        self.state = CommitState::Accumulating;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(every_n: usize, sync: bool) -> ConsumeOptions {
        ConsumeOptions {
            batch_size: 1,
            commit_every_n_batch: every_n,
            concurrency: 1,
            commit_sync: sync,
        }
    }

    fn tp(p: u32) -> TopicPartition {
        TopicPartition::new("events", p)
    }

    #[test]
    fn threshold_fires_every_n_batches() {
        let mut coordinator = CommitCoordinator::new(&options(3, true));
        assert!(!coordinator.batch_complete());
        assert!(!coordinator.batch_complete());
        assert!(coordinator.batch_complete());
        assert!(!coordinator.batch_complete());
        assert!(!coordinator.batch_complete());
        assert!(coordinator.batch_complete());
        assert_eq!(coordinator.batch_counter(), 6);
    }

    #[test]
    fn commit_request_carries_next_offsets() {
        let mut coordinator = CommitCoordinator::new(&options(1, true));
        coordinator.record_done(tp(0), 4);
        coordinator.record_done(tp(0), 5);
        coordinator.record_done(tp(1), 0);
        assert_eq!(coordinator.pending_messages(), 3);

        let request = coordinator.begin_commit();
        assert_eq!(coordinator.state(), CommitState::Committing);
        assert_eq!(request[&tp(0)], 6);
        assert_eq!(request[&tp(1)], 1);

        coordinator.finish_commit();
        assert_eq!(coordinator.state(), CommitState::Accumulating);
        assert!(!coordinator.has_pending());
    }

    #[test]
    fn aborted_commit_keeps_the_accumulated_range() {
        let mut coordinator = CommitCoordinator::new(&options(1, true));
        coordinator.record_done(tp(0), 0);
        let first = coordinator.begin_commit();
        coordinator.abort_commit();

        // More traffic arrives; the next commit covers both.
        coordinator.record_done(tp(0), 1);
        assert_eq!(coordinator.pending_messages(), 2);
        let second = coordinator.begin_commit();
        assert_eq!(first[&tp(0)], 1);
        assert_eq!(second[&tp(0)], 2);
    }

    #[test]
    fn out_of_order_acks_keep_highest_offset() {
        let mut coordinator = CommitCoordinator::new(&options(1, true));
        coordinator.record_done(tp(0), 7);
        coordinator.record_done(tp(0), 3);
        let request = coordinator.begin_commit();
        assert_eq!(request[&tp(0)], 8);
    }

    #[test]
    fn ledger_positions_never_regress() {
        let mut ledger = OffsetLedger::default();
        ledger.mark(tp(0), 5);
        ledger.mark(tp(0), 3);
        assert_eq!(ledger.consumed_offset(&tp(0)), Some(5));

        let mut commit = HashMap::new();
        commit.insert(tp(0), 4u64);
        ledger.apply_commit(&commit);
        // Committed view reflects the commit; consumed prefers committed.
        assert_eq!(ledger.committed()[&tp(0)], 4);
        assert_eq!(ledger.consumed_offset(&tp(0)), Some(4));
    }
}
