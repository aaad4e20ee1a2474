//! Consumer-group member that decodes records and hands them to the sink.
//!
//! Records are handled one at a time. The offset of a record is committed only
//! after the sink accepted it (or after it was found undecodable), so anything
//! in flight when the member dies is redelivered to the next partition owner.
pub mod kafka;

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    codec::Decoder,
    error::ConsumeError,
    sink::{PersistOutcome, Sink},
};

/// One record as read from a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Lifecycle of a group member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Joining,
    Streaming,
    Rebalancing,
    Closed,
}

/// Shared view of a member's [SubscriberState], written by the record source
/// (including from broker callbacks) and observable from anywhere.
#[derive(Clone)]
pub struct StateHandle {
    tx: Arc<watch::Sender<SubscriberState>>,
}

impl Default for StateHandle {
    fn default() -> Self {
        StateHandle::new()
    }
}

impl StateHandle {
    pub fn new() -> StateHandle {
        let (tx, _) = watch::channel(SubscriberState::Joining);
        StateHandle { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> SubscriberState {
        *self.tx.borrow()
    }

    pub fn set(&self, next: SubscriberState) {
        self.transition(|_| true, next);
    }

    /// Moves to `next` only while the current state is `from`
    pub fn promote(&self, from: SubscriberState, next: SubscriberState) {
        self.transition(|current| current == from, next);
    }

    fn transition(&self, allowed: impl FnOnce(SubscriberState) -> bool, next: SubscriberState) {
        let mut previous = next;
        let changed = self.tx.send_if_modified(|current| {
            // nothing leaves Closed
            if *current == next || *current == SubscriberState::Closed || !allowed(*current) {
                return false;
            }
            previous = std::mem::replace(current, next);
            true
        });
        if changed {
            info!(from = ?previous, to = ?next, "subscriber state changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SubscriberState> {
        self.tx.subscribe()
    }
}

/// Where a subscriber reads records from and acknowledges them to.
#[async_trait]
pub trait RecordSource: Send {
    /// Next record from any assigned partition, in publish order per partition
    async fn next(&mut self) -> Result<Record, ConsumeError>;
    /// Marks `record` and everything before it in its partition as processed
    fn commit(&mut self, record: &Record) -> Result<(), ConsumeError>;
    /// Leaves the group, releasing the partition assignment
    fn close(&mut self);
    fn state(&self) -> &StateHandle;
}

/// Counters reported when a subscriber stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberStats {
    pub received: u64,
    pub persisted: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub failed_attempts: u64,
}

pub struct Subscriber<S, D, K> {
    source: S,
    decoder: D,
    sink: K,
    retry_backoff: Duration,
    stats: SubscriberStats,
}

impl<S, D, K> Subscriber<S, D, K>
where
    S: RecordSource,
    D: Decoder + Send + Sync,
    K: Sink,
{
    /// `decoder` is the only thing that decides how payloads are interpreted
    pub fn new(source: S, decoder: D, sink: K, retry_backoff: Duration) -> Subscriber<S, D, K> {
        Subscriber {
            source,
            decoder,
            sink,
            retry_backoff,
            stats: SubscriberStats::default(),
        }
    }

    pub fn state(&self) -> StateHandle {
        self.source.state().clone()
    }

    /// Consumes until `shutdown` resolves, then leaves the group.
    pub async fn run<F>(mut self, shutdown: F) -> SubscriberStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let received = tokio::select! {
                _ = &mut shutdown => break,
                received = self.source.next() => received,
            };
            match received {
                Ok(record) => {
                    if !self.process(&record, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "receiving record");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
        self.source.close();
        info!(stats = ?self.stats, "subscriber stopped");
        self.stats
    }

    /// Returns false when shutdown was requested before the record could be persisted.
    async fn process<F>(&mut self, record: &Record, shutdown: &mut F) -> bool
    where
        F: Future<Output = ()> + Unpin,
    {
        self.stats.received += 1;
        let tx = match self.decoder.decode(&record.payload) {
            Ok(tx) => tx,
            Err(e) => {
                // same bytes would fail again, so skip past them
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    key = ?record.key,
                    error = %ConsumeError::from(e),
                    "skipping undecodable record"
                );
                self.stats.skipped += 1;
                self.commit(record);
                return true;
            }
        };

        info!(
            transaction_id = %tx.transaction_id,
            customer = %tx.customer_id,
            merchant = %tx.merchant_id,
            amount = tx.amount,
            partition = record.partition,
            offset = record.offset,
            "Received tx"
        );

        // keep trying until the sink accepts it and only after that commit the offset
        loop {
            match self.sink.persist(&tx).await {
                Ok(outcome) => {
                    match outcome {
                        PersistOutcome::Inserted => self.stats.persisted += 1,
                        PersistOutcome::Duplicate => {
                            debug!(transaction_id = %tx.transaction_id, "duplicate delivery");
                            self.stats.duplicates += 1;
                        }
                    }
                    self.commit(record);
                    return true;
                }
                Err(e) => {
                    self.stats.failed_attempts += 1;
                    error!(
                        transaction_id = %tx.transaction_id,
                        partition = record.partition,
                        offset = record.offset,
                        retryable = e.is_retryable(),
                        error = %e,
                        "persisting transaction, offset not committed"
                    );
                    tokio::select! {
                        _ = &mut *shutdown => return false,
                        _ = sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
    }

    fn commit(&mut self, record: &Record) {
        if let Err(e) = self.source.commit(record) {
            warn!(
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "failed to commit offset"
            );
        }
    }
}
