//! In-process broker and store.
//!
//! [MemoryTopic] is a partitioned append-only log with per-group committed
//! offsets, [MemoryStore] keeps pipeline rows and admin events with the same
//! uniqueness rule as the database. Both can be switched off to simulate an
//! outage.
use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, HashMap},
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use crate::{
    admin::EventStore,
    codec::json,
    error::{ConsumeError, PersistError, PublishError},
    publisher::{Ack, Publish},
    settings::OffsetReset,
    sink::{amount_to_decimal, checked_amount, PersistOutcome, Sink},
    subscriber::{Record, RecordSource, StateHandle, SubscriberState},
    transaction::{NewTransactionEvent, PersistedTransaction, Transaction, TransactionEvent},
};

struct StoredRecord {
    key: Option<String>,
    payload: Vec<u8>,
}

struct TopicState {
    partitions: Vec<Vec<StoredRecord>>,
    committed: HashMap<(String, i32), i64>,
    available: bool,
}

struct TopicInner {
    name: String,
    state: Mutex<TopicState>,
    appended: Notify,
}

#[derive(Clone)]
pub struct MemoryTopic {
    inner: Arc<TopicInner>,
}

/// Partition a key is routed to; the same key always lands in the same partition
pub fn partition_for(key: &str, partitions: usize) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as i32
}

impl MemoryTopic {
    pub fn new(name: &str, partitions: usize) -> MemoryTopic {
        assert!(partitions > 0, "a topic needs at least one partition");
        MemoryTopic {
            inner: Arc::new(TopicInner {
                name: name.to_owned(),
                state: Mutex::new(TopicState {
                    partitions: (0..partitions).map(|_| Vec::new()).collect(),
                    committed: HashMap::new(),
                    available: true,
                }),
                appended: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TopicState> {
        // a panicking test thread must not take the topic down with it
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn partition_count(&self) -> usize {
        self.lock().partitions.len()
    }

    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
        self.inner.appended.notify_waiters();
    }

    /// Appends raw bytes, bypassing the codec
    pub fn append(&self, key: Option<&str>, payload: Vec<u8>) -> Ack {
        let ack = {
            let mut state = self.lock();
            let count = state.partitions.len();
            let partition = key.map_or(0, |k| partition_for(k, count));
            let log = &mut state.partitions[partition as usize];
            log.push(StoredRecord {
                key: key.map(str::to_owned),
                payload,
            });
            Ack {
                partition,
                offset: log.len() as i64 - 1,
            }
        };
        self.inner.appended.notify_waiters();
        ack
    }

    pub fn committed(&self, group: &str, partition: i32) -> Option<i64> {
        self.lock().committed.get(&(group.to_owned(), partition)).copied()
    }

    /// Joins `group` and takes every partition
    pub fn subscribe(&self, group: &str, reset: OffsetReset) -> MemorySource {
        let all = (0..self.partition_count() as i32).collect::<Vec<_>>();
        self.subscribe_partitions(group, &all, reset)
    }

    /// Joins `group` owning only `partitions`. Each partition resumes from the
    /// group's committed offset, or from `reset` when there is none.
    pub fn subscribe_partitions(
        &self,
        group: &str,
        partitions: &[i32],
        reset: OffsetReset,
    ) -> MemorySource {
        let state = StateHandle::new();
        let positions = {
            let topic = self.lock();
            partitions
                .iter()
                .map(|&p| {
                    let start = match topic.committed.get(&(group.to_owned(), p)) {
                        Some(&offset) => offset,
                        None => match reset {
                            OffsetReset::Earliest => 0,
                            OffsetReset::Latest => topic.partitions[p as usize].len() as i64,
                        },
                    };
                    (p, start)
                })
                .collect::<BTreeMap<_, _>>()
        };
        state.set(SubscriberState::Streaming);
        MemorySource {
            topic: self.clone(),
            group: group.to_owned(),
            positions,
            cursor: 0,
            state,
        }
    }
}

#[async_trait]
impl Publish for MemoryTopic {
    async fn publish(&self, tx: Transaction) -> Result<Ack, PublishError> {
        if !self.lock().available {
            return Err(PublishError::Unavailable(String::from("broker unreachable")));
        }
        let payload = json::encode(&tx)?;
        Ok(self.append(Some(&tx.transaction_id), payload))
    }
}

/// Group member reading from a [MemoryTopic]
pub struct MemorySource {
    topic: MemoryTopic,
    group: String,
    positions: BTreeMap<i32, i64>,
    cursor: usize,
    state: StateHandle,
}

impl MemorySource {
    fn poll(&mut self) -> Result<Option<Record>, ConsumeError> {
        let topic = self.topic.lock();
        if !topic.available {
            return Err(ConsumeError::BrokerDisconnected(String::from("broker unreachable")));
        }
        let owned: Vec<i32> = self.positions.keys().copied().collect();
        // rotate across partitions so none starves the others
        for i in 0..owned.len() {
            let partition = owned[(self.cursor + i) % owned.len()];
            let position = self.positions[&partition];
            if let Some(stored) = topic.partitions[partition as usize].get(position as usize) {
                let record = Record {
                    topic: self.topic.inner.name.clone(),
                    partition,
                    offset: position,
                    key: stored.key.clone(),
                    payload: stored.payload.clone(),
                };
                self.positions.insert(partition, position + 1);
                self.cursor = (self.cursor + i + 1) % owned.len();
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn next(&mut self) -> Result<Record, ConsumeError> {
        let inner = self.topic.inner.clone();
        loop {
            // register before polling so an append in between is not missed
            let appended = inner.appended.notified();
            if let Some(record) = self.poll()? {
                return Ok(record);
            }
            appended.await;
        }
    }

    fn commit(&mut self, record: &Record) -> Result<(), ConsumeError> {
        let mut topic = self.topic.lock();
        let next = record.offset + 1;
        let committed = topic
            .committed
            .entry((self.group.clone(), record.partition))
            .or_insert(next);
        if *committed < next {
            *committed = next;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.state.set(SubscriberState::Closed);
    }

    fn state(&self) -> &StateHandle {
        &self.state
    }
}

struct StoreState {
    transactions: Vec<PersistedTransaction>,
    events: Vec<TransactionEvent>,
    available: bool,
    failures_left: usize,
    persist_attempts: usize,
}

/// Store with the same contracts as the PostgreSQL one
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            inner: Arc::new(Mutex::new(StoreState {
                transactions: Vec::new(),
                events: Vec::new(),
                available: true,
                failures_left: 0,
                persist_attempts: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Makes the next `n` persist calls fail with [PersistError::StoreUnavailable]
    pub fn fail_next(&self, n: usize) {
        self.lock().failures_left = n;
    }

    pub fn persist_attempts(&self) -> usize {
        self.lock().persist_attempts
    }

    pub fn transactions(&self) -> Vec<PersistedTransaction> {
        self.lock().transactions.clone()
    }

    pub fn find_transaction(&self, transaction_id: &str) -> Option<PersistedTransaction> {
        self.lock()
            .transactions
            .iter()
            .find(|t| t.transaction_id == transaction_id)
            .cloned()
    }
}

fn unavailable() -> PersistError {
    PersistError::StoreUnavailable(String::from("store unreachable"))
}

#[async_trait]
impl Sink for MemoryStore {
    async fn persist(&self, tx: &Transaction) -> Result<PersistOutcome, PersistError> {
        let mut state = self.lock();
        state.persist_attempts += 1;
        if !state.available {
            return Err(unavailable());
        }
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(unavailable());
        }
        let amount = amount_to_decimal(tx.amount)?;
        if state.transactions.iter().any(|t| t.transaction_id == tx.transaction_id) {
            return Ok(PersistOutcome::Duplicate);
        }
        let id = state.transactions.len() as i64 + 1;
        state.transactions.push(PersistedTransaction {
            id,
            transaction_id: tx.transaction_id.clone(),
            customer_id: tx.customer_id.clone(),
            merchant_id: tx.merchant_id.clone(),
            amount,
            timestamp: tx.timestamp,
            location: tx.location.clone(),
            merchant_category: tx.merchant_category.clone(),
            is_international: tx.is_international,
            created_at: Utc::now(),
        });
        Ok(PersistOutcome::Inserted)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn create_event(
        &self,
        event: NewTransactionEvent,
    ) -> Result<TransactionEvent, PersistError> {
        let mut state = self.lock();
        if !state.available {
            return Err(unavailable());
        }
        checked_amount(event.amount).map_err(PersistError::ConstraintViolation)?;
        let created = TransactionEvent {
            id: state.events.len() as i64 + 1,
            card_last4: event.card_last4,
            amount: event.amount,
            merchant: event.merchant,
            created_at: Utc::now(),
        };
        state.events.push(created.clone());
        Ok(created)
    }

    async fn list_events(&self) -> Result<Vec<TransactionEvent>, PersistError> {
        let state = self.lock();
        if !state.available {
            return Err(unavailable());
        }
        Ok(state.events.clone())
    }
}
