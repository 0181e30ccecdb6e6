// Copyright 2025 Cowboy AI, LLC.

//! Partitioned append-only event log
//!
//! Topics are created on first append. Each topic owns a fixed number of
//! partitions; an event's partition is chosen by hashing its aggregate id,
//! so all events of one aggregate land on one partition and read back in
//! append order. Offsets are monotonic per partition. Cross-partition
//! ordering is not promised.

use crate::events::{BusinessEvent, StoredEvent, Topic};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use futures::StreamExt;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

/// Errors that can occur when working with the event log
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The log backend is unreachable
    #[error("Event log unavailable: {0}")]
    Unavailable(String),

    /// Failed to serialize or deserialize event data
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Location assigned to an event on append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LogPosition {
    /// Partition the event landed on
    pub partition: u32,
    /// Offset within the partition
    pub offset: u64,
}

/// Per-topic and per-event-type counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStatistics {
    /// Total events across all topics
    pub total_events: u64,
    /// Events per topic, in first-seen order
    pub events_by_topic: IndexMap<String, u64>,
    /// Events per event type, in first-seen order
    pub events_by_type: IndexMap<String, u64>,
}

/// Stream of events delivered to a subscriber
pub type EventSubscription = Pin<Box<dyn Stream<Item = StoredEvent> + Send>>;

/// Append-only, partitioned event log
#[async_trait]
pub trait EventLog: Send + Sync + std::fmt::Debug {
    /// Append one event to a topic; the partition is derived from the
    /// event's aggregate id
    async fn append(&self, topic: &Topic, event: BusinessEvent)
        -> Result<LogPosition, EventLogError>;

    /// Append a batch; atomic per partition
    async fn append_batch(
        &self,
        topic: &Topic,
        events: Vec<BusinessEvent>,
    ) -> Result<Vec<LogPosition>, EventLogError>;

    /// Read a partition from an offset, in append order
    async fn read(
        &self,
        topic: &Topic,
        partition: u32,
        from_offset: u64,
    ) -> Result<Vec<StoredEvent>, EventLogError>;

    /// Read every event of one aggregate on a topic, in append order
    async fn read_aggregate(
        &self,
        topic: &Topic,
        aggregate_id: &str,
    ) -> Result<Vec<StoredEvent>, EventLogError>;

    /// Read a whole topic, merged across partitions by append time
    ///
    /// Cross-partition order is timestamp order only; within a partition
    /// the append order is preserved.
    async fn read_topic(&self, topic: &Topic) -> Result<Vec<StoredEvent>, EventLogError>;

    /// Subscribe to a topic's future appends
    async fn subscribe(&self, topic: &Topic) -> Result<EventSubscription, EventLogError>;

    /// Names of topics that have seen at least one append
    async fn topics(&self) -> Vec<String>;

    /// Counters for observability
    async fn statistics(&self) -> EventStatistics;
}

struct TopicLog {
    partitions: Vec<Vec<StoredEvent>>,
    sender: broadcast::Sender<StoredEvent>,
}

impl TopicLog {
    fn new(partition_count: u32) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            partitions: (0..partition_count).map(|_| Vec::new()).collect(),
            sender,
        }
    }
}

/// In-process event log used by the coordinator and the test harness
///
/// A single-process stand-in for a stream store: the write lock serializes
/// appends within a topic, which is what gives partitions their total order.
#[derive(Clone)]
pub struct InMemoryEventLog {
    partition_count: u32,
    topics: Arc<RwLock<HashMap<String, TopicLog>>>,
}

impl std::fmt::Debug for InMemoryEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventLog")
            .field("partition_count", &self.partition_count)
            .finish()
    }
}

impl InMemoryEventLog {
    /// Create a log with the given partitions per topic
    pub fn new(partition_count: u32) -> Self {
        Self {
            partition_count: partition_count.max(1),
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn partition_for(&self, aggregate_id: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        aggregate_id.hash(&mut hasher);
        (hasher.finish() % u64::from(self.partition_count)) as u32
    }

    fn store(
        topic: &Topic,
        topic_log: &mut TopicLog,
        partition: u32,
        event: BusinessEvent,
        appended_at: DateTime<Utc>,
    ) -> StoredEvent {
        let entries = &mut topic_log.partitions[partition as usize];
        let stored = StoredEvent {
            topic: topic.clone(),
            partition,
            offset: entries.len() as u64,
            appended_at,
            event,
        };
        entries.push(stored.clone());
        // Lagging or absent subscribers never block an append.
        let _ = topic_log.sender.send(stored.clone());
        stored
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(
        &self,
        topic: &Topic,
        event: BusinessEvent,
    ) -> Result<LogPosition, EventLogError> {
        let mut topics = self.topics.write().await;
        let topic_log = topics
            .entry(topic.as_str().to_string())
            .or_insert_with(|| TopicLog::new(self.partition_count));

        let partition = self.partition_for(&event.aggregate_id);
        let stored = Self::store(topic, topic_log, partition, event, Utc::now());
        Ok(LogPosition {
            partition: stored.partition,
            offset: stored.offset,
        })
    }

    async fn append_batch(
        &self,
        topic: &Topic,
        events: Vec<BusinessEvent>,
    ) -> Result<Vec<LogPosition>, EventLogError> {
        // One write lock for the whole batch keeps it atomic per partition.
        let mut topics = self.topics.write().await;
        let topic_log = topics
            .entry(topic.as_str().to_string())
            .or_insert_with(|| TopicLog::new(self.partition_count));

        let now = Utc::now();
        let mut positions = Vec::with_capacity(events.len());
        for event in events {
            let partition = self.partition_for(&event.aggregate_id);
            let stored = Self::store(topic, topic_log, partition, event, now);
            positions.push(LogPosition {
                partition: stored.partition,
                offset: stored.offset,
            });
        }
        Ok(positions)
    }

    async fn read(
        &self,
        topic: &Topic,
        partition: u32,
        from_offset: u64,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        let topics = self.topics.read().await;
        let Some(topic_log) = topics.get(topic.as_str()) else {
            return Ok(Vec::new());
        };
        let Some(entries) = topic_log.partitions.get(partition as usize) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .skip(from_offset as usize)
            .cloned()
            .collect())
    }

    async fn read_aggregate(
        &self,
        topic: &Topic,
        aggregate_id: &str,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        let partition = self.partition_for(aggregate_id);
        let all = self.read(topic, partition, 0).await?;
        Ok(all
            .into_iter()
            .filter(|stored| stored.event.aggregate_id == aggregate_id)
            .collect())
    }

    async fn read_topic(&self, topic: &Topic) -> Result<Vec<StoredEvent>, EventLogError> {
        let topics = self.topics.read().await;
        let Some(topic_log) = topics.get(topic.as_str()) else {
            return Ok(Vec::new());
        };
        let mut merged: Vec<StoredEvent> = topic_log
            .partitions
            .iter()
            .flat_map(|p| p.iter().cloned())
            .collect();
        merged.sort_by(|a, b| {
            a.appended_at
                .cmp(&b.appended_at)
                .then(a.partition.cmp(&b.partition))
                .then(a.offset.cmp(&b.offset))
        });
        Ok(merged)
    }

    async fn subscribe(&self, topic: &Topic) -> Result<EventSubscription, EventLogError> {
        let mut topics = self.topics.write().await;
        let topic_log = topics
            .entry(topic.as_str().to_string())
            .or_insert_with(|| TopicLog::new(self.partition_count));
        let receiver = topic_log.sender.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| async move { item.ok() });
        Ok(Box::pin(stream))
    }

    async fn topics(&self) -> Vec<String> {
        let topics = self.topics.read().await;
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        names
    }

    async fn statistics(&self) -> EventStatistics {
        let topics = self.topics.read().await;
        let mut stats = EventStatistics::default();
        let mut names: Vec<&String> = topics.keys().collect();
        names.sort();
        for name in names {
            let topic_log = &topics[name];
            let mut count = 0u64;
            for partition in &topic_log.partitions {
                for stored in partition {
                    count += 1;
                    *stats
                        .events_by_type
                        .entry(stored.event.event_type.clone())
                        .or_insert(0) += 1;
                }
            }
            stats.events_by_topic.insert(name.clone(), count);
            stats.total_events += count;
        }
        stats
    }
}
