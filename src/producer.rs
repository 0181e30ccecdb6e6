// Copyright 2025 Cowboy AI, LLC.

//! Business event producer
//!
//! Serializes typed events onto the partitioned log and mirrors every
//! domain-topic append onto the `business.events` fan-in topic. Publication
//! never blocks on consumer presence; a publish failure must be treated by
//! the caller as a step failure, because the event must precede the state
//! commit.

use crate::errors::{CoordinationError, CoordinationResult};
use crate::event_log::{EventLog, EventStatistics, LogPosition};
use crate::events::{BusinessEvent, Topic};
use crate::metrics::SagaMetrics;
use std::sync::Arc;
use tracing::debug;

/// Appends typed business events to one or more topics
#[derive(Debug, Clone)]
pub struct BusinessEventProducer {
    log: Arc<dyn EventLog>,
    metrics: Arc<SagaMetrics>,
}

impl BusinessEventProducer {
    /// Create a producer over an event log
    pub fn new(log: Arc<dyn EventLog>, metrics: Arc<SagaMetrics>) -> Self {
        Self { log, metrics }
    }

    /// Append an event to its topic and mirror it to the fan-in topic
    ///
    /// Returns the location on the primary topic. Duplicate publishes are
    /// tolerated downstream: consumers dedupe on `eventId`.
    pub async fn publish(
        &self,
        topic: &Topic,
        event: BusinessEvent,
    ) -> CoordinationResult<LogPosition> {
        let position = self
            .log
            .append(topic, event.clone())
            .await
            .map_err(|e| CoordinationError::EventLogUnavailable(e.to_string()))?;

        self.metrics.event_produced(topic.as_str(), &event.event_type);
        debug!(
            topic = %topic,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            partition = position.partition,
            offset = position.offset,
            "published business event"
        );

        let fan_in = Topic::business_events();
        if *topic != fan_in {
            self.log
                .append(&fan_in, event.clone())
                .await
                .map_err(|e| CoordinationError::EventLogUnavailable(e.to_string()))?;
            self.metrics
                .event_produced(fan_in.as_str(), &event.event_type);
        }

        Ok(position)
    }

    /// Append a batch to a topic, atomic per partition, then mirror it
    pub async fn publish_batch(
        &self,
        topic: &Topic,
        events: Vec<BusinessEvent>,
    ) -> CoordinationResult<Vec<LogPosition>> {
        let positions = self
            .log
            .append_batch(topic, events.clone())
            .await
            .map_err(|e| CoordinationError::EventLogUnavailable(e.to_string()))?;

        for event in &events {
            self.metrics.event_produced(topic.as_str(), &event.event_type);
        }

        let fan_in = Topic::business_events();
        if *topic != fan_in {
            self.log
                .append_batch(&fan_in, events.clone())
                .await
                .map_err(|e| CoordinationError::EventLogUnavailable(e.to_string()))?;
            for event in &events {
                self.metrics
                    .event_produced(fan_in.as_str(), &event.event_type);
            }
        }

        Ok(positions)
    }

    /// Per-topic and per-event-type counters
    pub async fn statistics(&self) -> EventStatistics {
        self.log.statistics().await
    }

    /// The underlying log, for read paths
    pub fn log(&self) -> Arc<dyn EventLog> {
        self.log.clone()
    }
}
