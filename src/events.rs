// Copyright 2025 Cowboy AI, LLC.

//! Business event envelope and topics
//!
//! Events are immutable once appended. The envelope serializes with the
//! canonical camelCase wire keys (`eventId`, `eventType`, `correlationId`,
//! ...) so every consumer across the platform reads the same shape; the
//! schema is versioned through the `version` field.

use crate::identifiers::{CorrelationId, EventId, SagaId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named append-only channel on the event log
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from its dotted name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Fan-in of all events across the platform
    pub fn business_events() -> Self {
        Self::new("business.events")
    }

    /// Saga lifecycle milestones
    pub fn saga_orchestration() -> Self {
        Self::new("saga.orchestration")
    }

    /// Order domain: creation
    pub fn orders_creation() -> Self {
        Self::new("orders.creation")
    }

    /// Order domain: confirmation
    pub fn orders_confirmation() -> Self {
        Self::new("orders.confirmation")
    }

    /// Order domain: cancellation
    pub fn orders_cancellation() -> Self {
        Self::new("orders.cancellation")
    }

    /// Inventory domain: verification
    pub fn inventory_verification() -> Self {
        Self::new("inventory.verification")
    }

    /// Inventory domain: reservation
    pub fn inventory_reservation() -> Self {
        Self::new("inventory.reservation")
    }

    /// Inventory domain: release of reserved stock
    pub fn inventory_release() -> Self {
        Self::new("inventory.release")
    }

    /// Payment domain: processing
    pub fn payments_processing() -> Self {
        Self::new("payments.processing")
    }

    /// Payment domain: settled payments
    pub fn payments_completion() -> Self {
        Self::new("payments.completion")
    }

    /// Payment domain: declines and refunds
    pub fn payments_failure() -> Self {
        Self::new("payments.failure")
    }

    /// The topic name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Envelope metadata carried on every event
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// The saga that produced the event, when applicable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saga_id: Option<SagaId>,
    /// Service that produced the event
    pub source_service: String,
    /// Additional custom metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

impl EventMetadata {
    /// Metadata for an event produced by a saga
    pub fn for_saga(saga_id: SagaId, source_service: impl Into<String>) -> Self {
        Self {
            saga_id: Some(saga_id),
            source_service: source_service.into(),
            custom: None,
        }
    }

    /// Metadata for an event produced outside any saga
    pub fn from_service(source_service: impl Into<String>) -> Self {
        Self {
            saga_id: None,
            source_service: source_service.into(),
            custom: None,
        }
    }
}

/// A typed business event envelope
///
/// Created by the producer on append; partition and offset are assigned by
/// the log and reported in the [`StoredEvent`] wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BusinessEvent {
    /// Unique identifier; consumers dedupe on it
    pub event_id: EventId,
    /// Event type name (e.g. `saga_started`, `stock_reserved`)
    pub event_type: String,
    /// The aggregate the event belongs to (partition key)
    pub aggregate_id: String,
    /// Aggregate type (e.g. `Order`, `Saga`)
    pub aggregate_type: String,
    /// When the event was created
    pub timestamp: DateTime<Utc>,
    /// Causal-chain identifier
    pub correlation_id: CorrelationId,
    /// Producing service
    pub source: String,
    /// Envelope schema version
    pub version: u32,
    /// Opaque payload
    pub data: serde_json::Value,
    /// Envelope metadata
    pub metadata: EventMetadata,
}

/// Current envelope schema version
pub const EVENT_SCHEMA_VERSION: u32 = 1;

impl BusinessEvent {
    /// Build an event envelope stamped with the current time
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        correlation_id: CorrelationId,
        data: serde_json::Value,
        metadata: EventMetadata,
    ) -> Self {
        let source = metadata.source_service.clone();
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            timestamp: Utc::now(),
            correlation_id,
            source,
            version: EVENT_SCHEMA_VERSION,
            data,
            metadata,
        }
    }

    /// Build a saga-lifecycle event keyed by the saga itself
    pub fn for_saga(
        saga_id: SagaId,
        event_type: impl Into<String>,
        correlation_id: CorrelationId,
        source_service: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        let service = source_service.into();
        Self::new(
            event_type,
            saga_id.to_string(),
            "Saga",
            correlation_id,
            data,
            EventMetadata::for_saga(saga_id, service),
        )
    }
}

/// An event as it sits on a partition, with its assigned location
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    /// Topic the event was appended to
    pub topic: Topic,
    /// Partition chosen from the aggregate id
    pub partition: u32,
    /// Monotonic offset within the partition
    pub offset: u64,
    /// When the log accepted the append
    pub appended_at: DateTime<Utc>,
    /// The envelope itself
    pub event: BusinessEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_event() -> BusinessEvent {
        let saga_id = SagaId::new();
        BusinessEvent::for_saga(
            saga_id,
            "saga_started",
            CorrelationId::from_saga(saga_id),
            "saga-coordinator",
            serde_json::json!({"order_id": "ord-001"}),
        )
    }

    #[test]
    fn envelope_serializes_with_canonical_keys() {
        let event = sample_event();
        let value = serde_json::to_value(&event).unwrap();
        let obj = value.as_object().unwrap();

        for key in [
            "eventId",
            "eventType",
            "aggregateId",
            "aggregateType",
            "timestamp",
            "correlationId",
            "source",
            "version",
            "data",
            "metadata",
        ] {
            assert!(obj.contains_key(key), "missing canonical key {key}");
        }
        assert!(obj["metadata"].as_object().unwrap().contains_key("sagaId"));
        assert_eq!(obj["version"], serde_json::json!(EVENT_SCHEMA_VERSION));
    }

    #[test]
    fn envelope_round_trips() {
        let event = sample_event();
        let json = serde_json::to_string(&event).unwrap();
        let back: BusinessEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event.event_id, back.event_id);
        assert_eq!(event.event_type, back.event_type);
        assert_eq!(event.aggregate_id, back.aggregate_id);
        assert_eq!(event.correlation_id, back.correlation_id);
        assert_eq!(event.version, back.version);
        assert_eq!(event.data, back.data);
        assert_eq!(event.metadata.saga_id, back.metadata.saga_id);
    }

    #[test]
    fn timestamps_are_rfc3339_on_the_wire() {
        let event = sample_event();
        let value = serde_json::to_value(&event).unwrap();
        let raw = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(raw).is_ok());
    }

    #[test]
    fn topics_have_dotted_names() {
        assert_eq!(Topic::business_events().as_str(), "business.events");
        assert_eq!(Topic::saga_orchestration().as_str(), "saga.orchestration");
        assert_eq!(Topic::inventory_release().as_str(), "inventory.release");
        assert_eq!(Topic::payments_failure().as_str(), "payments.failure");
        assert_eq!(Topic::orders_cancellation().as_str(), "orders.cancellation");
    }
}
