// Copyright 2025 Cowboy AI, LLC.

//! # Saga Coordination
//!
//! Coordination core for distributed, multi-step business transactions
//! across independently deployed retail services. The canonical saga is
//! *Order Creation*: verify stock, reserve stock, process payment, confirm
//! the order, and notify the customer — with a compensating action for
//! every completed step.
//!
//! The crate provides:
//! - **Orchestrator**: admits saga requests, walks the registered step plan
//!   strictly in order, and delegates failures to the compensation engine
//! - **State store**: durable saga records with an append-only transition
//!   log and optimistic concurrency on the current state
//! - **Event log**: partitioned append-only topics; per-aggregate ordering,
//!   monotonic offsets, and a fan-in `business.events` topic
//! - **Participant contract**: execute/compensate RPCs with bounded retry,
//!   plus an HTTP client and router adapter
//! - **Failure injector**: deterministic and probabilistic rejection for
//!   exercising the failure paths
//! - **Observability**: Prometheus metrics and an NDJSON lifecycle journal
//!
//! ## Design Principles
//!
//! 1. **Failure is a value**: participant verdicts carry explicit success
//!    flags; only infrastructure faults propagate as errors
//! 2. **Event before state**: every transition appends its event to the log
//!    before the new state is committed to the store
//! 3. **Terminal is absorbing**: `Completed`, `Compensated`, and `Failed`
//!    accept no further transitions
//! 4. **Single writer per saga**: steps within one saga are strictly
//!    sequential; concurrency lives across sagas
//! 5. **Best-effort rollback**: compensation keeps walking past failures to
//!    maximize cleanup, then surfaces what remains

#![warn(missing_docs)]

mod errors;
pub mod identifiers;

pub mod compensation;
pub mod config;
pub mod event_log;
pub mod events;
pub mod failure;
pub mod http;
pub mod journal;
pub mod metrics;
pub mod orchestrator;
pub mod participant;
pub mod participants;
pub mod plan;
pub mod producer;
pub mod saga;
pub mod state_machine;
pub mod store;

// Re-export core types
pub use compensation::CompensationEngine;
pub use config::CoordinatorConfig;
pub use errors::{CoordinationError, CoordinationResult};
pub use event_log::{EventLog, EventLogError, EventStatistics, InMemoryEventLog, LogPosition};
pub use events::{BusinessEvent, EventMetadata, StoredEvent, Topic, EVENT_SCHEMA_VERSION};
pub use failure::{FailureConfig, FailureInjector, FailureKind, InjectedFailure};
pub use identifiers::{CorrelationId, EventId, SagaId, TransitionId};
pub use journal::{Category, Journal, JournalRecord, Severity};
pub use metrics::SagaMetrics;
pub use orchestrator::SagaOrchestrator;
pub use participant::{
    CompensateStepRequest, CompensateStepResponse, ExecuteStepRequest, ExecuteStepResponse,
    HttpParticipant, ParticipantClient, ParticipantInfo, ParticipantRegistry, RetryPolicy,
    SagaParticipant,
};
pub use participants::{OrderParticipant, PaymentParticipant, StockParticipant};
pub use plan::{PlanRegistry, SagaPlan, StepDefinition};
pub use producer::BusinessEventProducer;
pub use saga::{
    CompensationResult, OrderItem, Saga, SagaRequest, SagaResponse, SagaStep, SagaTransition,
    SagaType, StepName, StepStatus, TransitionKind,
};
pub use state_machine::{guard_transition, SagaState, State};
pub use store::{InMemorySagaStore, SagaStore};
