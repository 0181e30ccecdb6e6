// Copyright 2025 Cowboy AI, LLC.

//! Saga data model
//!
//! A saga owns an ordered list of step records and an append-only transition
//! log. The record here is the durable shape the state store persists; the
//! orchestrator mutates it only through store operations so the
//! write-then-read discipline holds per saga id.

use crate::errors::{CoordinationError, CoordinationResult};
use crate::identifiers::{CorrelationId, SagaId, TransitionId};
use crate::state_machine::{SagaState, State};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kinds of saga supported by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum SagaType {
    /// Order creation: verify stock, reserve stock, process payment, confirm order
    OrderCreation,
}

impl SagaType {
    /// Stable wire name for the saga type
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaType::OrderCreation => "OrderCreation",
        }
    }

    /// Schema version of this saga type's state enum
    pub fn schema_version(&self) -> u32 {
        SagaState::SCHEMA_VERSION
    }
}

impl fmt::Display for SagaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaType {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OrderCreation" => Ok(SagaType::OrderCreation),
            other => Err(CoordinationError::ValidationError(format!(
                "unknown saga type: {other}"
            ))),
        }
    }
}

/// Named steps of the order-creation plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum StepName {
    /// Check that every requested item is in stock
    VerifyStock,
    /// Hold the requested quantities
    ReserveStock,
    /// Charge the customer
    ProcessPayment,
    /// Confirm the order and queue the customer notification
    ConfirmOrder,
}

impl StepName {
    /// Stable wire name for the step
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::VerifyStock => "VerifyStock",
            StepName::ReserveStock => "ReserveStock",
            StepName::ProcessPayment => "ProcessPayment",
            StepName::ConfirmOrder => "ConfirmOrder",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepName {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VerifyStock" => Ok(StepName::VerifyStock),
            "ReserveStock" => Ok(StepName::ReserveStock),
            "ProcessPayment" => Ok(StepName::ProcessPayment),
            "ConfirmOrder" => Ok(StepName::ConfirmOrder),
            other => Err(CoordinationError::ValidationError(format!(
                "unknown step name: {other}"
            ))),
        }
    }
}

/// Status of a single saga step
///
/// Moves monotonically forward, except `Completed -> Compensated` during
/// rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum StepStatus {
    /// Not dispatched yet
    Pending,
    /// Participant call in flight
    InProgress,
    /// Participant returned a success verdict
    Completed,
    /// Participant returned a failure verdict or the call faulted
    Failed,
    /// Compensation applied
    Compensated,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "Pending",
            StepStatus::InProgress => "InProgress",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
            StepStatus::Compensated => "Compensated",
        };
        write!(f, "{s}")
    }
}

/// Classification of a transition record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TransitionKind {
    /// Forward progress
    Success,
    /// A step or the saga failed
    Failure,
    /// Rollback activity
    Compensation,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransitionKind::Success => "Success",
            TransitionKind::Failure => "Failure",
            TransitionKind::Compensation => "Compensation",
        };
        write!(f, "{s}")
    }
}

/// Immutable record of a state change within a saga
///
/// Appended by the store as part of the same logical commit as the state
/// update; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SagaTransition {
    /// Unique identifier for this transition
    pub transition_id: TransitionId,
    /// The saga this transition belongs to
    pub saga_id: SagaId,
    /// The state before the transition
    pub from_state: SagaState,
    /// The state after the transition
    pub to_state: SagaState,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
    /// The service that recorded the transition
    pub service_name: String,
    /// What the service was doing (e.g. `execute_step:ProcessPayment`)
    pub action: String,
    /// Success, failure, or compensation
    pub event_kind: TransitionKind,
    /// Optional human-readable message
    pub message: Option<String>,
    /// Optional opaque payload
    pub data: Option<serde_json::Value>,
}

impl SagaTransition {
    /// Build a transition record stamped with the current time
    pub fn new(
        saga_id: SagaId,
        from_state: SagaState,
        to_state: SagaState,
        service_name: impl Into<String>,
        action: impl Into<String>,
        event_kind: TransitionKind,
    ) -> Self {
        Self {
            transition_id: TransitionId::new(),
            saga_id,
            from_state,
            to_state,
            timestamp: Utc::now(),
            service_name: service_name.into(),
            action: action.into(),
            event_kind,
            message: None,
            data: None,
        }
    }

    /// Attach a message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach an opaque payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A single step of a running saga
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SagaStep {
    /// Unique within the saga
    pub step_id: Uuid,
    /// The named operation this step performs
    pub step_name: StepName,
    /// Logical name of the participant that executes the step
    pub participant_service: String,
    /// Current status
    pub status: StepStatus,
    /// When the participant call was dispatched
    pub started_at: Option<DateTime<Utc>>,
    /// When the participant returned a success verdict
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure detail, if any
    pub error_message: Option<String>,
    /// Whether the rollback walk must visit this step
    pub compensation_required: bool,
    /// When compensation was applied
    pub compensated_at: Option<DateTime<Utc>>,
    /// Result payload from a successful execution
    pub result: Option<serde_json::Value>,
}

impl SagaStep {
    /// Create a pending step
    pub fn pending(step_name: StepName, participant_service: impl Into<String>) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            step_name,
            participant_service: participant_service.into(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
            compensation_required: false,
            compensated_at: None,
            result: None,
        }
    }

    /// Mark the step in progress
    pub fn begin(&mut self) {
        self.status = StepStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    /// Mark the step completed with its result payload
    ///
    /// Completion is what makes a step a rollback target.
    pub fn complete(&mut self, result: Option<serde_json::Value>) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.compensation_required = true;
        self.result = result;
    }

    /// Mark the step failed
    pub fn fail(&mut self, error: impl Into<String>, compensation_required: bool) {
        self.status = StepStatus::Failed;
        self.error_message = Some(error.into());
        self.compensation_required = compensation_required;
    }

    /// Mark the step compensated
    pub fn compensate(&mut self) {
        self.status = StepStatus::Compensated;
        self.compensated_at = Some(Utc::now());
    }
}

/// Durable record of a saga instance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Saga {
    /// Unique identifier
    pub saga_id: SagaId,
    /// The registered plan this saga runs
    pub saga_type: SagaType,
    /// Causal-chain identifier carried on every event and request
    pub correlation_id: CorrelationId,
    /// Current state; mutated only through the store
    pub current_state: SagaState,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Set when the saga reaches a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure detail, if any
    pub error_message: Option<String>,
    /// Ordered step records
    pub steps: Vec<SagaStep>,
    /// Append-only transition log
    pub transitions: Vec<SagaTransition>,
    /// Aggregate fields captured at admission
    pub context: serde_json::Value,
}

impl Saga {
    /// Create a freshly admitted saga in the `Started` state
    pub fn new(
        saga_id: SagaId,
        saga_type: SagaType,
        correlation_id: CorrelationId,
        context: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            saga_type,
            correlation_id,
            current_state: SagaState::Started,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
            steps: Vec::new(),
            transitions: Vec::new(),
            context,
        }
    }

    /// Whether the saga has settled
    pub fn is_terminal(&self) -> bool {
        self.current_state.is_terminal()
    }

    /// Find a step by name
    pub fn step(&self, name: StepName) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    /// Find a step by name, mutably
    pub fn step_mut(&mut self, name: StepName) -> Option<&mut SagaStep> {
        self.steps.iter_mut().find(|s| s.step_name == name)
    }

    /// Completed steps that still need compensation, most recent first
    ///
    /// The rollback walk visits steps strictly in reverse completion order.
    pub fn compensation_targets(&self) -> Vec<SagaStep> {
        let mut targets: Vec<SagaStep> = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed && s.compensation_required)
            .cloned()
            .collect();
        targets.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        targets
    }

    /// The last recorded transition, if any
    pub fn last_transition(&self) -> Option<&SagaTransition> {
        self.transitions.last()
    }
}

/// A single line item of an order-creation request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OrderItem {
    /// Product identifier
    pub product_id: String,
    /// Requested quantity
    pub quantity: u32,
    /// Unit price
    pub price: f64,
}

/// Admission request for a saga
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SagaRequest {
    /// The plan to run; must be registered
    pub saga_type: SagaType,
    /// Caller-supplied saga id, for idempotent admission
    #[serde(default)]
    pub saga_id: Option<SagaId>,
    /// Caller-supplied correlation id; defaults to the saga id
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Order aggregate id
    pub order_id: String,
    /// Customer placing the order
    pub customer_id: String,
    /// Optional store/fulfillment location
    #[serde(default)]
    pub store_id: Option<String>,
    /// Ordered items
    pub items: Vec<OrderItem>,
    /// Total order amount
    pub total_amount: f64,
    /// Payment method label
    #[serde(default)]
    pub payment_method: Option<String>,
}

impl SagaRequest {
    /// Validate the aggregate fields before any saga record is created
    pub fn validate(&self) -> CoordinationResult<()> {
        if self.order_id.trim().is_empty() {
            return Err(CoordinationError::ValidationError(
                "order_id must not be empty".to_string(),
            ));
        }
        if self.customer_id.trim().is_empty() {
            return Err(CoordinationError::ValidationError(
                "customer_id must not be empty".to_string(),
            ));
        }
        if self.items.is_empty() {
            return Err(CoordinationError::ValidationError(
                "items must not be empty".to_string(),
            ));
        }
        if self.total_amount < 0.0 {
            return Err(CoordinationError::ValidationError(
                "total_amount must not be negative".to_string(),
            ));
        }
        if self.items.iter().any(|i| i.quantity == 0) {
            return Err(CoordinationError::ValidationError(
                "item quantity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The aggregate fields as the context payload handed to participants
    pub fn context(&self) -> serde_json::Value {
        serde_json::json!({
            "order_id": &self.order_id,
            "customer_id": &self.customer_id,
            "store_id": &self.store_id,
            "items": &self.items,
            "total_amount": self.total_amount,
            "payment_method": &self.payment_method,
        })
    }
}

/// Final answer returned by `execute_saga`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SagaResponse {
    /// The saga that ran
    pub saga_id: SagaId,
    /// The plan it ran
    pub saga_type: SagaType,
    /// Terminal (or, for duplicate admission, current) state
    pub current_state: SagaState,
    /// Correlation id carried on every event
    pub correlation_id: CorrelationId,
    /// Ordered step history
    pub steps: Vec<SagaStep>,
    /// Admission time
    pub started_at: DateTime<Utc>,
    /// Settle time, when terminal
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds, when terminal
    pub duration_ms: Option<i64>,
    /// Failure detail, if any
    pub error_message: Option<String>,
}

impl SagaResponse {
    /// Snapshot a saga record into a response
    pub fn from_saga(saga: &Saga) -> Self {
        let duration_ms = saga
            .completed_at
            .map(|done| (done - saga.created_at).num_milliseconds());
        Self {
            saga_id: saga.saga_id,
            saga_type: saga.saga_type,
            current_state: saga.current_state,
            correlation_id: saga.correlation_id.clone(),
            steps: saga.steps.clone(),
            started_at: saga.created_at,
            completed_at: saga.completed_at,
            duration_ms,
            error_message: saga.error_message.clone(),
        }
    }
}

/// Outcome of a compensation walk
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompensationResult {
    /// The saga that was compensated
    pub saga_id: SagaId,
    /// Causal-chain identifier carried on every response
    pub correlation_id: CorrelationId,
    /// State after the walk (`Compensated`, `Failed`, or unchanged on no-op)
    pub final_state: SagaState,
    /// Steps whose compensation succeeded, in walk order
    pub compensated_steps: Vec<StepName>,
    /// Steps whose compensation failed, in walk order
    pub failed_steps: Vec<StepName>,
    /// True when the saga was already compensated and the call was a no-op
    pub already_compensated: bool,
}
