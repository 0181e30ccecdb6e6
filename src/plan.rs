// Copyright 2025 Cowboy AI, LLC.

//! Registered step plans
//!
//! Plans are linear per saga type; branching business logic belongs in a
//! distinct saga type. Each step owns the pair of states the orchestrator
//! walks through around the participant call.

use crate::errors::{CoordinationError, CoordinationResult};
use crate::saga::{SagaType, StepName};
use crate::state_machine::{SagaState, State};
use std::collections::HashMap;

/// One step of a plan: the participant to call and the states around it
#[derive(Debug, Clone)]
pub struct StepDefinition {
    /// The named operation
    pub name: StepName,
    /// Logical service that executes and compensates the step
    pub participant: String,
    /// State entered before the participant call
    pub in_progress: SagaState,
    /// State entered after a success verdict
    pub on_success: SagaState,
}

impl StepDefinition {
    /// Define a step
    pub fn new(
        name: StepName,
        participant: impl Into<String>,
        in_progress: SagaState,
        on_success: SagaState,
    ) -> Self {
        Self {
            name,
            participant: participant.into(),
            in_progress,
            on_success,
        }
    }
}

/// A linear step plan for one saga type
#[derive(Debug, Clone)]
pub struct SagaPlan {
    /// The saga type this plan runs
    pub saga_type: SagaType,
    /// Ordered steps
    pub steps: Vec<StepDefinition>,
}

impl SagaPlan {
    /// Build a plan, validating that its states chain through the
    /// transition table and end in `Completed`
    pub fn new(saga_type: SagaType, steps: Vec<StepDefinition>) -> CoordinationResult<Self> {
        if steps.is_empty() {
            return Err(CoordinationError::ValidationError(format!(
                "plan for {saga_type} has no steps"
            )));
        }

        let mut current = SagaState::Started;
        for step in &steps {
            if !current.can_transition_to(&step.in_progress) {
                return Err(CoordinationError::ValidationError(format!(
                    "plan for {saga_type}: step {} unreachable from {}",
                    step.name,
                    current.name()
                )));
            }
            if !step.in_progress.can_transition_to(&step.on_success) {
                return Err(CoordinationError::ValidationError(format!(
                    "plan for {saga_type}: step {} cannot settle from {} to {}",
                    step.name,
                    step.in_progress.name(),
                    step.on_success.name()
                )));
            }
            current = step.on_success;
        }

        if current != SagaState::Completed {
            return Err(CoordinationError::ValidationError(format!(
                "plan for {saga_type} must end in Completed, ends in {}",
                current.name()
            )));
        }

        Ok(Self { saga_type, steps })
    }

    /// The canonical order-creation plan
    pub fn order_creation() -> Self {
        // Validated by construction; the expect documents a programming
        // error, not a runtime condition.
        Self::new(
            SagaType::OrderCreation,
            vec![
                StepDefinition::new(
                    StepName::VerifyStock,
                    "inventory-service",
                    SagaState::StockVerifying,
                    SagaState::StockVerified,
                ),
                StepDefinition::new(
                    StepName::ReserveStock,
                    "inventory-service",
                    SagaState::StockReserving,
                    SagaState::StockReserved,
                ),
                StepDefinition::new(
                    StepName::ProcessPayment,
                    "payment-service",
                    SagaState::PaymentProcessing,
                    SagaState::PaymentProcessed,
                ),
                StepDefinition::new(
                    StepName::ConfirmOrder,
                    "order-service",
                    SagaState::OrderConfirming,
                    SagaState::Completed,
                ),
            ],
        )
        .expect("order-creation plan is statically valid")
    }

    /// Logical service names the plan depends on
    pub fn participants(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.participant.as_str()).collect()
    }
}

/// Lookup from saga type to registered plan
#[derive(Debug, Clone, Default)]
pub struct PlanRegistry {
    plans: HashMap<SagaType, SagaPlan>,
}

impl PlanRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the canonical order-creation plan installed
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SagaPlan::order_creation());
        registry
    }

    /// Register (or replace) a plan
    pub fn register(&mut self, plan: SagaPlan) {
        self.plans.insert(plan.saga_type, plan);
    }

    /// Resolve a plan for a saga type
    pub fn get(&self, saga_type: SagaType) -> CoordinationResult<&SagaPlan> {
        self.plans
            .get(&saga_type)
            .ok_or_else(|| CoordinationError::PlanUnknown(saga_type.to_string()))
    }
}
