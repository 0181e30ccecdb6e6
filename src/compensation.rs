// Copyright 2025 Cowboy AI, LLC.

//! Compensation engine
//!
//! Walks the completed steps of a saga in reverse completion order and asks
//! each participant to undo its work. The walk is best-effort: a failed
//! compensation is recorded and the walk continues, because stopping early
//! would leave the earlier completed steps un-compensated. The saga settles
//! in `Compensated` only when every targeted step was undone, otherwise in
//! `Failed` with the un-compensated tail still marked `Completed`.

use crate::errors::{CoordinationError, CoordinationResult};
use crate::events::{BusinessEvent, Topic};
use crate::identifiers::SagaId;
use crate::participant::{CompensateStepRequest, ParticipantClient};
use crate::producer::BusinessEventProducer;
use crate::saga::{CompensationResult, Saga, SagaTransition, StepName, TransitionKind};
use crate::state_machine::{SagaState, State};
use crate::store::SagaStore;
use crate::journal::{Category, Journal, JournalRecord, Severity};
use crate::metrics::SagaMetrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Drives the rollback walk for a saga
#[derive(Debug, Clone)]
pub struct CompensationEngine {
    store: Arc<dyn SagaStore>,
    producer: BusinessEventProducer,
    client: ParticipantClient,
    metrics: Arc<SagaMetrics>,
    journal: Journal,
    service_name: String,
}

impl CompensationEngine {
    /// Create an engine over the shared store, producer, and client
    pub fn new(
        store: Arc<dyn SagaStore>,
        producer: BusinessEventProducer,
        client: ParticipantClient,
        metrics: Arc<SagaMetrics>,
        journal: Journal,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            producer,
            client,
            metrics,
            journal,
            service_name: service_name.into(),
        }
    }

    /// Compensate a saga, idempotently
    ///
    /// Already-compensated sagas return a successful no-op; sagas settled in
    /// `Completed` or `Failed` are rejected as terminal.
    pub async fn compensate(
        &self,
        saga_id: SagaId,
        reason: &str,
    ) -> CoordinationResult<CompensationResult> {
        let saga = self.store.read_saga(saga_id).await?;

        match saga.current_state {
            SagaState::Compensated => {
                return Ok(CompensationResult {
                    saga_id,
                    correlation_id: saga.correlation_id.clone(),
                    final_state: SagaState::Compensated,
                    compensated_steps: vec![],
                    failed_steps: vec![],
                    already_compensated: true,
                });
            }
            state if state.is_terminal() => {
                return Err(CoordinationError::SagaAlreadyTerminal {
                    saga_id: saga_id.to_string(),
                    state: state.name().to_string(),
                });
            }
            SagaState::Compensating => {
                // Resuming a walk that was interrupted mid-flight.
            }
            from => {
                self.enter_compensating(&saga, from, reason).await?;
            }
        }

        let started = Instant::now();
        let saga = self.store.read_saga(saga_id).await?;
        let targets = saga.compensation_targets();
        info!(
            saga_id = %saga_id,
            targets = targets.len(),
            reason = %reason,
            "starting compensation walk"
        );

        let mut compensated: Vec<StepName> = Vec::new();
        let mut failed: Vec<StepName> = Vec::new();

        for step in targets {
            let step_name = step.step_name;
            let participant = step.participant_service.clone();
            self.metrics.compensation_executed(
                saga.saga_type.as_str(),
                step_name.as_str(),
                &participant,
            );

            let request = CompensateStepRequest {
                saga_id,
                step_name,
                reason: reason.to_string(),
                data: serde_json::json!({
                    "context": &saga.context,
                    "result": &step.result,
                }),
                correlation_id: saga.correlation_id.clone(),
            };

            let outcome = self.client.compensate_step(&participant, request).await;
            match outcome {
                Ok(response) if response.success => {
                    let mut updated = step.clone();
                    updated.compensate();
                    self.store.record_step_result(saga_id, updated).await?;
                    self.record_walk_transition(
                        &saga,
                        step_name,
                        TransitionKind::Compensation,
                        format!("compensated {step_name}"),
                    )
                    .await?;
                    self.metrics.compensation_succeeded(
                        saga.saga_type.as_str(),
                        step_name.as_str(),
                        &participant,
                    );
                    self.journal_walk(&saga, "compensation_step_succeeded", step_name, Severity::Info);
                    compensated.push(step_name);
                }
                Ok(response) => {
                    let message = response
                        .error_message
                        .unwrap_or_else(|| "compensation rejected".to_string());
                    self.record_compensation_failure(&saga, step_name, &participant, &message)
                        .await?;
                    failed.push(step_name);
                }
                Err(err) => {
                    self.record_compensation_failure(&saga, step_name, &participant, &err.to_string())
                        .await?;
                    failed.push(step_name);
                }
            }
        }

        let final_state = if failed.is_empty() {
            SagaState::Compensated
        } else {
            SagaState::Failed
        };
        self.settle(&saga, final_state, reason, &failed).await?;

        let outcome_label = final_state.name();
        self.metrics.observe_compensation_duration(
            saga.saga_type.as_str(),
            outcome_label,
            started.elapsed().as_secs_f64(),
        );

        Ok(CompensationResult {
            saga_id,
            correlation_id: saga.correlation_id.clone(),
            final_state,
            compensated_steps: compensated,
            failed_steps: failed,
            already_compensated: false,
        })
    }

    /// Event append precedes the state commit.
    async fn enter_compensating(
        &self,
        saga: &Saga,
        from: SagaState,
        reason: &str,
    ) -> CoordinationResult<()> {
        let event = BusinessEvent::for_saga(
            saga.saga_id,
            "compensation_started",
            saga.correlation_id.clone(),
            &self.service_name,
            serde_json::json!({
                "from_state": from.name(),
                "reason": reason,
            }),
        );
        self.producer
            .publish(&Topic::saga_orchestration(), event)
            .await?;

        let transition = SagaTransition::new(
            saga.saga_id,
            from,
            SagaState::Compensating,
            &self.service_name,
            "compensation_started",
            TransitionKind::Compensation,
        )
        .with_message(reason.to_string());
        self.metrics
            .state_transition(saga.saga_type.as_str(), from.name(), "Compensating");
        self.store
            .update_saga_state(saga.saga_id, from, SagaState::Compensating, transition)
            .await
    }

    async fn record_walk_transition(
        &self,
        saga: &Saga,
        step_name: StepName,
        kind: TransitionKind,
        message: String,
    ) -> CoordinationResult<()> {
        let event = BusinessEvent::for_saga(
            saga.saga_id,
            "compensation_step_recorded",
            saga.correlation_id.clone(),
            &self.service_name,
            serde_json::json!({
                "step": step_name.as_str(),
                "message": &message,
            }),
        );
        self.producer
            .publish(&Topic::saga_orchestration(), event)
            .await?;

        let transition = SagaTransition::new(
            saga.saga_id,
            SagaState::Compensating,
            SagaState::Compensating,
            &self.service_name,
            format!("compensate_step:{step_name}"),
            kind,
        )
        .with_message(message);
        self.store.append_transition(saga.saga_id, transition).await
    }

    async fn record_compensation_failure(
        &self,
        saga: &Saga,
        step_name: StepName,
        participant: &str,
        message: &str,
    ) -> CoordinationResult<()> {
        warn!(
            saga_id = %saga.saga_id,
            step = %step_name,
            participant = %participant,
            error = %message,
            "compensation step failed, continuing walk"
        );
        self.metrics
            .compensation_failed(saga.saga_type.as_str(), step_name.as_str(), participant);
        self.journal_walk(saga, "compensation_step_failed", step_name, Severity::Error);
        self.record_walk_transition(
            saga,
            step_name,
            TransitionKind::Failure,
            format!("compensation of {step_name} failed: {message}"),
        )
        .await
    }

    async fn settle(
        &self,
        saga: &Saga,
        final_state: SagaState,
        reason: &str,
        failed: &[StepName],
    ) -> CoordinationResult<()> {
        let (event_type, kind) = match final_state {
            SagaState::Compensated => ("saga_compensated", TransitionKind::Compensation),
            _ => ("saga_failed", TransitionKind::Failure),
        };

        let event = BusinessEvent::for_saga(
            saga.saga_id,
            event_type,
            saga.correlation_id.clone(),
            &self.service_name,
            serde_json::json!({
                "reason": reason,
                "uncompensated_steps": failed.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            }),
        );
        self.producer
            .publish(&Topic::saga_orchestration(), event)
            .await?;

        let mut transition = SagaTransition::new(
            saga.saga_id,
            SagaState::Compensating,
            final_state,
            &self.service_name,
            event_type,
            kind,
        );
        if final_state == SagaState::Failed {
            transition = transition.with_message(format!(
                "compensation incomplete: {} step(s) not compensated",
                failed.len()
            ));
        }
        self.metrics.state_transition(
            saga.saga_type.as_str(),
            "Compensating",
            final_state.name(),
        );
        self.store
            .update_saga_state(saga.saga_id, SagaState::Compensating, final_state, transition)
            .await?;

        self.journal.record(
            JournalRecord::new(
                event_type,
                saga.saga_id,
                saga.saga_type.as_str(),
                &self.service_name,
                saga.correlation_id.clone(),
                if final_state == SagaState::Compensated {
                    Severity::Info
                } else {
                    Severity::Error
                },
                Category::Compensation,
            )
            .with("reason", serde_json::json!(reason)),
        );
        Ok(())
    }

    fn journal_walk(&self, saga: &Saga, event_type: &str, step: StepName, severity: Severity) {
        self.journal.record(
            JournalRecord::new(
                event_type,
                saga.saga_id,
                saga.saga_type.as_str(),
                &self.service_name,
                saga.correlation_id.clone(),
                severity,
                Category::Compensation,
            )
            .with("step", serde_json::json!(step.as_str())),
        );
    }
}
