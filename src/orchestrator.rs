// Copyright 2025 Cowboy AI, LLC.

//! Saga orchestrator
//!
//! The scheduler: admits saga requests, walks the registered step plan
//! strictly in order, and hands failures to the compensation engine. Many
//! sagas run concurrently on independent tasks; a per-saga lock keeps each
//! saga single-writer. Every state change follows the same discipline: the
//! business event is appended to the log before the new state is committed
//! to the store, and the store commit is durable before the next
//! participant call.

use crate::compensation::CompensationEngine;
use crate::config::CoordinatorConfig;
use crate::errors::{CoordinationError, CoordinationResult};
use crate::events::{BusinessEvent, Topic};
use crate::event_log::EventStatistics;
use crate::identifiers::{CorrelationId, SagaId};
use crate::journal::{Category, Journal, JournalRecord, Severity};
use crate::metrics::SagaMetrics;
use crate::participant::{ExecuteStepRequest, ParticipantClient};
use crate::plan::{PlanRegistry, SagaPlan};
use crate::producer::BusinessEventProducer;
use crate::saga::{
    CompensationResult, Saga, SagaRequest, SagaResponse, SagaStep, SagaTransition, TransitionKind,
};
use crate::state_machine::{SagaState, State};
use crate::store::SagaStore;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Coordinates saga execution end to end
pub struct SagaOrchestrator {
    store: Arc<dyn SagaStore>,
    producer: BusinessEventProducer,
    client: ParticipantClient,
    plans: PlanRegistry,
    compensation: CompensationEngine,
    metrics: Arc<SagaMetrics>,
    journal: Journal,
    config: CoordinatorConfig,
    /// One mutex per saga id enforces the single-writer rule.
    locks: Mutex<HashMap<SagaId, Arc<Mutex<()>>>>,
    /// Cancellation is cooperative, checked between steps.
    cancellations: std::sync::Mutex<HashSet<SagaId>>,
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaOrchestrator")
            .field("service_name", &self.config.service_name)
            .finish()
    }
}

impl SagaOrchestrator {
    /// Wire an orchestrator from its collaborators
    pub fn new(
        store: Arc<dyn SagaStore>,
        producer: BusinessEventProducer,
        client: ParticipantClient,
        plans: PlanRegistry,
        metrics: Arc<SagaMetrics>,
        journal: Journal,
        config: CoordinatorConfig,
    ) -> Self {
        let compensation = CompensationEngine::new(
            store.clone(),
            producer.clone(),
            client.clone(),
            metrics.clone(),
            journal.clone(),
            config.service_name.clone(),
        );
        Self {
            store,
            producer,
            client,
            plans,
            compensation,
            metrics,
            journal,
            config,
            locks: Mutex::new(HashMap::new()),
            cancellations: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// The active configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The metrics registry shared with the HTTP surface
    pub fn metrics(&self) -> Arc<SagaMetrics> {
        self.metrics.clone()
    }

    /// Per-topic event counters
    pub async fn event_statistics(&self) -> EventStatistics {
        self.producer.statistics().await
    }

    /// Admit and run a saga to a terminal state
    ///
    /// Duplicate admission with a supplied saga id is idempotent: a
    /// non-terminal duplicate returns the existing saga's status, a
    /// terminal duplicate is a conflict.
    pub async fn execute_saga(&self, request: SagaRequest) -> CoordinationResult<SagaResponse> {
        request.validate()?;
        let plan = self.plans.get(request.saga_type)?.clone();

        // Resolve every participant at admission; refuse otherwise.
        for step in &plan.steps {
            self.client
                .registry()
                .supports(&step.participant, step.name)
                .await?;
        }

        let saga_id = request.saga_id.unwrap_or_default();
        let correlation_id = request
            .correlation_id
            .clone()
            .map(CorrelationId::new)
            .unwrap_or_else(|| CorrelationId::from_saga(saga_id));

        let mut saga = Saga::new(saga_id, request.saga_type, correlation_id.clone(), request.context());
        for step in &plan.steps {
            saga.steps
                .push(SagaStep::pending(step.name, step.participant.clone()));
        }

        match self.store.create_saga(saga).await {
            Ok(()) => {}
            Err(CoordinationError::AlreadyExists(_)) => {
                let existing = self.store.read_saga(saga_id).await?;
                if existing.is_terminal() {
                    return Err(CoordinationError::AlreadyExists(saga_id.to_string()));
                }
                info!(saga_id = %saga_id, "duplicate admission, returning existing saga");
                return Ok(SagaResponse::from_saga(&existing));
            }
            Err(e) => return Err(e),
        }

        self.metrics.saga_started(request.saga_type.as_str());
        self.metrics
            .state_entered(request.saga_type.as_str(), SagaState::Started.name());
        self.journal.record(
            JournalRecord::new(
                "saga_started",
                saga_id,
                request.saga_type.as_str(),
                &self.config.service_name,
                correlation_id.clone(),
                Severity::Info,
                Category::Lifecycle,
            )
            .with("order_id", serde_json::json!(&request.order_id)),
        );
        info!(
            saga_id = %saga_id,
            saga_type = %request.saga_type,
            order_id = %request.order_id,
            "saga admitted"
        );

        // Admission record: a state-preserving transition, then the event.
        // Every later event is thereby preceded by at least one transition.
        self.store
            .append_transition(
                saga_id,
                SagaTransition::new(
                    saga_id,
                    SagaState::Started,
                    SagaState::Started,
                    &self.config.service_name,
                    "saga_started",
                    TransitionKind::Success,
                ),
            )
            .await?;
        let started_event = BusinessEvent::for_saga(
            saga_id,
            "saga_started",
            correlation_id.clone(),
            &self.config.service_name,
            request.context(),
        );
        self.producer
            .publish(&Topic::saga_orchestration(), started_event)
            .await?;

        let lock = self.lock_for(saga_id).await;
        let _guard = lock.lock().await;

        let run = self.run_plan(saga_id, &plan, &request, &correlation_id).await;
        self.clear_cancellation(saga_id);
        let failure_reason = run?;

        let snapshot = self.store.read_saga(saga_id).await?;
        self.settle_metrics(&snapshot, failure_reason.as_deref());
        Ok(SagaResponse::from_saga(&snapshot))
    }

    /// Consistent snapshot of a saga, including steps and transitions
    pub async fn get_saga_status(&self, saga_id: SagaId) -> CoordinationResult<Saga> {
        self.store.read_saga(saga_id).await
    }

    /// Force compensation of a non-terminal saga
    ///
    /// If the saga is mid-step, cancellation is requested instead and takes
    /// effect at the next step boundary; the current snapshot is returned.
    pub async fn compensate(&self, saga_id: SagaId) -> CoordinationResult<CompensationResult> {
        let snapshot = self.store.read_saga(saga_id).await?;

        let lock = self.lock_for(saga_id).await;
        let try_lock_result = lock.try_lock();
        let outcome = match try_lock_result {
            Ok(_guard) => {
                let result = self
                    .compensation
                    .compensate(saga_id, "compensation requested")
                    .await?;
                if !result.already_compensated {
                    let settled = self.store.read_saga(saga_id).await?;
                    self.settle_metrics(&settled, Some("forced"));
                }
                Ok(result)
            }
            Err(_) => {
                // In-flight saga: honor the running step, compensate at the
                // next safe point.
                info!(saga_id = %saga_id, "saga in flight, cancellation requested");
                self.request_cancellation(saga_id);
                Ok(CompensationResult {
                    saga_id,
                    correlation_id: snapshot.correlation_id.clone(),
                    final_state: snapshot.current_state,
                    compensated_steps: vec![],
                    failed_steps: vec![],
                    already_compensated: false,
                })
            }
        };
        outcome
    }

    /// Startup replay: force compensation of every non-terminal saga
    ///
    /// The resume-from-last-transition alternative needs participants that
    /// can report prior results; forcing compensation bounds the blast
    /// radius instead.
    pub async fn recover_incomplete(&self) -> CoordinationResult<Vec<SagaId>> {
        let incomplete = self.store.replay_incomplete().await?;
        if !incomplete.is_empty() {
            warn!(count = incomplete.len(), "recovering non-terminal sagas");
        }

        let mut recovered = Vec::new();
        for saga_id in incomplete {
            let lock = self.lock_for(saga_id).await;
            let _guard = lock.lock().await;
            match self
                .compensation
                .compensate(saga_id, "recovered after restart")
                .await
            {
                Ok(result) => {
                    if !result.already_compensated {
                        if let Ok(settled) = self.store.read_saga(saga_id).await {
                            self.settle_metrics(&settled, Some("recovery"));
                        }
                    }
                    recovered.push(saga_id);
                }
                Err(e) => {
                    error!(saga_id = %saga_id, error = %e, "recovery compensation failed");
                }
            }
        }
        Ok(recovered)
    }

    /// Sagas currently in the given state
    pub async fn list_by_state(&self, state: SagaState) -> CoordinationResult<Vec<Saga>> {
        self.store.list_by_state(state).await
    }

    /// Sagas of the given type
    pub async fn list_by_type(
        &self,
        saga_type: crate::saga::SagaType,
    ) -> CoordinationResult<Vec<Saga>> {
        self.store.list_by_type(saga_type).await
    }

    /// Remove terminal sagas older than the retention grace period
    pub async fn sweep_terminal(&self) -> CoordinationResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention_grace)
                .map_err(|e| CoordinationError::Generic(e.to_string()))?;

        let mut removed = 0usize;
        for state in [SagaState::Completed, SagaState::Compensated, SagaState::Failed] {
            for saga in self.store.list_by_state(state).await? {
                if saga.completed_at.is_some_and(|done| done < cutoff) {
                    self.store.delete_saga(saga.saga_id).await?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!(removed, "retention sweep removed terminal sagas");
        }
        Ok(removed)
    }

    async fn run_plan(
        &self,
        saga_id: SagaId,
        plan: &SagaPlan,
        request: &SagaRequest,
        correlation_id: &CorrelationId,
    ) -> CoordinationResult<Option<String>> {
        let deadline = Instant::now() + self.config.saga_deadline;
        let mut context = request.context();
        context["steps"] = serde_json::json!({});
        let mut current = SagaState::Started;

        for step_def in &plan.steps {
            if self.cancel_requested(saga_id) {
                self.compensation
                    .compensate(saga_id, "cancellation requested")
                    .await?;
                return Ok(Some("cancelled".to_string()));
            }
            if Instant::now() >= deadline {
                warn!(saga_id = %saga_id, "saga deadline exceeded, forcing compensation");
                self.transition(
                    saga_id,
                    request,
                    correlation_id,
                    current,
                    SagaState::Compensating,
                    TransitionKind::Failure,
                    "saga_deadline_exceeded",
                    Some("saga deadline exceeded".to_string()),
                )
                .await?;
                self.compensation
                    .compensate(saga_id, "saga deadline exceeded")
                    .await?;
                return Ok(Some("deadline_exceeded".to_string()));
            }

            let saga_type = request.saga_type.as_str();
            let step_name = step_def.name;
            let participant = step_def.participant.as_str();

            self.transition(
                saga_id,
                request,
                correlation_id,
                current,
                step_def.in_progress,
                TransitionKind::Success,
                "step_started",
                None,
            )
            .await?;
            current = step_def.in_progress;

            let mut step = SagaStep::pending(step_name, participant);
            step.begin();
            self.store.record_step_result(saga_id, step.clone()).await?;

            self.metrics
                .step_executed(saga_type, step_name.as_str(), participant);
            self.journal_step(saga_id, request, correlation_id, "step_started", step_name, Severity::Info);

            let exec_request = ExecuteStepRequest {
                saga_id,
                step_name,
                aggregate_id: request.order_id.clone(),
                data: context.clone(),
                correlation_id: correlation_id.clone(),
            };

            let step_started = Instant::now();
            let outcome = self.client.execute_step(participant, exec_request).await;
            let elapsed = step_started.elapsed().as_secs_f64();

            match outcome {
                Ok(response) if response.success => {
                    step.complete(response.data.clone());
                    self.store.record_step_result(saga_id, step).await?;
                    context["steps"][step_name.as_str()] =
                        response.data.unwrap_or(serde_json::Value::Null);

                    self.transition(
                        saga_id,
                        request,
                        correlation_id,
                        current,
                        step_def.on_success,
                        TransitionKind::Success,
                        "step_completed",
                        None,
                    )
                    .await?;
                    current = step_def.on_success;

                    self.metrics
                        .step_succeeded(saga_type, step_name.as_str(), participant);
                    self.metrics
                        .observe_step_duration(saga_type, "Completed", elapsed);
                    self.journal_step(
                        saga_id,
                        request,
                        correlation_id,
                        "step_completed",
                        step_name,
                        Severity::Info,
                    );
                }
                Ok(response) => {
                    let message = response
                        .error_message
                        .unwrap_or_else(|| "participant reported failure".to_string());
                    step.fail(message.clone(), response.compensation_required);
                    self.store.record_step_result(saga_id, step).await?;
                    self.fail_step(
                        saga_id,
                        request,
                        correlation_id,
                        current,
                        step_name,
                        participant,
                        elapsed,
                        &message,
                    )
                    .await?;
                    return Ok(Some("step_failure".to_string()));
                }
                Err(err) => {
                    // Transport faults exhausted their retries; deadline
                    // expiry lands here too. Both are step failures.
                    let message = err.to_string();
                    step.fail(message.clone(), false);
                    self.store.record_step_result(saga_id, step).await?;
                    self.fail_step(
                        saga_id,
                        request,
                        correlation_id,
                        current,
                        step_name,
                        participant,
                        elapsed,
                        &message,
                    )
                    .await?;
                    let reason = match err {
                        CoordinationError::Timeout(_) => "participant_timeout",
                        _ => "participant_unreachable",
                    };
                    return Ok(Some(reason.to_string()));
                }
            }
        }

        // The last step's settled state is Completed.
        let completed_event = BusinessEvent::for_saga(
            saga_id,
            "saga_completed",
            correlation_id.clone(),
            &self.config.service_name,
            serde_json::json!({"order_id": &request.order_id}),
        );
        self.producer
            .publish(&Topic::saga_orchestration(), completed_event)
            .await?;
        self.journal.record(JournalRecord::new(
            "saga_completed",
            saga_id,
            request.saga_type.as_str(),
            &self.config.service_name,
            correlation_id.clone(),
            Severity::Info,
            Category::Lifecycle,
        ));
        info!(saga_id = %saga_id, "saga completed");
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail_step(
        &self,
        saga_id: SagaId,
        request: &SagaRequest,
        correlation_id: &CorrelationId,
        current: SagaState,
        step_name: crate::saga::StepName,
        participant: &str,
        elapsed: f64,
        message: &str,
    ) -> CoordinationResult<()> {
        let saga_type = request.saga_type.as_str();
        warn!(
            saga_id = %saga_id,
            step = %step_name,
            participant = %participant,
            error = %message,
            "step failed, compensating"
        );
        self.metrics
            .step_failed(saga_type, step_name.as_str(), participant);
        self.metrics.observe_step_duration(saga_type, "Failed", elapsed);
        self.journal_step(
            saga_id,
            request,
            correlation_id,
            "step_failed",
            step_name,
            Severity::Error,
        );

        self.transition(
            saga_id,
            request,
            correlation_id,
            current,
            SagaState::Compensating,
            TransitionKind::Failure,
            "step_failed",
            Some(message.to_string()),
        )
        .await?;

        self.compensation.compensate(saga_id, message).await?;
        Ok(())
    }

    /// The one place forward transitions happen: event append first, state
    /// commit second.
    #[allow(clippy::too_many_arguments)]
    async fn transition(
        &self,
        saga_id: SagaId,
        request: &SagaRequest,
        correlation_id: &CorrelationId,
        from: SagaState,
        to: SagaState,
        kind: TransitionKind,
        action: &str,
        message: Option<String>,
    ) -> CoordinationResult<()> {
        let event = BusinessEvent::for_saga(
            saga_id,
            action,
            correlation_id.clone(),
            &self.config.service_name,
            serde_json::json!({
                "from_state": from.name(),
                "to_state": to.name(),
                "order_id": &request.order_id,
            }),
        );
        self.producer
            .publish(&Topic::saga_orchestration(), event)
            .await?;

        let mut transition = SagaTransition::new(
            saga_id,
            from,
            to,
            &self.config.service_name,
            action,
            kind,
        );
        if let Some(message) = message {
            transition = transition.with_message(message);
        }

        self.metrics
            .state_transition(request.saga_type.as_str(), from.name(), to.name());
        self.store
            .update_saga_state(saga_id, from, to, transition)
            .await
    }

    fn settle_metrics(&self, saga: &Saga, failure_reason: Option<&str>) {
        let saga_type = saga.saga_type.as_str();
        let outcome = saga.current_state.name();
        if let Some(done) = saga.completed_at {
            let seconds = (done - saga.created_at).num_milliseconds() as f64 / 1000.0;
            self.metrics
                .observe_saga_duration(saga_type, outcome, seconds.max(0.0));
        }
        match saga.current_state {
            SagaState::Completed => self.metrics.saga_succeeded(saga_type),
            SagaState::Compensated | SagaState::Failed => {
                self.metrics
                    .saga_failed(saga_type, failure_reason.unwrap_or("unknown"));
            }
            // Non-terminal snapshot (in-flight duplicate admission).
            _ => {}
        }
    }

    fn journal_step(
        &self,
        saga_id: SagaId,
        request: &SagaRequest,
        correlation_id: &CorrelationId,
        event_type: &str,
        step_name: crate::saga::StepName,
        severity: Severity,
    ) {
        self.journal.record(
            JournalRecord::new(
                event_type,
                saga_id,
                request.saga_type.as_str(),
                &self.config.service_name,
                correlation_id.clone(),
                severity,
                Category::Step,
            )
            .with("step", serde_json::json!(step_name.as_str())),
        );
    }

    async fn lock_for(&self, saga_id: SagaId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(saga_id).or_default().clone()
    }

    fn request_cancellation(&self, saga_id: SagaId) {
        let mut cancellations = match self.cancellations.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        cancellations.insert(saga_id);
    }

    fn cancel_requested(&self, saga_id: SagaId) -> bool {
        let cancellations = match self.cancellations.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        cancellations.contains(&saga_id)
    }

    fn clear_cancellation(&self, saga_id: SagaId) {
        let mut cancellations = match self.cancellations.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        cancellations.remove(&saga_id);
    }
}
