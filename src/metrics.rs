// Copyright 2025 Cowboy AI, LLC.

//! Prometheus metrics for saga behavior
//!
//! Accumulators are append-only process-wide state; everything else in the
//! coordinator is injected. All metrics hang off one registry so the HTTP
//! surface can render a single text exposition.

use crate::errors::CoordinationResult;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Labeled counters, histograms, and gauges for the saga core
#[derive(Clone)]
pub struct SagaMetrics {
    registry: Registry,

    sagas_started: IntCounterVec,
    sagas_succeeded: IntCounterVec,
    sagas_failed: IntCounterVec,

    steps_executed: IntCounterVec,
    steps_succeeded: IntCounterVec,
    steps_failed: IntCounterVec,

    compensations_executed: IntCounterVec,
    compensations_succeeded: IntCounterVec,
    compensations_failed: IntCounterVec,

    controlled_failures: IntCounterVec,
    events_produced: IntCounterVec,
    state_transitions: IntCounterVec,

    saga_duration: HistogramVec,
    step_duration: HistogramVec,
    compensation_duration: HistogramVec,

    active_sagas: IntGaugeVec,
    sagas_by_state: IntGaugeVec,
}

impl std::fmt::Debug for SagaMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaMetrics").finish()
    }
}

impl SagaMetrics {
    /// Create the metric families and register them
    pub fn new() -> CoordinationResult<Self> {
        let registry = Registry::new();

        let sagas_started = IntCounterVec::new(
            Opts::new("saga_sagas_started_total", "Sagas admitted"),
            &["saga_type"],
        )?;
        let sagas_succeeded = IntCounterVec::new(
            Opts::new("saga_sagas_succeeded_total", "Sagas that completed"),
            &["saga_type"],
        )?;
        let sagas_failed = IntCounterVec::new(
            Opts::new("saga_sagas_failed_total", "Sagas that failed"),
            &["saga_type", "reason"],
        )?;

        let steps_executed = IntCounterVec::new(
            Opts::new("saga_steps_executed_total", "Participant steps dispatched"),
            &["saga_type", "step", "participant"],
        )?;
        let steps_succeeded = IntCounterVec::new(
            Opts::new("saga_steps_succeeded_total", "Participant steps that succeeded"),
            &["saga_type", "step", "participant"],
        )?;
        let steps_failed = IntCounterVec::new(
            Opts::new("saga_steps_failed_total", "Participant steps that failed"),
            &["saga_type", "step", "participant"],
        )?;

        let compensations_executed = IntCounterVec::new(
            Opts::new(
                "saga_compensations_executed_total",
                "Compensation calls dispatched",
            ),
            &["saga_type", "step", "participant"],
        )?;
        let compensations_succeeded = IntCounterVec::new(
            Opts::new(
                "saga_compensations_succeeded_total",
                "Compensation calls that succeeded",
            ),
            &["saga_type", "step", "participant"],
        )?;
        let compensations_failed = IntCounterVec::new(
            Opts::new(
                "saga_compensations_failed_total",
                "Compensation calls that failed",
            ),
            &["saga_type", "step", "participant"],
        )?;

        let controlled_failures = IntCounterVec::new(
            Opts::new("saga_controlled_failures_total", "Injected failures"),
            &["kind", "participant"],
        )?;
        let events_produced = IntCounterVec::new(
            Opts::new("saga_events_produced_total", "Business events appended"),
            &["topic", "event_type"],
        )?;
        let state_transitions = IntCounterVec::new(
            Opts::new("saga_state_transitions_total", "Saga state transitions"),
            &["saga_type", "from_state", "to_state"],
        )?;

        let saga_duration = HistogramVec::new(
            HistogramOpts::new("saga_duration_seconds", "Wall-clock saga duration"),
            &["saga_type", "outcome"],
        )?;
        let step_duration = HistogramVec::new(
            HistogramOpts::new("saga_step_duration_seconds", "Wall-clock step duration"),
            &["saga_type", "outcome"],
        )?;
        let compensation_duration = HistogramVec::new(
            HistogramOpts::new(
                "saga_compensation_duration_seconds",
                "Wall-clock compensation walk duration",
            ),
            &["saga_type", "outcome"],
        )?;

        let active_sagas = IntGaugeVec::new(
            Opts::new("saga_active_sagas", "Sagas currently running"),
            &["saga_type"],
        )?;
        let sagas_by_state = IntGaugeVec::new(
            Opts::new("saga_sagas_by_state", "Sagas per state"),
            &["saga_type", "state"],
        )?;

        registry.register(Box::new(sagas_started.clone()))?;
        registry.register(Box::new(sagas_succeeded.clone()))?;
        registry.register(Box::new(sagas_failed.clone()))?;
        registry.register(Box::new(steps_executed.clone()))?;
        registry.register(Box::new(steps_succeeded.clone()))?;
        registry.register(Box::new(steps_failed.clone()))?;
        registry.register(Box::new(compensations_executed.clone()))?;
        registry.register(Box::new(compensations_succeeded.clone()))?;
        registry.register(Box::new(compensations_failed.clone()))?;
        registry.register(Box::new(controlled_failures.clone()))?;
        registry.register(Box::new(events_produced.clone()))?;
        registry.register(Box::new(state_transitions.clone()))?;
        registry.register(Box::new(saga_duration.clone()))?;
        registry.register(Box::new(step_duration.clone()))?;
        registry.register(Box::new(compensation_duration.clone()))?;
        registry.register(Box::new(active_sagas.clone()))?;
        registry.register(Box::new(sagas_by_state.clone()))?;

        Ok(Self {
            registry,
            sagas_started,
            sagas_succeeded,
            sagas_failed,
            steps_executed,
            steps_succeeded,
            steps_failed,
            compensations_executed,
            compensations_succeeded,
            compensations_failed,
            controlled_failures,
            events_produced,
            state_transitions,
            saga_duration,
            step_duration,
            compensation_duration,
            active_sagas,
            sagas_by_state,
        })
    }

    /// Record a saga admission
    pub fn saga_started(&self, saga_type: &str) {
        self.sagas_started.with_label_values(&[saga_type]).inc();
        self.active_sagas.with_label_values(&[saga_type]).inc();
    }

    /// Record a saga completion
    pub fn saga_succeeded(&self, saga_type: &str) {
        self.sagas_succeeded.with_label_values(&[saga_type]).inc();
        self.active_sagas.with_label_values(&[saga_type]).dec();
    }

    /// Record a saga failure (including compensated outcomes)
    pub fn saga_failed(&self, saga_type: &str, reason: &str) {
        self.sagas_failed
            .with_label_values(&[saga_type, reason])
            .inc();
        self.active_sagas.with_label_values(&[saga_type]).dec();
    }

    /// Record a step dispatch
    pub fn step_executed(&self, saga_type: &str, step: &str, participant: &str) {
        self.steps_executed
            .with_label_values(&[saga_type, step, participant])
            .inc();
    }

    /// Record a step success verdict
    pub fn step_succeeded(&self, saga_type: &str, step: &str, participant: &str) {
        self.steps_succeeded
            .with_label_values(&[saga_type, step, participant])
            .inc();
    }

    /// Record a step failure
    pub fn step_failed(&self, saga_type: &str, step: &str, participant: &str) {
        self.steps_failed
            .with_label_values(&[saga_type, step, participant])
            .inc();
    }

    /// Record a compensation dispatch
    pub fn compensation_executed(&self, saga_type: &str, step: &str, participant: &str) {
        self.compensations_executed
            .with_label_values(&[saga_type, step, participant])
            .inc();
    }

    /// Record a compensation success
    pub fn compensation_succeeded(&self, saga_type: &str, step: &str, participant: &str) {
        self.compensations_succeeded
            .with_label_values(&[saga_type, step, participant])
            .inc();
    }

    /// Record a compensation failure
    pub fn compensation_failed(&self, saga_type: &str, step: &str, participant: &str) {
        self.compensations_failed
            .with_label_values(&[saga_type, step, participant])
            .inc();
    }

    /// Record an injected failure
    pub fn controlled_failure(&self, kind: &str, participant: &str) {
        self.controlled_failures
            .with_label_values(&[kind, participant])
            .inc();
    }

    /// Record a produced business event
    pub fn event_produced(&self, topic: &str, event_type: &str) {
        self.events_produced
            .with_label_values(&[topic, event_type])
            .inc();
    }

    /// Record a state transition and move the per-state gauge
    pub fn state_transition(&self, saga_type: &str, from_state: &str, to_state: &str) {
        self.state_transitions
            .with_label_values(&[saga_type, from_state, to_state])
            .inc();
        self.sagas_by_state
            .with_label_values(&[saga_type, from_state])
            .dec();
        self.sagas_by_state
            .with_label_values(&[saga_type, to_state])
            .inc();
    }

    /// A saga entered its initial state
    pub fn state_entered(&self, saga_type: &str, state: &str) {
        self.sagas_by_state.with_label_values(&[saga_type, state]).inc();
    }

    /// Observe a saga's wall-clock duration
    pub fn observe_saga_duration(&self, saga_type: &str, outcome: &str, seconds: f64) {
        self.saga_duration
            .with_label_values(&[saga_type, outcome])
            .observe(seconds);
    }

    /// Observe a step's wall-clock duration
    pub fn observe_step_duration(&self, saga_type: &str, outcome: &str, seconds: f64) {
        self.step_duration
            .with_label_values(&[saga_type, outcome])
            .observe(seconds);
    }

    /// Observe a compensation walk's wall-clock duration
    pub fn observe_compensation_duration(&self, saga_type: &str, outcome: &str, seconds: f64) {
        self.compensation_duration
            .with_label_values(&[saga_type, outcome])
            .observe(seconds);
    }

    /// Render the registry as Prometheus text exposition
    pub fn render(&self) -> CoordinationResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(crate::errors::CoordinationError::from)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::errors::CoordinationError::Metrics(e.to_string()))
    }
}
