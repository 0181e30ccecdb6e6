// Copyright 2025 Cowboy AI, LLC.

//! Controlled failure injector
//!
//! The injector sits beside the reference participants and decides, per
//! call, whether to reject it. Deterministic rules (keyed on the request
//! payload) take precedence over probabilistic draws so the failure-path
//! tests are repeatable. Every injected failure is published as a
//! `controlled_failure` event and counted separately from real failures.

use crate::events::{BusinessEvent, EventMetadata, Topic};
use crate::identifiers::{CorrelationId, SagaId};
use crate::metrics::SagaMetrics;
use crate::producer::BusinessEventProducer;
use crate::saga::StepName;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Injector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureConfig {
    /// Master switch for probabilistic draws; deterministic rules always apply
    pub enable_failures: bool,
    /// Probability of an insufficient-stock verdict on stock steps
    pub insufficient_stock_probability: f64,
    /// Probability of a payment decline on the payment step
    pub payment_failure_probability: f64,
    /// Probability of a simulated network timeout on any step
    pub network_timeout_probability: f64,
    /// Probability of a simulated database failure on any step
    pub database_failure_probability: f64,
    /// Probability of a simulated 503 on any step
    pub service_unavailable_probability: f64,
    /// Artificial latency before an injected failure is returned
    pub failure_delay_ms: u64,
    /// Payments above this amount are deterministically declined
    pub high_amount_threshold: f64,
    /// Item quantities above this are deterministically out of stock
    pub high_quantity_threshold: u32,
    /// Customer ids with this suffix are deterministically declined
    pub failed_customer_suffix: String,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            enable_failures: false,
            insufficient_stock_probability: 0.0,
            payment_failure_probability: 0.0,
            network_timeout_probability: 0.0,
            database_failure_probability: 0.0,
            service_unavailable_probability: 0.0,
            failure_delay_ms: 0,
            high_amount_threshold: 1000.0,
            high_quantity_threshold: 100,
            failed_customer_suffix: "_failed".to_string(),
        }
    }
}

/// Kinds of failure the injector can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Business verdict: requested quantity not available
    InsufficientStock,
    /// Business verdict: payment declined
    PaymentDeclined,
    /// Transport fault: simulated timeout
    NetworkTimeout,
    /// Transport fault: simulated storage outage
    DatabaseFailure,
    /// Transport fault: simulated 503
    ServiceUnavailable,
}

impl FailureKind {
    /// Transport faults surface as call errors (and get retried);
    /// business verdicts surface as `success: false` responses.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FailureKind::NetworkTimeout
                | FailureKind::DatabaseFailure
                | FailureKind::ServiceUnavailable
        )
    }

    /// Stable label for metrics and events
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InsufficientStock => "InsufficientStock",
            FailureKind::PaymentDeclined => "PaymentDeclined",
            FailureKind::NetworkTimeout => "NetworkTimeout",
            FailureKind::DatabaseFailure => "DatabaseFailure",
            FailureKind::ServiceUnavailable => "ServiceUnavailable",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure the injector decided to produce
#[derive(Debug, Clone)]
pub struct InjectedFailure {
    /// What kind of failure to simulate
    pub kind: FailureKind,
    /// Message handed to the participant response or error
    pub message: String,
}

/// Deterministic-then-probabilistic failure injector
pub struct FailureInjector {
    config: FailureConfig,
    rng: Mutex<StdRng>,
    producer: Option<BusinessEventProducer>,
    metrics: Option<Arc<SagaMetrics>>,
}

impl std::fmt::Debug for FailureInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureInjector")
            .field("config", &self.config)
            .finish()
    }
}

impl FailureInjector {
    /// Create an injector from configuration
    pub fn new(config: FailureConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
            producer: None,
            metrics: None,
        }
    }

    /// Seed the probabilistic draws, for repeatable tests
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Attach the producer and metrics so injected failures are observable
    pub fn with_observability(
        mut self,
        producer: BusinessEventProducer,
        metrics: Arc<SagaMetrics>,
    ) -> Self {
        self.producer = Some(producer);
        self.metrics = Some(metrics);
        self
    }

    /// The active configuration
    pub fn config(&self) -> &FailureConfig {
        &self.config
    }

    /// Decide whether this call fails
    ///
    /// `data` is the participant request payload (admission fields plus
    /// prior step outputs).
    pub async fn evaluate(
        &self,
        participant: &str,
        saga_id: SagaId,
        correlation_id: &CorrelationId,
        step: StepName,
        data: &serde_json::Value,
    ) -> Option<InjectedFailure> {
        let failure = self
            .deterministic_rule(step, data)
            .or_else(|| self.probabilistic_draw(step))?;

        if self.config.failure_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.failure_delay_ms)).await;
        }

        info!(
            participant = %participant,
            saga_id = %saga_id,
            step = %step,
            kind = %failure.kind,
            "injecting controlled failure"
        );

        if let Some(metrics) = &self.metrics {
            metrics.controlled_failure(failure.kind.as_str(), participant);
        }
        if let Some(producer) = &self.producer {
            let event = BusinessEvent::new(
                "controlled_failure",
                saga_id.to_string(),
                "Saga",
                correlation_id.clone(),
                serde_json::json!({
                    "kind": failure.kind.as_str(),
                    "step": step.as_str(),
                    "message": &failure.message,
                }),
                EventMetadata::for_saga(saga_id, participant),
            );
            // Injection must not depend on log availability.
            let _ = producer.publish(&Topic::business_events(), event).await;
        }

        Some(failure)
    }

    fn deterministic_rule(
        &self,
        step: StepName,
        data: &serde_json::Value,
    ) -> Option<InjectedFailure> {
        match step {
            StepName::VerifyStock => {
                let items = data.get("items")?.as_array()?;
                let over = items.iter().find(|item| {
                    item.get("quantity")
                        .and_then(|q| q.as_u64())
                        .is_some_and(|q| q > u64::from(self.config.high_quantity_threshold))
                })?;
                let product = over
                    .get("product_id")
                    .and_then(|p| p.as_str())
                    .unwrap_or("unknown");
                Some(InjectedFailure {
                    kind: FailureKind::InsufficientStock,
                    message: format!(
                        "requested quantity for {product} exceeds available stock"
                    ),
                })
            }
            StepName::ProcessPayment => {
                let customer = data.get("customer_id").and_then(|c| c.as_str());
                if let Some(customer) = customer {
                    if customer.ends_with(&self.config.failed_customer_suffix) {
                        return Some(InjectedFailure {
                            kind: FailureKind::PaymentDeclined,
                            message: format!("payment declined for customer {customer}"),
                        });
                    }
                }
                let amount = data.get("total_amount").and_then(|a| a.as_f64())?;
                (amount > self.config.high_amount_threshold).then(|| InjectedFailure {
                    kind: FailureKind::PaymentDeclined,
                    message: format!(
                        "amount {amount:.2} exceeds approval threshold {:.2}",
                        self.config.high_amount_threshold
                    ),
                })
            }
            _ => None,
        }
    }

    fn probabilistic_draw(&self, step: StepName) -> Option<InjectedFailure> {
        if !self.config.enable_failures {
            return None;
        }

        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut draw = |p: f64| p > 0.0 && rng.gen::<f64>() < p;

        let stock_step = matches!(step, StepName::VerifyStock | StepName::ReserveStock);
        if stock_step && draw(self.config.insufficient_stock_probability) {
            return Some(InjectedFailure {
                kind: FailureKind::InsufficientStock,
                message: "injected insufficient stock".to_string(),
            });
        }
        if step == StepName::ProcessPayment && draw(self.config.payment_failure_probability) {
            return Some(InjectedFailure {
                kind: FailureKind::PaymentDeclined,
                message: "injected payment decline".to_string(),
            });
        }
        if draw(self.config.network_timeout_probability) {
            return Some(InjectedFailure {
                kind: FailureKind::NetworkTimeout,
                message: "injected network timeout".to_string(),
            });
        }
        if draw(self.config.database_failure_probability) {
            return Some(InjectedFailure {
                kind: FailureKind::DatabaseFailure,
                message: "injected database failure".to_string(),
            });
        }
        if draw(self.config.service_unavailable_probability) {
            return Some(InjectedFailure {
                kind: FailureKind::ServiceUnavailable,
                message: "injected service unavailable".to_string(),
            });
        }
        None
    }
}
