// Copyright 2025 Cowboy AI, LLC.

//! Participant contract and client
//!
//! A participant executes and compensates named steps. The verdict is a
//! value: `success: false` in a response is a business failure and is never
//! retried. Transport faults (connection refused, 5xx, timeouts) surface as
//! errors and are retried with bounded backoff before the step is failed.

use crate::errors::{CoordinationError, CoordinationResult};
use crate::identifiers::{CorrelationId, SagaId};
use crate::saga::StepName;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Request to execute a named step
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteStepRequest {
    /// The saga on whose behalf the step runs
    pub saga_id: SagaId,
    /// The named operation
    pub step_name: StepName,
    /// The order (or other aggregate) the step acts on
    pub aggregate_id: String,
    /// Context payload: admission fields plus prior step outputs
    pub data: serde_json::Value,
    /// Causal-chain identifier
    pub correlation_id: CorrelationId,
}

/// Verdict of a step execution
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteStepResponse {
    /// Explicit success/failure verdict
    pub success: bool,
    /// Result payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Whether the failed step left partial effects that need compensation
    #[serde(default)]
    pub compensation_required: bool,
}

impl ExecuteStepResponse {
    /// A success verdict with a result payload
    pub fn completed(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_message: None,
            compensation_required: false,
        }
    }

    /// A failure verdict
    pub fn failed(error_message: impl Into<String>, compensation_required: bool) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(error_message.into()),
            compensation_required,
        }
    }
}

/// Request to compensate a previously executed step
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompensateStepRequest {
    /// The saga being rolled back
    pub saga_id: SagaId,
    /// The named operation to undo
    pub step_name: StepName,
    /// Why the rollback is happening
    pub reason: String,
    /// Context payload, including the step's recorded result
    pub data: serde_json::Value,
    /// Causal-chain identifier
    pub correlation_id: CorrelationId,
}

/// Verdict of a compensation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompensateStepResponse {
    /// Explicit success/failure verdict
    pub success: bool,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CompensateStepResponse {
    /// A success verdict
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    /// A failure verdict
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(error_message.into()),
        }
    }
}

/// Identity card a participant publishes
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParticipantInfo {
    /// Logical service name used by plans and the registry
    pub service_name: String,
    /// Steps this participant knows how to execute and compensate
    pub supported_steps: Vec<StepName>,
}

/// Contract every cooperating service implements
///
/// `execute_step` must be idempotent per `(saga_id, step_name)`, every
/// successful step must admit a compensation, and participants publish their
/// outcome on their domain topic before returning.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SagaParticipant: Send + Sync {
    /// Execute a named step; `Err` means the call faulted, `Ok` carries the
    /// verdict
    async fn execute_step(
        &self,
        request: ExecuteStepRequest,
    ) -> CoordinationResult<ExecuteStepResponse>;

    /// Logically undo a previously successful step
    async fn compensate_step(
        &self,
        request: CompensateStepRequest,
    ) -> CoordinationResult<CompensateStepResponse>;

    /// Identity and supported steps
    fn info(&self) -> ParticipantInfo;
}

/// Lookup from logical service name to participant
#[derive(Default)]
pub struct ParticipantRegistry {
    participants: RwLock<HashMap<String, Arc<dyn SagaParticipant>>>,
}

impl std::fmt::Debug for ParticipantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantRegistry").finish()
    }
}

impl ParticipantRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant under its own service name
    pub async fn register(&self, participant: Arc<dyn SagaParticipant>) {
        let name = participant.info().service_name;
        let mut participants = self.participants.write().await;
        participants.insert(name, participant);
    }

    /// Resolve a logical service name
    pub async fn resolve(&self, service: &str) -> CoordinationResult<Arc<dyn SagaParticipant>> {
        let participants = self.participants.read().await;
        participants
            .get(service)
            .cloned()
            .ok_or_else(|| CoordinationError::ParticipantUnresolved {
                service: service.to_string(),
            })
    }

    /// Check a participant exists and advertises the given step
    pub async fn supports(&self, service: &str, step: StepName) -> CoordinationResult<()> {
        let participant = self.resolve(service).await?;
        let info = participant.info();
        if info.supported_steps.contains(&step) {
            Ok(())
        } else {
            Err(CoordinationError::ValidationError(format!(
                "participant {service} does not support step {step}"
            )))
        }
    }

    /// Names of all registered participants
    pub async fn services(&self) -> Vec<String> {
        let participants = self.participants.read().await;
        let mut names: Vec<String> = participants.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Retry policy for participant calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff in milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f32,
    /// Maximum backoff in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 250,
            backoff_multiplier: 2.0,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry (0-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry as i32);
        let ms = (self.initial_backoff_ms as f32 * factor) as u64;
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }
}

/// Client the orchestrator uses to talk to participants
///
/// Applies the per-step deadline around the whole call (including retries)
/// and retries only transport faults; verdicts pass through untouched.
#[derive(Debug, Clone)]
pub struct ParticipantClient {
    registry: Arc<ParticipantRegistry>,
    retry: RetryPolicy,
    step_timeout: Duration,
}

impl ParticipantClient {
    /// Create a client over a registry
    pub fn new(registry: Arc<ParticipantRegistry>, retry: RetryPolicy, step_timeout: Duration) -> Self {
        Self {
            registry,
            retry,
            step_timeout,
        }
    }

    /// The registry this client resolves against
    pub fn registry(&self) -> Arc<ParticipantRegistry> {
        self.registry.clone()
    }

    /// Execute a step against a named participant
    pub async fn execute_step(
        &self,
        service: &str,
        request: ExecuteStepRequest,
    ) -> CoordinationResult<ExecuteStepResponse> {
        let participant = self.registry.resolve(service).await?;
        let step = request.step_name;
        let call = self.with_retries(service, step, || {
            let participant = participant.clone();
            let request = request.clone();
            async move { participant.execute_step(request).await }
        });

        match tokio::time::timeout(self.step_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CoordinationError::Timeout(format!(
                "step {step} on {service} exceeded {}ms",
                self.step_timeout.as_millis()
            ))),
        }
    }

    /// Compensate a step against a named participant
    pub async fn compensate_step(
        &self,
        service: &str,
        request: CompensateStepRequest,
    ) -> CoordinationResult<CompensateStepResponse> {
        let participant = self.registry.resolve(service).await?;
        let step = request.step_name;
        let call = self.with_retries(service, step, || {
            let participant = participant.clone();
            let request = request.clone();
            async move { participant.compensate_step(request).await }
        });

        match tokio::time::timeout(self.step_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CoordinationError::Timeout(format!(
                "compensation of {step} on {service} exceeded {}ms",
                self.step_timeout.as_millis()
            ))),
        }
    }

    async fn with_retries<T, F, Fut>(
        &self,
        service: &str,
        step: StepName,
        mut call: F,
    ) -> CoordinationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = CoordinationResult<T>>,
    {
        let mut retry = 0u32;
        loop {
            match call().await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && retry < self.retry.max_retries => {
                    let backoff = self.retry.backoff(retry);
                    warn!(
                        service = %service,
                        step = %step,
                        retry = retry + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "participant call faulted, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Participant reached over HTTP
///
/// Wraps the two RPCs every cooperating service exposes:
/// `POST {base}/saga/participate` and `POST {base}/saga/compensate`.
#[derive(Debug, Clone)]
pub struct HttpParticipant {
    info: ParticipantInfo,
    base_url: String,
    client: reqwest::Client,
}

impl HttpParticipant {
    /// Create a participant handle with a known identity
    pub fn new(service_name: impl Into<String>, base_url: impl Into<String>, supported_steps: Vec<StepName>) -> Self {
        Self {
            info: ParticipantInfo {
                service_name: service_name.into(),
                supported_steps,
            },
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a participant handle by fetching `GET {base}/saga/info`
    pub async fn discover(base_url: impl Into<String>) -> CoordinationResult<Self> {
        let base_url = base_url.into();
        let client = reqwest::Client::new();
        let info: ParticipantInfo = client
            .get(format!("{base_url}/saga/info"))
            .send()
            .await
            .map_err(|e| CoordinationError::ParticipantUnreachable {
                service: base_url.clone(),
                message: e.to_string(),
            })?
            .json()
            .await
            .map_err(|e| CoordinationError::Serialization(e.to_string()))?;

        debug!(service = %info.service_name, base_url = %base_url, "discovered participant");
        Ok(Self {
            info,
            base_url,
            client,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> CoordinationError {
        CoordinationError::ParticipantUnreachable {
            service: self.info.service_name.clone(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl SagaParticipant for HttpParticipant {
    async fn execute_step(
        &self,
        request: ExecuteStepRequest,
    ) -> CoordinationResult<ExecuteStepResponse> {
        let response = self
            .client
            .post(format!("{}/saga/participate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(CoordinationError::ParticipantUnreachable {
                service: self.info.service_name.clone(),
                message: format!("participate returned {}", response.status()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| CoordinationError::Serialization(e.to_string()))
    }

    async fn compensate_step(
        &self,
        request: CompensateStepRequest,
    ) -> CoordinationResult<CompensateStepResponse> {
        let response = self
            .client
            .post(format!("{}/saga/compensate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(CoordinationError::ParticipantUnreachable {
                service: self.info.service_name.clone(),
                message: format!("compensate returned {}", response.status()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| CoordinationError::Serialization(e.to_string()))
    }

    fn info(&self) -> ParticipantInfo {
        self.info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn exec_request() -> ExecuteStepRequest {
        let saga_id = SagaId::new();
        ExecuteStepRequest {
            saga_id,
            step_name: StepName::VerifyStock,
            aggregate_id: "ord-001".to_string(),
            data: serde_json::json!({}),
            correlation_id: CorrelationId::from_saga(saga_id),
        }
    }

    /// Participant that faults a fixed number of times before answering.
    struct FlakyParticipant {
        faults: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SagaParticipant for FlakyParticipant {
        async fn execute_step(
            &self,
            _request: ExecuteStepRequest,
        ) -> CoordinationResult<ExecuteStepResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.faults.load(Ordering::SeqCst) > 0 {
                self.faults.fetch_sub(1, Ordering::SeqCst);
                return Err(CoordinationError::ParticipantUnreachable {
                    service: "flaky-service".to_string(),
                    message: "connection refused".to_string(),
                });
            }
            Ok(ExecuteStepResponse::completed(serde_json::json!({})))
        }

        async fn compensate_step(
            &self,
            _request: CompensateStepRequest,
        ) -> CoordinationResult<CompensateStepResponse> {
            Ok(CompensateStepResponse::succeeded())
        }

        fn info(&self) -> ParticipantInfo {
            ParticipantInfo {
                service_name: "flaky-service".to_string(),
                supported_steps: vec![StepName::VerifyStock],
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
            max_backoff_ms: 4,
        }
    }

    #[test]
    fn backoff_schedule_is_bounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        // Capped at max_backoff_ms from there on.
        assert_eq!(policy.backoff(3), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn transient_faults_are_retried_until_success() {
        let registry = Arc::new(ParticipantRegistry::new());
        let participant = Arc::new(FlakyParticipant {
            faults: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        registry.register(participant.clone()).await;

        let client = ParticipantClient::new(registry, fast_retry(), Duration::from_secs(5));
        let response = client
            .execute_step("flaky-service", exec_request())
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(participant.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn faults_beyond_the_retry_budget_surface_as_errors() {
        let registry = Arc::new(ParticipantRegistry::new());
        let participant = Arc::new(FlakyParticipant {
            faults: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        });
        registry.register(participant.clone()).await;

        let client = ParticipantClient::new(registry, fast_retry(), Duration::from_secs(5));
        let err = client
            .execute_step("flaky-service", exec_request())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        // First attempt plus three retries.
        assert_eq!(participant.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failure_verdicts_are_not_retried() {
        let mut mock = MockSagaParticipant::new();
        mock.expect_execute_step()
            .times(1)
            .returning(|_| Ok(ExecuteStepResponse::failed("card declined", false)));
        mock.expect_info().return_const(ParticipantInfo {
            service_name: "payment-service".to_string(),
            supported_steps: vec![StepName::ProcessPayment],
        });

        let registry = Arc::new(ParticipantRegistry::new());
        registry.register(Arc::new(mock)).await;

        let client = ParticipantClient::new(registry, fast_retry(), Duration::from_secs(5));
        let mut request = exec_request();
        request.step_name = StepName::ProcessPayment;
        let response = client
            .execute_step("payment-service", request)
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.error_message.as_deref(), Some("card declined"));
    }

    /// Participant that never answers within a test deadline.
    struct SlowParticipant;

    #[async_trait]
    impl SagaParticipant for SlowParticipant {
        async fn execute_step(
            &self,
            _request: ExecuteStepRequest,
        ) -> CoordinationResult<ExecuteStepResponse> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ExecuteStepResponse::completed(serde_json::json!({})))
        }

        async fn compensate_step(
            &self,
            _request: CompensateStepRequest,
        ) -> CoordinationResult<CompensateStepResponse> {
            Ok(CompensateStepResponse::succeeded())
        }

        fn info(&self) -> ParticipantInfo {
            ParticipantInfo {
                service_name: "slow-service".to_string(),
                supported_steps: vec![StepName::VerifyStock],
            }
        }
    }

    #[tokio::test]
    async fn slow_participants_hit_the_step_deadline() {
        let registry = Arc::new(ParticipantRegistry::new());
        registry.register(Arc::new(SlowParticipant)).await;

        let client = ParticipantClient::new(registry, fast_retry(), Duration::from_millis(20));
        let err = client
            .execute_step("slow-service", exec_request())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::Timeout(_)));
    }

    #[tokio::test]
    async fn registry_resolution_and_step_support() {
        let registry = ParticipantRegistry::new();
        registry
            .register(Arc::new(FlakyParticipant {
                faults: AtomicU32::new(0),
                calls: AtomicU32::new(0),
            }))
            .await;

        assert!(registry.resolve("flaky-service").await.is_ok());
        assert!(matches!(
            registry.resolve("missing-service").await.err().unwrap(),
            CoordinationError::ParticipantUnresolved { .. }
        ));

        assert!(registry
            .supports("flaky-service", StepName::VerifyStock)
            .await
            .is_ok());
        assert!(registry
            .supports("flaky-service", StepName::ProcessPayment)
            .await
            .is_err());
    }
}
