// Copyright 2025 Cowboy AI, LLC.

//! Reference participants for the order-creation plan
//!
//! In-process implementations of the participant contract for the three
//! cooperating services: inventory, payment, and order. They are what the
//! test harness drives and what the binary wires when no remote participant
//! URLs are configured. Each one keeps an outcome record keyed by
//! `(saga_id, step_name)` so repeated calls are idempotent, consults the
//! failure injector before doing real work, and publishes its outcome on
//! its domain topic before returning.

use crate::errors::{CoordinationError, CoordinationResult};
use crate::events::{BusinessEvent, EventMetadata, Topic};
use crate::failure::FailureInjector;
use crate::identifiers::{CorrelationId, SagaId};
use crate::participant::{
    CompensateStepRequest, CompensateStepResponse, ExecuteStepRequest, ExecuteStepResponse,
    ParticipantInfo, SagaParticipant,
};
use crate::producer::BusinessEventProducer;
use crate::saga::{OrderItem, StepName};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

type CallKey = (SagaId, StepName);

fn order_id_of(data: &serde_json::Value) -> String {
    data.get("order_id")
        .or_else(|| data.get("context").and_then(|c| c.get("order_id")))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

fn items_of(data: &serde_json::Value) -> CoordinationResult<Vec<OrderItem>> {
    let items = data
        .get("items")
        .cloned()
        .ok_or_else(|| CoordinationError::ValidationError("missing items".to_string()))?;
    serde_json::from_value(items).map_err(|e| CoordinationError::ValidationError(e.to_string()))
}

/// Inventory service: verifies and reserves stock
pub struct StockParticipant {
    producer: BusinessEventProducer,
    injector: Arc<FailureInjector>,
    /// Available units per product; unseen products are seeded lazily.
    stock: RwLock<HashMap<String, i64>>,
    default_stock: i64,
    /// Quantities held per saga, returned on release.
    reservations: RwLock<HashMap<SagaId, Vec<(String, u32)>>>,
    completed: RwLock<HashMap<CallKey, ExecuteStepResponse>>,
    compensated: RwLock<HashSet<CallKey>>,
}

impl StockParticipant {
    /// Service name participants and plans agree on
    pub const SERVICE: &'static str = "inventory-service";

    /// Create a stock participant with the default seed level per product
    pub fn new(producer: BusinessEventProducer, injector: Arc<FailureInjector>) -> Self {
        Self::with_default_stock(producer, injector, 500)
    }

    /// Create a stock participant seeding each unseen product at `level`
    pub fn with_default_stock(
        producer: BusinessEventProducer,
        injector: Arc<FailureInjector>,
        level: i64,
    ) -> Self {
        Self {
            producer,
            injector,
            stock: RwLock::new(HashMap::new()),
            default_stock: level,
            reservations: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashMap::new()),
            compensated: RwLock::new(HashSet::new()),
        }
    }

    /// Current available units for a product
    pub async fn available(&self, product_id: &str) -> i64 {
        let stock = self.stock.read().await;
        stock.get(product_id).copied().unwrap_or(self.default_stock)
    }

    async fn publish(
        &self,
        topic: Topic,
        event_type: &str,
        saga_id: SagaId,
        correlation_id: &CorrelationId,
        order_id: &str,
        data: serde_json::Value,
    ) -> CoordinationResult<()> {
        let event = BusinessEvent::new(
            event_type,
            order_id,
            "Order",
            correlation_id.clone(),
            data,
            EventMetadata::for_saga(saga_id, Self::SERVICE),
        );
        self.producer.publish(&topic, event).await.map(|_| ())
    }

    async fn verify(&self, request: &ExecuteStepRequest) -> CoordinationResult<ExecuteStepResponse> {
        let order_id = order_id_of(&request.data);
        let items = items_of(&request.data)?;

        let mut shortage = None;
        {
            let mut stock = self.stock.write().await;
            for item in &items {
                let available = *stock
                    .entry(item.product_id.clone())
                    .or_insert(self.default_stock);
                if available < i64::from(item.quantity) {
                    shortage = Some(item.product_id.clone());
                    break;
                }
            }
        }

        if let Some(product) = shortage {
            self.publish(
                Topic::inventory_verification(),
                "stock_verification_failed",
                request.saga_id,
                &request.correlation_id,
                &order_id,
                serde_json::json!({"order_id": &order_id, "product_id": product}),
            )
            .await?;
            return Ok(ExecuteStepResponse::failed(
                format!("insufficient stock for {product}"),
                false,
            ));
        }

        self.publish(
            Topic::inventory_verification(),
            "stock_verified",
            request.saga_id,
            &request.correlation_id,
            &order_id,
            serde_json::json!({"order_id": &order_id, "items": &items}),
        )
        .await?;
        Ok(ExecuteStepResponse::completed(serde_json::json!({
            "verified": true,
            "items": items,
        })))
    }

    async fn reserve(&self, request: &ExecuteStepRequest) -> CoordinationResult<ExecuteStepResponse> {
        let order_id = order_id_of(&request.data);
        let items = items_of(&request.data)?;

        let mut stock = self.stock.write().await;
        for item in &items {
            let available = *stock
                .entry(item.product_id.clone())
                .or_insert(self.default_stock);
            if available < i64::from(item.quantity) {
                drop(stock);
                self.publish(
                    Topic::inventory_reservation(),
                    "stock_reservation_failed",
                    request.saga_id,
                    &request.correlation_id,
                    &order_id,
                    serde_json::json!({"order_id": &order_id, "product_id": &item.product_id}),
                )
                .await?;
                return Ok(ExecuteStepResponse::failed(
                    format!("cannot reserve {} of {}", item.quantity, item.product_id),
                    false,
                ));
            }
        }
        for item in &items {
            *stock.entry(item.product_id.clone()).or_insert(self.default_stock) -=
                i64::from(item.quantity);
        }
        drop(stock);

        let held: Vec<(String, u32)> = items
            .iter()
            .map(|i| (i.product_id.clone(), i.quantity))
            .collect();
        self.reservations
            .write()
            .await
            .insert(request.saga_id, held);

        self.publish(
            Topic::inventory_reservation(),
            "stock_reserved",
            request.saga_id,
            &request.correlation_id,
            &order_id,
            serde_json::json!({"order_id": &order_id, "items": &items}),
        )
        .await?;
        Ok(ExecuteStepResponse::completed(serde_json::json!({
            "reserved": true,
            "items": items,
        })))
    }
}

#[async_trait]
impl SagaParticipant for StockParticipant {
    async fn execute_step(
        &self,
        request: ExecuteStepRequest,
    ) -> CoordinationResult<ExecuteStepResponse> {
        let key = (request.saga_id, request.step_name);
        if let Some(recorded) = self.completed.read().await.get(&key) {
            return Ok(recorded.clone());
        }

        if let Some(failure) = self
            .injector
            .evaluate(
                Self::SERVICE,
                request.saga_id,
                &request.correlation_id,
                request.step_name,
                &request.data,
            )
            .await
        {
            if failure.kind.is_transport() {
                return Err(CoordinationError::ParticipantUnreachable {
                    service: Self::SERVICE.to_string(),
                    message: failure.message,
                });
            }
            let order_id = order_id_of(&request.data);
            let (topic, event_type) = match request.step_name {
                StepName::ReserveStock => {
                    (Topic::inventory_reservation(), "stock_reservation_failed")
                }
                _ => (Topic::inventory_verification(), "stock_verification_failed"),
            };
            self.publish(
                topic,
                event_type,
                request.saga_id,
                &request.correlation_id,
                &order_id,
                serde_json::json!({"order_id": &order_id, "injected": true}),
            )
            .await?;
            let response = ExecuteStepResponse::failed(failure.message, false);
            self.completed.write().await.insert(key, response.clone());
            return Ok(response);
        }

        let response = match request.step_name {
            StepName::VerifyStock => self.verify(&request).await?,
            StepName::ReserveStock => self.reserve(&request).await?,
            other => ExecuteStepResponse::failed(format!("unsupported step {other}"), false),
        };
        self.completed.write().await.insert(key, response.clone());
        Ok(response)
    }

    async fn compensate_step(
        &self,
        request: CompensateStepRequest,
    ) -> CoordinationResult<CompensateStepResponse> {
        let key = (request.saga_id, request.step_name);
        if self.compensated.read().await.contains(&key) {
            return Ok(CompensateStepResponse::succeeded());
        }
        let order_id = order_id_of(&request.data);

        match request.step_name {
            StepName::ReserveStock => {
                let held = self.reservations.write().await.remove(&request.saga_id);
                if let Some(held) = &held {
                    let mut stock = self.stock.write().await;
                    for (product, quantity) in held {
                        *stock.entry(product.clone()).or_insert(self.default_stock) +=
                            i64::from(*quantity);
                    }
                }
                info!(saga_id = %request.saga_id, order_id = %order_id, "released reserved stock");
                self.publish(
                    Topic::inventory_release(),
                    "stock_released",
                    request.saga_id,
                    &request.correlation_id,
                    &order_id,
                    serde_json::json!({
                        "order_id": &order_id,
                        "released": held.unwrap_or_default(),
                        "reason": &request.reason,
                    }),
                )
                .await?;
            }
            StepName::VerifyStock => {
                // Verification held nothing; record the discard only.
                self.publish(
                    Topic::inventory_verification(),
                    "stock_verification_discarded",
                    request.saga_id,
                    &request.correlation_id,
                    &order_id,
                    serde_json::json!({"order_id": &order_id, "reason": &request.reason}),
                )
                .await?;
            }
            other => {
                return Ok(CompensateStepResponse::failed(format!(
                    "unsupported step {other}"
                )))
            }
        }

        self.compensated.write().await.insert(key);
        Ok(CompensateStepResponse::succeeded())
    }

    fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            service_name: Self::SERVICE.to_string(),
            supported_steps: vec![StepName::VerifyStock, StepName::ReserveStock],
        }
    }
}

/// Payment service: charges and refunds
pub struct PaymentParticipant {
    producer: BusinessEventProducer,
    injector: Arc<FailureInjector>,
    /// Settled charges per saga, reversed on refund.
    payments: RwLock<HashMap<SagaId, f64>>,
    completed: RwLock<HashMap<CallKey, ExecuteStepResponse>>,
    compensated: RwLock<HashSet<CallKey>>,
}

impl PaymentParticipant {
    /// Service name participants and plans agree on
    pub const SERVICE: &'static str = "payment-service";

    /// Create a payment participant
    pub fn new(producer: BusinessEventProducer, injector: Arc<FailureInjector>) -> Self {
        Self {
            producer,
            injector,
            payments: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashMap::new()),
            compensated: RwLock::new(HashSet::new()),
        }
    }

    /// The settled amount for a saga, if any
    pub async fn charged(&self, saga_id: SagaId) -> Option<f64> {
        self.payments.read().await.get(&saga_id).copied()
    }

    async fn publish(
        &self,
        topic: Topic,
        event_type: &str,
        saga_id: SagaId,
        correlation_id: &CorrelationId,
        order_id: &str,
        data: serde_json::Value,
    ) -> CoordinationResult<()> {
        let event = BusinessEvent::new(
            event_type,
            order_id,
            "Order",
            correlation_id.clone(),
            data,
            EventMetadata::for_saga(saga_id, Self::SERVICE),
        );
        self.producer.publish(&topic, event).await.map(|_| ())
    }
}

#[async_trait]
impl SagaParticipant for PaymentParticipant {
    async fn execute_step(
        &self,
        request: ExecuteStepRequest,
    ) -> CoordinationResult<ExecuteStepResponse> {
        let key = (request.saga_id, request.step_name);
        if let Some(recorded) = self.completed.read().await.get(&key) {
            return Ok(recorded.clone());
        }
        if request.step_name != StepName::ProcessPayment {
            return Ok(ExecuteStepResponse::failed(
                format!("unsupported step {}", request.step_name),
                false,
            ));
        }
        let order_id = order_id_of(&request.data);

        if let Some(failure) = self
            .injector
            .evaluate(
                Self::SERVICE,
                request.saga_id,
                &request.correlation_id,
                request.step_name,
                &request.data,
            )
            .await
        {
            if failure.kind.is_transport() {
                return Err(CoordinationError::ParticipantUnreachable {
                    service: Self::SERVICE.to_string(),
                    message: failure.message,
                });
            }
            self.publish(
                Topic::payments_failure(),
                "payment_failed",
                request.saga_id,
                &request.correlation_id,
                &order_id,
                serde_json::json!({"order_id": &order_id, "reason": &failure.message}),
            )
            .await?;
            let response = ExecuteStepResponse::failed(failure.message, false);
            self.completed.write().await.insert(key, response.clone());
            return Ok(response);
        }

        let amount = request
            .data
            .get("total_amount")
            .and_then(|a| a.as_f64())
            .ok_or_else(|| {
                CoordinationError::ValidationError("missing total_amount".to_string())
            })?;

        self.payments.write().await.insert(request.saga_id, amount);
        let transaction_id = format!("txn-{}", request.saga_id);
        info!(
            saga_id = %request.saga_id,
            order_id = %order_id,
            amount,
            "payment settled"
        );
        self.publish(
            Topic::payments_completion(),
            "payment_completed",
            request.saga_id,
            &request.correlation_id,
            &order_id,
            serde_json::json!({
                "order_id": &order_id,
                "amount": amount,
                "transaction_id": &transaction_id,
            }),
        )
        .await?;

        let response = ExecuteStepResponse::completed(serde_json::json!({
            "transaction_id": transaction_id,
            "amount": amount,
        }));
        self.completed.write().await.insert(key, response.clone());
        Ok(response)
    }

    async fn compensate_step(
        &self,
        request: CompensateStepRequest,
    ) -> CoordinationResult<CompensateStepResponse> {
        let key = (request.saga_id, request.step_name);
        if self.compensated.read().await.contains(&key) {
            return Ok(CompensateStepResponse::succeeded());
        }
        let order_id = order_id_of(&request.data);

        let refunded = self.payments.write().await.remove(&request.saga_id);
        self.publish(
            Topic::payments_failure(),
            "payment_refunded",
            request.saga_id,
            &request.correlation_id,
            &order_id,
            serde_json::json!({
                "order_id": &order_id,
                "amount": refunded,
                "reason": &request.reason,
            }),
        )
        .await?;

        self.compensated.write().await.insert(key);
        Ok(CompensateStepResponse::succeeded())
    }

    fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            service_name: Self::SERVICE.to_string(),
            supported_steps: vec![StepName::ProcessPayment],
        }
    }
}

/// Order service: confirms, notifies, and cancels
pub struct OrderParticipant {
    producer: BusinessEventProducer,
    injector: Arc<FailureInjector>,
    confirmed: RwLock<HashSet<SagaId>>,
    completed: RwLock<HashMap<CallKey, ExecuteStepResponse>>,
    compensated: RwLock<HashSet<CallKey>>,
}

impl OrderParticipant {
    /// Service name participants and plans agree on
    pub const SERVICE: &'static str = "order-service";

    /// Create an order participant
    pub fn new(producer: BusinessEventProducer, injector: Arc<FailureInjector>) -> Self {
        Self {
            producer,
            injector,
            confirmed: RwLock::new(HashSet::new()),
            completed: RwLock::new(HashMap::new()),
            compensated: RwLock::new(HashSet::new()),
        }
    }

    async fn publish(
        &self,
        topic: Topic,
        event_type: &str,
        saga_id: SagaId,
        correlation_id: &CorrelationId,
        order_id: &str,
        data: serde_json::Value,
    ) -> CoordinationResult<()> {
        let event = BusinessEvent::new(
            event_type,
            order_id,
            "Order",
            correlation_id.clone(),
            data,
            EventMetadata::for_saga(saga_id, Self::SERVICE),
        );
        self.producer.publish(&topic, event).await.map(|_| ())
    }
}

#[async_trait]
impl SagaParticipant for OrderParticipant {
    async fn execute_step(
        &self,
        request: ExecuteStepRequest,
    ) -> CoordinationResult<ExecuteStepResponse> {
        let key = (request.saga_id, request.step_name);
        if let Some(recorded) = self.completed.read().await.get(&key) {
            return Ok(recorded.clone());
        }
        if request.step_name != StepName::ConfirmOrder {
            return Ok(ExecuteStepResponse::failed(
                format!("unsupported step {}", request.step_name),
                false,
            ));
        }
        let order_id = order_id_of(&request.data);

        if let Some(failure) = self
            .injector
            .evaluate(
                Self::SERVICE,
                request.saga_id,
                &request.correlation_id,
                request.step_name,
                &request.data,
            )
            .await
        {
            if failure.kind.is_transport() {
                return Err(CoordinationError::ParticipantUnreachable {
                    service: Self::SERVICE.to_string(),
                    message: failure.message,
                });
            }
            let response = ExecuteStepResponse::failed(failure.message, false);
            self.completed.write().await.insert(key, response.clone());
            return Ok(response);
        }

        self.confirmed.write().await.insert(request.saga_id);
        self.publish(
            Topic::orders_confirmation(),
            "order_confirmed",
            request.saga_id,
            &request.correlation_id,
            &order_id,
            serde_json::json!({"order_id": &order_id, "status": "confirmed"}),
        )
        .await?;
        // The canonical flow ends with a customer notification.
        self.publish(
            Topic::orders_confirmation(),
            "customer_notified",
            request.saga_id,
            &request.correlation_id,
            &order_id,
            serde_json::json!({"order_id": &order_id, "channel": "email"}),
        )
        .await?;

        let response = ExecuteStepResponse::completed(serde_json::json!({
            "order_id": order_id,
            "status": "confirmed",
        }));
        self.completed.write().await.insert(key, response.clone());
        Ok(response)
    }

    async fn compensate_step(
        &self,
        request: CompensateStepRequest,
    ) -> CoordinationResult<CompensateStepResponse> {
        let key = (request.saga_id, request.step_name);
        if self.compensated.read().await.contains(&key) {
            return Ok(CompensateStepResponse::succeeded());
        }
        let order_id = order_id_of(&request.data);

        let was_confirmed = self.confirmed.write().await.remove(&request.saga_id);
        self.publish(
            Topic::orders_cancellation(),
            "order_cancelled",
            request.saga_id,
            &request.correlation_id,
            &order_id,
            serde_json::json!({
                "order_id": &order_id,
                "was_confirmed": was_confirmed,
                "reason": &request.reason,
            }),
        )
        .await?;

        self.compensated.write().await.insert(key);
        Ok(CompensateStepResponse::succeeded())
    }

    fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            service_name: Self::SERVICE.to_string(),
            supported_steps: vec![StepName::ConfirmOrder],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::InMemoryEventLog;
    use crate::failure::FailureConfig;
    use crate::metrics::SagaMetrics;

    fn wiring() -> (BusinessEventProducer, Arc<FailureInjector>) {
        let metrics = Arc::new(SagaMetrics::new().unwrap());
        let producer =
            BusinessEventProducer::new(Arc::new(InMemoryEventLog::new(2)), metrics.clone());
        let injector = Arc::new(
            FailureInjector::new(FailureConfig::default())
                .with_observability(producer.clone(), metrics),
        );
        (producer, injector)
    }

    fn exec(step: StepName, quantity: u32) -> ExecuteStepRequest {
        let saga_id = SagaId::new();
        ExecuteStepRequest {
            saga_id,
            step_name: step,
            aggregate_id: "ord-001".to_string(),
            data: serde_json::json!({
                "order_id": "ord-001",
                "customer_id": "cust-A",
                "items": [{"product_id": "prod-1", "quantity": quantity, "price": 50.0}],
                "total_amount": 100.0,
            }),
            correlation_id: CorrelationId::from_saga(saga_id),
        }
    }

    #[tokio::test]
    async fn reserve_then_release_restores_stock() {
        let (producer, injector) = wiring();
        let stock = StockParticipant::new(producer.clone(), injector);

        let request = exec(StepName::ReserveStock, 5);
        let response = stock.execute_step(request.clone()).await.unwrap();
        assert!(response.success);
        assert_eq!(stock.available("prod-1").await, 495);

        let release = CompensateStepRequest {
            saga_id: request.saga_id,
            step_name: StepName::ReserveStock,
            reason: "payment declined".to_string(),
            data: request.data.clone(),
            correlation_id: request.correlation_id.clone(),
        };
        let response = stock.compensate_step(release.clone()).await.unwrap();
        assert!(response.success);
        assert_eq!(stock.available("prod-1").await, 500);

        // Repeating the release is a no-op.
        stock.compensate_step(release).await.unwrap();
        assert_eq!(stock.available("prod-1").await, 500);

        let stats = producer.statistics().await;
        assert_eq!(stats.events_by_type["stock_reserved"], 1);
        assert_eq!(stats.events_by_type["stock_released"], 1);
    }

    #[tokio::test]
    async fn execute_step_is_idempotent_per_saga_and_step() {
        let (producer, injector) = wiring();
        let stock = StockParticipant::new(producer.clone(), injector);

        let request = exec(StepName::ReserveStock, 5);
        let first = stock.execute_step(request.clone()).await.unwrap();
        let second = stock.execute_step(request).await.unwrap();

        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
        // One reservation, one event.
        assert_eq!(stock.available("prod-1").await, 495);
        let stats = producer.statistics().await;
        assert_eq!(stats.events_by_type["stock_reserved"], 1);
    }

    #[tokio::test]
    async fn verification_fails_when_stock_is_short() {
        let (producer, injector) = wiring();
        let stock = StockParticipant::with_default_stock(producer, injector, 3);

        let response = stock
            .execute_step(exec(StepName::VerifyStock, 10))
            .await
            .unwrap();
        assert!(!response.success);
        assert!(response.error_message.unwrap().contains("prod-1"));
    }

    #[tokio::test]
    async fn payment_settles_and_refunds() {
        let (producer, injector) = wiring();
        let payment = PaymentParticipant::new(producer.clone(), injector);

        let request = exec(StepName::ProcessPayment, 2);
        let response = payment.execute_step(request.clone()).await.unwrap();
        assert!(response.success);
        assert_eq!(payment.charged(request.saga_id).await, Some(100.0));

        let refund = CompensateStepRequest {
            saga_id: request.saga_id,
            step_name: StepName::ProcessPayment,
            reason: "order confirmation failed".to_string(),
            data: request.data.clone(),
            correlation_id: request.correlation_id.clone(),
        };
        payment.compensate_step(refund).await.unwrap();
        assert_eq!(payment.charged(request.saga_id).await, None);

        let stats = producer.statistics().await;
        assert_eq!(stats.events_by_type["payment_completed"], 1);
        assert_eq!(stats.events_by_type["payment_refunded"], 1);
    }

    #[tokio::test]
    async fn declined_customer_is_rejected_with_an_event() {
        let (producer, injector) = wiring();
        let payment = PaymentParticipant::new(producer.clone(), injector);

        let mut request = exec(StepName::ProcessPayment, 2);
        request.data["customer_id"] = serde_json::json!("cust_failed");
        let response = payment.execute_step(request).await.unwrap();
        assert!(!response.success);

        let stats = producer.statistics().await;
        assert_eq!(stats.events_by_type["payment_failed"], 1);
        assert_eq!(stats.events_by_type["controlled_failure"], 1);
    }

    #[tokio::test]
    async fn order_confirmation_publishes_the_notification() {
        let (producer, injector) = wiring();
        let order = OrderParticipant::new(producer.clone(), injector);

        let response = order
            .execute_step(exec(StepName::ConfirmOrder, 2))
            .await
            .unwrap();
        assert!(response.success);

        let stats = producer.statistics().await;
        assert_eq!(stats.events_by_type["order_confirmed"], 1);
        assert_eq!(stats.events_by_type["customer_notified"], 1);
    }

    #[tokio::test]
    async fn order_cancellation_reports_whether_anything_was_undone() {
        let (producer, injector) = wiring();
        let order = OrderParticipant::new(producer.clone(), injector);

        let saga_id = SagaId::new();
        let cancel = CompensateStepRequest {
            saga_id,
            step_name: StepName::ConfirmOrder,
            reason: "rollback".to_string(),
            data: serde_json::json!({"context": {"order_id": "ord-009"}}),
            correlation_id: CorrelationId::from_saga(saga_id),
        };
        let response = order.compensate_step(cancel).await.unwrap();
        assert!(response.success);

        let stats = producer.statistics().await;
        assert_eq!(stats.events_by_type["order_cancelled"], 1);
    }
}
