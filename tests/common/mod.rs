//! Shared wiring for integration tests: an orchestrator over the in-memory
//! store and event log, with the reference participants and a seedable
//! failure injector.

#![allow(dead_code)]

use saga_coordination::{
    BusinessEventProducer, CoordinatorConfig, FailureInjector, InMemoryEventLog,
    InMemorySagaStore, Journal, OrderItem, OrderParticipant, ParticipantClient,
    ParticipantRegistry, PaymentParticipant, PlanRegistry, RetryPolicy, Saga, SagaMetrics,
    SagaOrchestrator, SagaRequest, SagaType, StockParticipant,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct Harness {
    pub orchestrator: Arc<SagaOrchestrator>,
    pub store: Arc<InMemorySagaStore>,
    pub log: Arc<InMemoryEventLog>,
    pub producer: BusinessEventProducer,
    pub stock: Arc<StockParticipant>,
    pub payment: Arc<PaymentParticipant>,
    pub metrics: Arc<SagaMetrics>,
    pub journal_buffer: Arc<Mutex<Vec<u8>>>,
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        step_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
            max_backoff_ms: 4,
        },
        ..CoordinatorConfig::default()
    }
}

pub async fn harness_with(config: CoordinatorConfig) -> Harness {
    let metrics = Arc::new(SagaMetrics::new().unwrap());
    let log = Arc::new(InMemoryEventLog::new(config.partition_count));
    let producer = BusinessEventProducer::new(log.clone(), metrics.clone());
    let injector = Arc::new(
        FailureInjector::new(config.failure.clone())
            .with_seed(42)
            .with_observability(producer.clone(), metrics.clone()),
    );

    let stock = Arc::new(StockParticipant::new(producer.clone(), injector.clone()));
    let payment = Arc::new(PaymentParticipant::new(producer.clone(), injector.clone()));
    let order = Arc::new(OrderParticipant::new(producer.clone(), injector));

    let registry = Arc::new(ParticipantRegistry::new());
    registry.register(stock.clone()).await;
    registry.register(payment.clone()).await;
    registry.register(order).await;

    let client = ParticipantClient::new(registry, config.retry.clone(), config.step_timeout);
    let store = Arc::new(InMemorySagaStore::new());
    let (journal, journal_buffer) = Journal::memory();

    let orchestrator = Arc::new(SagaOrchestrator::new(
        store.clone(),
        producer.clone(),
        client,
        PlanRegistry::with_defaults(),
        metrics.clone(),
        journal,
        config,
    ));

    Harness {
        orchestrator,
        store,
        log,
        producer,
        stock,
        payment,
        metrics,
        journal_buffer,
    }
}

pub fn order_request(order_id: &str, customer_id: &str, total: f64) -> SagaRequest {
    SagaRequest {
        saga_type: SagaType::OrderCreation,
        saga_id: None,
        correlation_id: None,
        order_id: order_id.to_string(),
        customer_id: customer_id.to_string(),
        store_id: Some("store-1".to_string()),
        items: vec![OrderItem {
            product_id: "prod-1".to_string(),
            quantity: 2,
            price: 50.0,
        }],
        total_amount: total,
        payment_method: Some("credit_card".to_string()),
    }
}

/// The universally quantified transition-log invariants every saga obeys.
pub fn assert_log_invariants(saga: &Saga) {
    assert!(
        !saga.transitions.is_empty(),
        "a saga always records at least its admission"
    );
    for pair in saga.transitions.windows(2) {
        assert!(
            pair[0].timestamp <= pair[1].timestamp,
            "transitions must be ordered by timestamp"
        );
    }
    assert_eq!(
        saga.last_transition().unwrap().to_state,
        saga.current_state,
        "the last transition must land in the current state"
    );
}
