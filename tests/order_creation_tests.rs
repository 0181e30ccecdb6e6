//! End-to-end order-creation scenarios against the in-process wiring

mod common;

use common::{assert_log_invariants, harness, order_request};
use saga_coordination::{
    CoordinationError, EventLog, OrderItem, SagaId, SagaState, StepName, StepStatus, Topic,
};

#[tokio::test]
async fn happy_path_completes_every_step() {
    let h = harness().await;
    let response = h
        .orchestrator
        .execute_saga(order_request("ord-001", "cust-A", 100.0))
        .await
        .unwrap();

    assert_eq!(response.current_state, SagaState::Completed);
    for step in [
        StepName::VerifyStock,
        StepName::ReserveStock,
        StepName::ProcessPayment,
        StepName::ConfirmOrder,
    ] {
        let record = response
            .steps
            .iter()
            .find(|s| s.step_name == step)
            .unwrap();
        assert_eq!(record.status, StepStatus::Completed, "{step} not completed");
    }

    // Domain topics saw the participant self-publications; the lifecycle
    // topic saw the coordinator's transitions.
    for topic in [
        Topic::inventory_verification(),
        Topic::inventory_reservation(),
        Topic::payments_completion(),
        Topic::orders_confirmation(),
        Topic::saga_orchestration(),
    ] {
        let events = h.log.read_topic(&topic).await.unwrap();
        assert!(!events.is_empty(), "no events on {topic}");
    }

    // Stock was actually consumed and the payment actually settled.
    assert_eq!(h.stock.available("prod-1").await, 498);
    assert_eq!(h.payment.charged(response.saga_id).await, Some(100.0));

    let saga = h.orchestrator.get_saga_status(response.saga_id).await.unwrap();
    assert_log_invariants(&saga);
}

#[tokio::test]
async fn payment_failure_releases_the_reservation() {
    let h = harness().await;
    let response = h
        .orchestrator
        .execute_saga(order_request("ord-002", "cust_failed", 100.0))
        .await
        .unwrap();

    assert_eq!(response.current_state, SagaState::Compensated);

    let saga = h.orchestrator.get_saga_status(response.saga_id).await.unwrap();
    assert_eq!(
        saga.step(StepName::ProcessPayment).unwrap().status,
        StepStatus::Failed
    );
    assert_eq!(
        saga.step(StepName::ReserveStock).unwrap().status,
        StepStatus::Compensated
    );
    // ConfirmOrder was never dispatched.
    assert_eq!(
        saga.step(StepName::ConfirmOrder).unwrap().status,
        StepStatus::Pending
    );

    // The reservation was returned to the pool.
    assert_eq!(h.stock.available("prod-1").await, 500);
    assert!(h.payment.charged(response.saga_id).await.is_none());

    // The rollback walked in reverse completion order.
    let reserve = saga.step(StepName::ReserveStock).unwrap();
    let verify = saga.step(StepName::VerifyStock).unwrap();
    assert!(verify.compensated_at.unwrap() >= reserve.compensated_at.unwrap());

    let released = h.log.read_topic(&Topic::inventory_release()).await.unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].event.event_type, "stock_released");
    assert_log_invariants(&saga);
}

#[tokio::test]
async fn insufficient_stock_fails_fast_with_an_empty_walk() {
    let h = harness().await;
    let mut request = order_request("ord-003", "cust-A", 100.0);
    request.items = vec![OrderItem {
        product_id: "high-demand".to_string(),
        quantity: 1000,
        price: 1.0,
    }];
    request.total_amount = 1000.0 * 1.0;

    let response = h.orchestrator.execute_saga(request).await.unwrap();
    assert_eq!(response.current_state, SagaState::Compensated);

    let saga = h.orchestrator.get_saga_status(response.saga_id).await.unwrap();
    assert_eq!(
        saga.step(StepName::VerifyStock).unwrap().status,
        StepStatus::Failed
    );
    assert_eq!(
        saga.step(StepName::ReserveStock).unwrap().status,
        StepStatus::Pending
    );
    assert_eq!(
        saga.step(StepName::ProcessPayment).unwrap().status,
        StepStatus::Pending
    );
    assert!(saga.steps.iter().all(|s| s.compensated_at.is_none()));

    // No reservation, no payment.
    assert_eq!(h.stock.available("high-demand").await, 500);
    assert!(h.payment.charged(response.saga_id).await.is_none());

    let verification = h
        .log
        .read_topic(&Topic::inventory_verification())
        .await
        .unwrap();
    assert!(verification
        .iter()
        .any(|e| e.event.event_type == "stock_verification_failed"));

    // The injected failure is distinguishable from a real one.
    let stats = h.producer.statistics().await;
    assert_eq!(stats.events_by_type["controlled_failure"], 1);
    assert_log_invariants(&saga);
}

#[tokio::test]
async fn high_amount_payments_are_declined_and_compensated() {
    let h = harness().await;
    let response = h
        .orchestrator
        .execute_saga(order_request("ord-004", "cust-A", 1500.0))
        .await
        .unwrap();

    assert_eq!(response.current_state, SagaState::Compensated);

    let saga = h.orchestrator.get_saga_status(response.saga_id).await.unwrap();
    assert_eq!(
        saga.step(StepName::ProcessPayment).unwrap().status,
        StepStatus::Failed
    );
    assert_eq!(
        saga.step(StepName::ReserveStock).unwrap().status,
        StepStatus::Compensated
    );
    assert_eq!(h.stock.available("prod-1").await, 500);

    let failures = h.log.read_topic(&Topic::payments_failure()).await.unwrap();
    assert!(failures.iter().any(|e| e.event.event_type == "payment_failed"));
}

#[tokio::test]
async fn duplicate_admission_creates_exactly_one_saga() {
    let h = harness().await;
    let saga_id = SagaId::new();
    let mut request = order_request("ord-005", "cust-A", 100.0);
    request.saga_id = Some(saga_id);

    let first = h.orchestrator.clone();
    let second = h.orchestrator.clone();
    let req_a = request.clone();
    let req_b = request.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.execute_saga(req_a).await }),
        tokio::spawn(async move { second.execute_saga(req_b).await }),
    );
    let results = [a.unwrap(), b.unwrap()];

    // Exactly one terminal completion; the loser either saw the in-flight
    // snapshot (idempotent POST) or a conflict with the settled saga.
    let completed = results
        .iter()
        .filter(|r| {
            matches!(r, Ok(response) if response.current_state == SagaState::Completed)
        })
        .count();
    assert_eq!(completed, 1);
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, CoordinationError::AlreadyExists(_)));
        }
    }

    // One record, one admission event.
    let saga = h.orchestrator.get_saga_status(saga_id).await.unwrap();
    assert_eq!(saga.saga_id, saga_id);
    let lifecycle = h.log.read_topic(&Topic::saga_orchestration()).await.unwrap();
    let admissions = lifecycle
        .iter()
        .filter(|e| e.event.event_type == "saga_started")
        .count();
    assert_eq!(admissions, 1);
}

#[tokio::test]
async fn compensate_is_idempotent_once_compensated() {
    let h = harness().await;
    let response = h
        .orchestrator
        .execute_saga(order_request("ord-006", "cust_failed", 100.0))
        .await
        .unwrap();
    assert_eq!(response.current_state, SagaState::Compensated);

    let result = h.orchestrator.compensate(response.saga_id).await.unwrap();
    assert!(result.already_compensated);
    assert_eq!(result.final_state, SagaState::Compensated);
    assert!(result.compensated_steps.is_empty());

    // No further transitions after the terminal state.
    let before = h
        .orchestrator
        .get_saga_status(response.saga_id)
        .await
        .unwrap()
        .transitions
        .len();
    h.orchestrator.compensate(response.saga_id).await.unwrap();
    let after = h
        .orchestrator
        .get_saga_status(response.saga_id)
        .await
        .unwrap()
        .transitions
        .len();
    assert_eq!(before, after);
}

#[tokio::test]
async fn every_event_follows_a_transition_for_its_saga() {
    let h = harness().await;
    let response = h
        .orchestrator
        .execute_saga(order_request("ord-007", "cust-A", 100.0))
        .await
        .unwrap();

    let saga = h.orchestrator.get_saga_status(response.saga_id).await.unwrap();
    let first_transition = saga.transitions.first().unwrap().timestamp;

    let lifecycle = h.log.read_topic(&Topic::saga_orchestration()).await.unwrap();
    for stored in lifecycle {
        let matching = saga
            .transitions
            .iter()
            .any(|t| t.timestamp <= stored.event.timestamp);
        assert!(matching, "event {} precedes every transition", stored.event.event_type);
    }
    assert!(first_transition <= saga.last_transition().unwrap().timestamp);
}

#[tokio::test]
async fn journal_records_the_full_lifecycle_as_ndjson() {
    let h = harness().await;
    h.orchestrator
        .execute_saga(order_request("ord-008", "cust-A", 100.0))
        .await
        .unwrap();

    let bytes = h.journal_buffer.lock().unwrap().clone();
    let text = String::from_utf8(bytes).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let types: Vec<&str> = records
        .iter()
        .map(|r| r["event_type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"saga_started"));
    assert!(types.contains(&"step_completed"));
    assert!(types.contains(&"saga_completed"));
    for record in &records {
        assert!(record["saga_id"].is_string());
        assert!(record["correlation_id"].is_string());
        assert!(record["severity"].is_string());
        assert!(record["category"].is_string());
    }
}

#[tokio::test]
async fn metrics_cover_the_failure_path() {
    let h = harness().await;
    h.orchestrator
        .execute_saga(order_request("ord-009", "cust_failed", 100.0))
        .await
        .unwrap();

    let text = h.metrics.render().unwrap();
    assert!(text.contains("saga_sagas_started_total"));
    assert!(text.contains("saga_steps_failed_total"));
    assert!(text.contains("saga_compensations_succeeded_total"));
    assert!(text.contains("saga_controlled_failures_total"));
    assert!(text.contains("saga_sagas_failed_total"));
}
