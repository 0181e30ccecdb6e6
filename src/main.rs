// Copyright 2025 Cowboy AI, LLC.

//! Saga coordinator binary
//!
//! Wires the in-process store, event log, and reference participants behind
//! the HTTP surface. Remote participants can replace the local ones by
//! pointing `SAGA_PARTICIPANT_URLS` at their base URLs
//! (comma-separated, e.g. `http://inventory:8081,http://payments:8082`).

use anyhow::Context;
use saga_coordination::{
    http, BusinessEventProducer, CoordinatorConfig, FailureInjector, HttpParticipant,
    InMemoryEventLog, InMemorySagaStore, Journal, OrderParticipant, ParticipantClient,
    ParticipantRegistry, PaymentParticipant, PlanRegistry, SagaMetrics, SagaOrchestrator,
    SagaParticipant, StockParticipant,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = CoordinatorConfig::from_env();
    let metrics = Arc::new(SagaMetrics::new().context("metrics registration")?);
    let log = Arc::new(InMemoryEventLog::new(config.partition_count));
    let producer = BusinessEventProducer::new(log, metrics.clone());
    let journal = Journal::stdout();

    let registry = Arc::new(ParticipantRegistry::new());
    let urls = std::env::var("SAGA_PARTICIPANT_URLS").unwrap_or_default();
    if urls.trim().is_empty() {
        let injector = Arc::new(
            FailureInjector::new(config.failure.clone())
                .with_observability(producer.clone(), metrics.clone()),
        );
        registry
            .register(Arc::new(StockParticipant::new(
                producer.clone(),
                injector.clone(),
            )))
            .await;
        registry
            .register(Arc::new(PaymentParticipant::new(
                producer.clone(),
                injector.clone(),
            )))
            .await;
        registry
            .register(Arc::new(OrderParticipant::new(producer.clone(), injector)))
            .await;
        tracing::info!("registered in-process reference participants");
    } else {
        for url in urls.split(',').map(str::trim).filter(|u| !u.is_empty()) {
            let participant = HttpParticipant::discover(url)
                .await
                .with_context(|| format!("discovering participant at {url}"))?;
            tracing::info!(base_url = %url, service = %participant.info().service_name, "registered remote participant");
            registry.register(Arc::new(participant)).await;
        }
    }

    let client = ParticipantClient::new(registry, config.retry.clone(), config.step_timeout);
    let store = Arc::new(InMemorySagaStore::new());
    let orchestrator = Arc::new(SagaOrchestrator::new(
        store,
        producer,
        client,
        PlanRegistry::with_defaults(),
        metrics,
        journal,
        config.clone(),
    ));

    let recovered = orchestrator
        .recover_incomplete()
        .await
        .context("startup replay")?;
    if !recovered.is_empty() {
        tracing::info!(count = recovered.len(), "compensated incomplete sagas on startup");
    }

    let app = http::router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "saga coordinator listening");

    axum::serve(listener, app).await.context("http server")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,saga_coordination=debug"));

    let json = std::env::var("SAGA_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
