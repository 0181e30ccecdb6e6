// Copyright 2025 Cowboy AI, LLC.

//! Saga state store and transition log
//!
//! The store is the single authority for saga state. State changes go
//! through `update_saga_state`, which is conditional on the caller's view of
//! the current state (optimistic concurrency) and appends the transition
//! record in the same logical commit. Reads after a commit observe that
//! commit for the same saga id.

use crate::errors::{CoordinationError, CoordinationResult};
use crate::identifiers::SagaId;
use crate::saga::{Saga, SagaStep, SagaTransition, SagaType, TransitionKind};
use crate::state_machine::{guard_transition, SagaState, State};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable mapping from saga id to saga record
#[async_trait]
pub trait SagaStore: Send + Sync + std::fmt::Debug {
    /// Atomic insert; fails if the saga id exists
    async fn create_saga(&self, saga: Saga) -> CoordinationResult<()>;

    /// Conditional state update with the transition appended in the same
    /// logical commit
    ///
    /// Rejects with a concurrency conflict when `expected_current_state`
    /// does not match (another worker advanced the saga).
    async fn update_saga_state(
        &self,
        saga_id: SagaId,
        expected_current_state: SagaState,
        new_state: SagaState,
        transition: SagaTransition,
    ) -> CoordinationResult<()>;

    /// Append a transition that does not change the saga's state
    /// (per-step compensation outcomes recorded mid-walk)
    async fn append_transition(
        &self,
        saga_id: SagaId,
        transition: SagaTransition,
    ) -> CoordinationResult<()>;

    /// Upsert a step within the saga's step list, keyed by step name
    async fn record_step_result(&self, saga_id: SagaId, step: SagaStep) -> CoordinationResult<()>;

    /// Full snapshot: saga, steps, and transitions
    async fn read_saga(&self, saga_id: SagaId) -> CoordinationResult<Saga>;

    /// Sagas currently in the given state (eventually consistent)
    async fn list_by_state(&self, state: SagaState) -> CoordinationResult<Vec<Saga>>;

    /// Sagas of the given type (eventually consistent)
    async fn list_by_type(&self, saga_type: SagaType) -> CoordinationResult<Vec<Saga>>;

    /// Sagas created within the given range (eventually consistent)
    async fn list_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoordinationResult<Vec<Saga>>;

    /// Every non-terminal saga, for startup replay
    async fn replay_incomplete(&self) -> CoordinationResult<Vec<SagaId>>;

    /// Remove a saga record; used only by the retention sweep
    async fn delete_saga(&self, saga_id: SagaId) -> CoordinationResult<()>;
}

/// Single-master in-memory store
///
/// The optimistic state check plus one writer lock per call is enough to
/// satisfy the concurrency discipline; readers never block writers.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<SagaId, Saga>>>,
}

impl InMemorySagaStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create_saga(&self, saga: Saga) -> CoordinationResult<()> {
        let mut sagas = self.sagas.write().await;
        if sagas.contains_key(&saga.saga_id) {
            return Err(CoordinationError::AlreadyExists(saga.saga_id.to_string()));
        }
        sagas.insert(saga.saga_id, saga);
        Ok(())
    }

    async fn update_saga_state(
        &self,
        saga_id: SagaId,
        expected_current_state: SagaState,
        new_state: SagaState,
        transition: SagaTransition,
    ) -> CoordinationResult<()> {
        let mut sagas = self.sagas.write().await;
        let saga = sagas
            .get_mut(&saga_id)
            .ok_or_else(|| CoordinationError::SagaNotFound(saga_id.to_string()))?;

        if saga.current_state != expected_current_state {
            return Err(CoordinationError::ConcurrencyConflict {
                saga_id: saga_id.to_string(),
                expected: expected_current_state.name().to_string(),
                actual: saga.current_state.name().to_string(),
            });
        }

        guard_transition(&expected_current_state, &new_state)?;

        saga.current_state = new_state;
        saga.updated_at = transition.timestamp;
        if new_state.is_terminal() {
            saga.completed_at = Some(transition.timestamp);
        }
        if transition.event_kind == TransitionKind::Failure {
            if let Some(message) = &transition.message {
                saga.error_message = Some(message.clone());
            }
        }
        saga.transitions.push(transition);
        Ok(())
    }

    async fn append_transition(
        &self,
        saga_id: SagaId,
        transition: SagaTransition,
    ) -> CoordinationResult<()> {
        let mut sagas = self.sagas.write().await;
        let saga = sagas
            .get_mut(&saga_id)
            .ok_or_else(|| CoordinationError::SagaNotFound(saga_id.to_string()))?;

        // Only the state-preserving form is accepted here; state changes
        // must go through the conditional update.
        if transition.from_state != saga.current_state
            || transition.to_state != saga.current_state
        {
            return Err(CoordinationError::InvalidStateTransition {
                from: transition.from_state.name().to_string(),
                to: transition.to_state.name().to_string(),
            });
        }

        saga.updated_at = transition.timestamp;
        saga.transitions.push(transition);
        Ok(())
    }

    async fn record_step_result(&self, saga_id: SagaId, step: SagaStep) -> CoordinationResult<()> {
        let mut sagas = self.sagas.write().await;
        let saga = sagas
            .get_mut(&saga_id)
            .ok_or_else(|| CoordinationError::SagaNotFound(saga_id.to_string()))?;

        saga.updated_at = Utc::now();
        match saga.steps.iter().position(|s| s.step_name == step.step_name) {
            Some(idx) => saga.steps[idx] = step,
            None => saga.steps.push(step),
        }
        Ok(())
    }

    async fn read_saga(&self, saga_id: SagaId) -> CoordinationResult<Saga> {
        let sagas = self.sagas.read().await;
        sagas
            .get(&saga_id)
            .cloned()
            .ok_or_else(|| CoordinationError::SagaNotFound(saga_id.to_string()))
    }

    async fn list_by_state(&self, state: SagaState) -> CoordinationResult<Vec<Saga>> {
        let sagas = self.sagas.read().await;
        let mut matched: Vec<Saga> = sagas
            .values()
            .filter(|s| s.current_state == state)
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.created_at);
        Ok(matched)
    }

    async fn list_by_type(&self, saga_type: SagaType) -> CoordinationResult<Vec<Saga>> {
        let sagas = self.sagas.read().await;
        let mut matched: Vec<Saga> = sagas
            .values()
            .filter(|s| s.saga_type == saga_type)
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.created_at);
        Ok(matched)
    }

    async fn list_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoordinationResult<Vec<Saga>> {
        let sagas = self.sagas.read().await;
        let mut matched: Vec<Saga> = sagas
            .values()
            .filter(|s| s.created_at >= from && s.created_at <= to)
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.created_at);
        Ok(matched)
    }

    async fn replay_incomplete(&self) -> CoordinationResult<Vec<SagaId>> {
        let sagas = self.sagas.read().await;
        let mut incomplete: Vec<(DateTime<Utc>, SagaId)> = sagas
            .values()
            .filter(|s| !s.is_terminal())
            .map(|s| (s.created_at, s.saga_id))
            .collect();
        incomplete.sort_by_key(|(created_at, _)| *created_at);
        Ok(incomplete.into_iter().map(|(_, id)| id).collect())
    }

    async fn delete_saga(&self, saga_id: SagaId) -> CoordinationResult<()> {
        let mut sagas = self.sagas.write().await;
        sagas
            .remove(&saga_id)
            .map(|_| ())
            .ok_or_else(|| CoordinationError::SagaNotFound(saga_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::CorrelationId;

    fn new_saga() -> Saga {
        let id = SagaId::new();
        Saga::new(
            id,
            SagaType::OrderCreation,
            CorrelationId::from_saga(id),
            serde_json::json!({}),
        )
    }

    fn transition(
        saga_id: SagaId,
        from: SagaState,
        to: SagaState,
        kind: TransitionKind,
    ) -> SagaTransition {
        SagaTransition::new(saga_id, from, to, "saga-coordinator", "test", kind)
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = InMemorySagaStore::new();
        let saga = new_saga();
        store.create_saga(saga.clone()).await.unwrap();

        let err = store.create_saga(saga).await.unwrap_err();
        assert!(matches!(err, CoordinationError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn conditional_update_commits_state_and_transition_together() {
        let store = InMemorySagaStore::new();
        let saga = new_saga();
        let id = saga.saga_id;
        store.create_saga(saga).await.unwrap();

        store
            .update_saga_state(
                id,
                SagaState::Started,
                SagaState::StockVerifying,
                transition(
                    id,
                    SagaState::Started,
                    SagaState::StockVerifying,
                    TransitionKind::Success,
                ),
            )
            .await
            .unwrap();

        let snapshot = store.read_saga(id).await.unwrap();
        assert_eq!(snapshot.current_state, SagaState::StockVerifying);
        assert_eq!(snapshot.transitions.len(), 1);
        assert_eq!(
            snapshot.last_transition().unwrap().to_state,
            SagaState::StockVerifying
        );
    }

    #[tokio::test]
    async fn stale_writers_get_a_concurrency_conflict() {
        let store = InMemorySagaStore::new();
        let saga = new_saga();
        let id = saga.saga_id;
        store.create_saga(saga).await.unwrap();

        store
            .update_saga_state(
                id,
                SagaState::Started,
                SagaState::StockVerifying,
                transition(
                    id,
                    SagaState::Started,
                    SagaState::StockVerifying,
                    TransitionKind::Success,
                ),
            )
            .await
            .unwrap();

        // A second writer still believing the saga is in Started.
        let err = store
            .update_saga_state(
                id,
                SagaState::Started,
                SagaState::Compensating,
                transition(
                    id,
                    SagaState::Started,
                    SagaState::Compensating,
                    TransitionKind::Failure,
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn terminal_states_reject_further_updates() {
        let store = InMemorySagaStore::new();
        let mut saga = new_saga();
        saga.current_state = SagaState::OrderConfirming;
        let id = saga.saga_id;
        store.create_saga(saga).await.unwrap();

        store
            .update_saga_state(
                id,
                SagaState::OrderConfirming,
                SagaState::Completed,
                transition(
                    id,
                    SagaState::OrderConfirming,
                    SagaState::Completed,
                    TransitionKind::Success,
                ),
            )
            .await
            .unwrap();

        let snapshot = store.read_saga(id).await.unwrap();
        assert!(snapshot.completed_at.is_some());

        let err = store
            .update_saga_state(
                id,
                SagaState::Completed,
                SagaState::Compensating,
                transition(
                    id,
                    SagaState::Completed,
                    SagaState::Compensating,
                    TransitionKind::Failure,
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::InvalidStateTransition { .. }
        ));
    }

    #[tokio::test]
    async fn append_transition_requires_a_state_preserving_record() {
        let store = InMemorySagaStore::new();
        let mut saga = new_saga();
        saga.current_state = SagaState::Compensating;
        let id = saga.saga_id;
        store.create_saga(saga).await.unwrap();

        store
            .append_transition(
                id,
                transition(
                    id,
                    SagaState::Compensating,
                    SagaState::Compensating,
                    TransitionKind::Compensation,
                ),
            )
            .await
            .unwrap();

        let err = store
            .append_transition(
                id,
                transition(
                    id,
                    SagaState::Compensating,
                    SagaState::Compensated,
                    TransitionKind::Compensation,
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::InvalidStateTransition { .. }
        ));
    }

    #[tokio::test]
    async fn step_results_upsert_by_name() {
        let store = InMemorySagaStore::new();
        let saga = new_saga();
        let id = saga.saga_id;
        store.create_saga(saga).await.unwrap();

        let mut step = SagaStep::pending(crate::saga::StepName::VerifyStock, "inventory-service");
        step.begin();
        store.record_step_result(id, step.clone()).await.unwrap();

        step.complete(None);
        store.record_step_result(id, step).await.unwrap();

        let snapshot = store.read_saga(id).await.unwrap();
        assert_eq!(snapshot.steps.len(), 1);
        assert_eq!(
            snapshot.steps[0].status,
            crate::saga::StepStatus::Completed
        );
    }

    #[tokio::test]
    async fn replay_returns_only_non_terminal_sagas() {
        let store = InMemorySagaStore::new();

        let open = new_saga();
        let open_id = open.saga_id;
        store.create_saga(open).await.unwrap();

        let mut done = new_saga();
        done.current_state = SagaState::Completed;
        done.completed_at = Some(Utc::now());
        store.create_saga(done).await.unwrap();

        let incomplete = store.replay_incomplete().await.unwrap();
        assert_eq!(incomplete, vec![open_id]);
    }

    #[tokio::test]
    async fn list_queries_filter_and_sort() {
        let store = InMemorySagaStore::new();
        let a = new_saga();
        let mut b = new_saga();
        b.current_state = SagaState::Compensating;
        store.create_saga(a.clone()).await.unwrap();
        store.create_saga(b.clone()).await.unwrap();

        let started = store.list_by_state(SagaState::Started).await.unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].saga_id, a.saga_id);

        let by_type = store.list_by_type(SagaType::OrderCreation).await.unwrap();
        assert_eq!(by_type.len(), 2);

        let ranged = store
            .list_by_date_range(Utc::now() - chrono::Duration::minutes(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);
    }
}
