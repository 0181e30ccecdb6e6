// Copyright 2025 Cowboy AI, LLC.

//! Saga state machine
//!
//! States and transitions are enum-encoded so the coordinator can only move
//! a saga along edges declared here. Terminal states are absorbing: once a
//! saga reaches `Completed`, `Compensated`, or `Failed`, every further
//! transition is rejected.

use crate::errors::{CoordinationError, CoordinationResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trait for types that can be used as states in a state machine
pub trait State: fmt::Debug + Clone + PartialEq + Eq + Send + Sync {
    /// Get the name of this state for logging/debugging
    fn name(&self) -> &'static str;

    /// Check if this is a terminal state
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Lifecycle states of an order-creation saga
///
/// The in-progress/settled pairs mirror the step plan: each step owns one
/// `*ing` state entered before the participant call and one settled state
/// entered after a success verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum SagaState {
    /// Saga record created, no step dispatched yet
    Started,
    /// Stock verification in flight
    StockVerifying,
    /// Stock verified
    StockVerified,
    /// Stock reservation in flight
    StockReserving,
    /// Stock reserved
    StockReserved,
    /// Payment in flight
    PaymentProcessing,
    /// Payment settled
    PaymentProcessed,
    /// Order confirmation in flight
    OrderConfirming,
    /// Terminal: every step completed
    Completed,
    /// Terminal: a failure could not be compensated cleanly
    Failed,
    /// Rollback walk in progress
    Compensating,
    /// Terminal: completed steps rolled back
    Compensated,
}

impl State for SagaState {
    fn name(&self) -> &'static str {
        match self {
            SagaState::Started => "Started",
            SagaState::StockVerifying => "StockVerifying",
            SagaState::StockVerified => "StockVerified",
            SagaState::StockReserving => "StockReserving",
            SagaState::StockReserved => "StockReserved",
            SagaState::PaymentProcessing => "PaymentProcessing",
            SagaState::PaymentProcessed => "PaymentProcessed",
            SagaState::OrderConfirming => "OrderConfirming",
            SagaState::Completed => "Completed",
            SagaState::Failed => "Failed",
            SagaState::Compensating => "Compensating",
            SagaState::Compensated => "Compensated",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Compensated | SagaState::Failed
        )
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl SagaState {
    /// Schema version of the state enum, carried with the saga type
    pub const SCHEMA_VERSION: u32 = 1;

    /// Get all valid target states from this state
    pub fn valid_transitions(&self) -> Vec<SagaState> {
        use SagaState::*;

        match self {
            Started => vec![StockVerifying, Compensating],
            StockVerifying => vec![StockVerified, Compensating],
            StockVerified => vec![StockReserving, Compensating],
            StockReserving => vec![StockReserved, Compensating],
            StockReserved => vec![PaymentProcessing, Compensating],
            PaymentProcessing => vec![PaymentProcessed, Compensating],
            PaymentProcessed => vec![OrderConfirming, Compensating],
            OrderConfirming => vec![Completed, Compensating],
            Compensating => vec![Compensated, Failed],
            Completed | Compensated | Failed => vec![],
        }
    }

    /// Check if a transition to the target state is valid
    pub fn can_transition_to(&self, target: &SagaState) -> bool {
        self.valid_transitions().contains(target)
    }

    /// Parse a state from its wire name
    pub fn parse(name: &str) -> CoordinationResult<SagaState> {
        use SagaState::*;

        match name {
            "Started" => Ok(Started),
            "StockVerifying" => Ok(StockVerifying),
            "StockVerified" => Ok(StockVerified),
            "StockReserving" => Ok(StockReserving),
            "StockReserved" => Ok(StockReserved),
            "PaymentProcessing" => Ok(PaymentProcessing),
            "PaymentProcessed" => Ok(PaymentProcessed),
            "OrderConfirming" => Ok(OrderConfirming),
            "Completed" => Ok(Completed),
            "Failed" => Ok(Failed),
            "Compensating" => Ok(Compensating),
            "Compensated" => Ok(Compensated),
            other => Err(CoordinationError::ValidationError(format!(
                "unknown saga state: {other}"
            ))),
        }
    }
}

/// Validate a transition, rejecting moves out of terminal states and
/// edges not declared in the transition table.
pub fn guard_transition(from: &SagaState, to: &SagaState) -> CoordinationResult<()> {
    if from.is_terminal() {
        return Err(CoordinationError::InvalidStateTransition {
            from: from.name().to_string(),
            to: to.name().to_string(),
        });
    }

    if !from.can_transition_to(to) {
        return Err(CoordinationError::InvalidStateTransition {
            from: from.name().to_string(),
            to: to.name().to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    const ALL_STATES: [SagaState; 12] = [
        SagaState::Started,
        SagaState::StockVerifying,
        SagaState::StockVerified,
        SagaState::StockReserving,
        SagaState::StockReserved,
        SagaState::PaymentProcessing,
        SagaState::PaymentProcessed,
        SagaState::OrderConfirming,
        SagaState::Completed,
        SagaState::Failed,
        SagaState::Compensating,
        SagaState::Compensated,
    ];

    #[test_case(SagaState::Started, SagaState::StockVerifying; "admission dispatches first step")]
    #[test_case(SagaState::StockVerifying, SagaState::StockVerified; "verify settles")]
    #[test_case(SagaState::StockVerifying, SagaState::Compensating; "verify fails")]
    #[test_case(SagaState::PaymentProcessing, SagaState::Compensating; "payment fails")]
    #[test_case(SagaState::OrderConfirming, SagaState::Completed; "last step completes the saga")]
    #[test_case(SagaState::Compensating, SagaState::Compensated; "clean rollback")]
    #[test_case(SagaState::Compensating, SagaState::Failed; "partial rollback")]
    fn valid_edges(from: SagaState, to: SagaState) {
        assert!(guard_transition(&from, &to).is_ok());
    }

    #[test_case(SagaState::Started, SagaState::PaymentProcessing; "cannot skip steps")]
    #[test_case(SagaState::StockVerified, SagaState::StockVerifying; "cannot move backwards")]
    #[test_case(SagaState::Compensating, SagaState::Completed; "rollback cannot complete")]
    fn invalid_edges(from: SagaState, to: SagaState) {
        assert!(matches!(
            guard_transition(&from, &to),
            Err(CoordinationError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [SagaState::Completed, SagaState::Compensated, SagaState::Failed] {
            assert!(terminal.is_terminal());
            assert!(terminal.valid_transitions().is_empty());
            for target in ALL_STATES {
                assert!(guard_transition(&terminal, &target).is_err());
            }
        }
    }

    #[test]
    fn state_names_round_trip() {
        for state in ALL_STATES {
            assert_eq!(SagaState::parse(state.name()).unwrap(), state);
        }
        assert!(SagaState::parse("Shipping").is_err());
    }

    proptest! {
        /// Every declared edge either stays non-terminal or lands in a state
        /// with no further outgoing edges.
        #[test]
        fn no_edge_escapes_a_terminal(idx in 0usize..12) {
            let from = ALL_STATES[idx];
            for to in from.valid_transitions() {
                prop_assert!(!from.is_terminal());
                if to.is_terminal() {
                    prop_assert!(to.valid_transitions().is_empty());
                }
            }
        }

        /// The guard agrees with the transition table on every pair.
        #[test]
        fn guard_matches_table(a in 0usize..12, b in 0usize..12) {
            let from = ALL_STATES[a];
            let to = ALL_STATES[b];
            let allowed = !from.is_terminal() && from.can_transition_to(&to);
            prop_assert_eq!(guard_transition(&from, &to).is_ok(), allowed);
        }
    }
}
