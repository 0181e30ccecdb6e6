// Copyright 2025 Cowboy AI, LLC.

//! Structured lifecycle journal
//!
//! Every lifecycle milestone (start, step outcome, transition, compensation,
//! controlled failure) is recorded as one newline-delimited JSON object.
//! The journal is a sink independent of the tracing subscriber: operators
//! tail it for saga forensics while tracing carries the operational logs.

use crate::identifiers::{CorrelationId, SagaId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Severity of a journal record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine milestone
    Info,
    /// Degraded but recoverable
    Warning,
    /// Failure requiring attention
    Error,
}

/// Category of a journal record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Saga admission and settlement
    Lifecycle,
    /// Participant step activity
    Step,
    /// State machine transitions
    Transition,
    /// Rollback activity
    Compensation,
    /// Injected failures
    ControlledFailure,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Lifecycle => "lifecycle",
            Category::Step => "step",
            Category::Transition => "transition",
            Category::Compensation => "compensation",
            Category::ControlledFailure => "controlled_failure",
        };
        write!(f, "{s}")
    }
}

/// One structured lifecycle record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    /// When the milestone occurred
    pub timestamp: DateTime<Utc>,
    /// Milestone name (e.g. `saga_started`, `step_failed`)
    pub event_type: String,
    /// The saga involved
    pub saga_id: SagaId,
    /// The saga's type name
    pub saga_type: String,
    /// Service that recorded the milestone
    pub service_name: String,
    /// Causal-chain identifier
    pub correlation_id: CorrelationId,
    /// Severity
    pub severity: Severity,
    /// Category
    pub category: Category,
    /// Milestone detail
    pub data: Map<String, Value>,
}

impl JournalRecord {
    /// Build a record stamped with the current time
    pub fn new(
        event_type: impl Into<String>,
        saga_id: SagaId,
        saga_type: impl Into<String>,
        service_name: impl Into<String>,
        correlation_id: CorrelationId,
        severity: Severity,
        category: Category,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.into(),
            saga_id,
            saga_type: saga_type.into(),
            service_name: service_name.into(),
            correlation_id,
            severity,
            category,
            data: Map::new(),
        }
    }

    /// Attach a detail field
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// NDJSON journal writer
///
/// Writes are serialized behind a mutex; a sink error is logged and dropped
/// rather than failing the saga.
#[derive(Clone)]
pub struct Journal {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").finish()
    }
}

impl Journal {
    /// Journal writing to an arbitrary sink
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Journal writing to stdout
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Journal writing into a shared buffer, for tests and introspection
    pub fn memory() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let journal = Self::new(Box::new(SharedBuffer(buffer.clone())));
        (journal, buffer)
    }

    /// Append one NDJSON record
    pub fn record(&self, record: JournalRecord) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize journal record");
                return;
            }
        };
        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(sink, "{line}") {
            warn!(error = %e, "failed to write journal record");
        }
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
