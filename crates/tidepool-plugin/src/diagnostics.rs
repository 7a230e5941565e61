//! Per-session diagnostic stream.
//!
//! A bounded ring of the most recent dispatched calls and plugin log lines.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default ring capacity.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Ok,
    Fault,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub at: DateTime<Utc>,
    pub level: DiagnosticLevel,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CallOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    pub message: String,
}

#[derive(Debug)]
pub struct DiagnosticLog {
    capacity: usize,
    entries: Mutex<VecDeque<DiagnosticEntry>>,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DEFAULT_DIAGNOSTICS_CAPACITY)
    }
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn push(&self, entry: DiagnosticEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Record one dispatched call.
    pub fn record_call(
        &self,
        operation: &str,
        outcome: CallOutcome,
        elapsed: Duration,
        message: impl Into<String>,
    ) {
        let level = match outcome {
            CallOutcome::Ok | CallOutcome::Cancelled => DiagnosticLevel::Info,
            CallOutcome::Timeout => DiagnosticLevel::Warn,
            CallOutcome::Fault => DiagnosticLevel::Error,
        };
        self.push(DiagnosticEntry {
            at: Utc::now(),
            level,
            operation: operation.to_string(),
            outcome: Some(outcome),
            elapsed_ms: Some(elapsed.as_millis() as u64),
            message: message.into(),
        });
    }

    /// Record a log line emitted by the plugin itself.
    pub fn record_plugin_log(&self, level: DiagnosticLevel, operation: &str, message: String) {
        self.push(DiagnosticEntry {
            at: Utc::now(),
            level,
            operation: operation.to_string(),
            outcome: None,
            elapsed_ms: None,
            message,
        });
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<DiagnosticEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
