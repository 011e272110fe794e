//! Operation telemetry.
//!
//! The memory system reports each operation to an injected
//! [`OperationSink`]. Sinks are fire-and-forget and must not block.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of operation being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Search,
    Retrieval,
    Store,
    Compression,
    Optimization,
    Promotion,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Retrieval => "retrieval",
            Self::Store => "store",
            Self::Compression => "compression",
            Self::Optimization => "optimization",
            Self::Promotion => "promotion",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One reported operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEvent {
    pub operation_type: OperationType,
    pub query: Option<String>,
    pub params: serde_json::Value,
    pub duration_ms: f64,
    pub summary: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl OperationEvent {
    pub fn new(operation_type: OperationType, duration_ms: f64) -> Self {
        Self {
            operation_type,
            query: None,
            params: serde_json::Value::Null,
            duration_ms,
            summary: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_summary(mut self, summary: serde_json::Value) -> Self {
        self.summary = summary;
        self
    }
}

/// Receiver of operation events.
pub trait OperationSink: Send + Sync {
    fn record(&self, event: OperationEvent);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl OperationSink for NoopSink {
    fn record(&self, _event: OperationEvent) {}
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OperationSink for TracingSink {
    fn record(&self, event: OperationEvent) {
        tracing::debug!(
            operation = %event.operation_type,
            query = event.query.as_deref().unwrap_or(""),
            duration_ms = event.duration_ms,
            summary = %event.summary,
            "Memory operation"
        );
    }
}

/// Keeps the most recent events in memory.
#[derive(Debug)]
pub struct RecordingSink {
    events: Mutex<VecDeque<OperationEvent>>,
    limit: usize,
}

impl RecordingSink {
    pub fn new(limit: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    /// Up to `limit` events, newest last.
    pub fn recent(&self, limit: usize) -> Vec<OperationEvent> {
        let Ok(events) = self.events.lock() else {
            return Vec::new();
        };
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn count(&self, operation_type: OperationType) -> usize {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.operation_type == operation_type)
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new(100)
    }
}

impl OperationSink for RecordingSink {
    fn record(&self, event: OperationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push_back(event);
            while events.len() > self.limit {
                events.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recording_sink_is_bounded() {
        let sink = RecordingSink::new(2);
        for i in 0..3 {
            sink.record(OperationEvent::new(OperationType::Search, 1.0).with_query(format!("q{i}")));
        }

        let recent = sink.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query.as_deref(), Some("q1"));
        assert_eq!(recent[1].query.as_deref(), Some("q2"));
        assert_eq!(sink.recent(1)[0].query.as_deref(), Some("q2"));
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let event = OperationEvent::new(OperationType::Promotion, 2.5)
            .with_params(json!({"candidates": 3}))
            .with_summary(json!({"promoted": 1}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["operation_type"], "promotion");
        assert_eq!(value["params"]["candidates"], 3);
    }

    #[test]
    fn test_count_by_type() {
        let sink = RecordingSink::default();
        sink.record(OperationEvent::new(OperationType::Store, 0.0));
        sink.record(OperationEvent::new(OperationType::Search, 0.0));
        NoopSink.record(OperationEvent::new(OperationType::Search, 0.0));
        TracingSink.record(OperationEvent::new(OperationType::Search, 0.0));
        assert_eq!(sink.count(OperationType::Search), 1);
        assert_eq!(sink.count(OperationType::Store), 1);
    }
}
