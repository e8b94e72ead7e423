//! Tool outcomes: one per issued call, tagged once at creation.

use quarry_core::tool::{ToolCall, ToolResponse};
use serde_json::Value;
use std::time::Duration;

/// Keys that carry an explicit record count, in priority order.
const COUNT_FIELDS: [&str; 4] = ["count", "record_count", "total_count", "total"];

/// Keys that commonly wrap the record array.
const DATA_CONTAINERS: [&str; 5] = ["data", "results", "items", "rows", "records"];

/// What a tool call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeBody {
    Data { payload: Value },
    Empty { payload: Value },
    Error { message: String },
}

/// The immutable result of one dispatched call.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub request_id: String,
    pub tool_name: String,
    pub parameters: Value,
    pub body: OutcomeBody,
    pub wall_time: Duration,
    pub record_count: u64,
    pub cache_hit: Option<bool>,
}

impl ToolOutcome {
    /// Build an outcome from a successful service response.
    pub fn from_response(call: &ToolCall, response: ToolResponse, wall_time: Duration) -> Self {
        let record_count = record_count(&response.payload);
        let body = if is_empty_payload(&response.payload) {
            OutcomeBody::Empty {
                payload: response.payload,
            }
        } else {
            OutcomeBody::Data {
                payload: response.payload,
            }
        };

        Self {
            request_id: call.id.clone(),
            tool_name: call.name.clone(),
            parameters: call.arguments.clone(),
            body,
            wall_time,
            record_count,
            cache_hit: response.cache_hit,
        }
    }

    /// Build an outcome for a call that failed or timed out.
    pub fn from_error(call: &ToolCall, message: impl Into<String>, wall_time: Duration) -> Self {
        Self {
            request_id: call.id.clone(),
            tool_name: call.name.clone(),
            parameters: call.arguments.clone(),
            body: OutcomeBody::Error {
                message: message.into(),
            },
            wall_time,
            record_count: 0,
            cache_hit: None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, OutcomeBody::Error { .. })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.body, OutcomeBody::Empty { .. })
    }

    /// The payload, for outcomes that carry one.
    pub fn payload(&self) -> Option<&Value> {
        match &self.body {
            OutcomeBody::Data { payload } | OutcomeBody::Empty { payload } => Some(payload),
            OutcomeBody::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.body {
            OutcomeBody::Error { message } => Some(message),
            _ => None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.wall_time.as_millis().min(u128::from(u64::MAX)) as u64
    }
}

fn explicit_count(obj: &serde_json::Map<String, Value>) -> Option<u64> {
    COUNT_FIELDS.iter().find_map(|key| {
        obj.get(*key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        })
    })
}

fn container_len(obj: &serde_json::Map<String, Value>) -> Option<u64> {
    DATA_CONTAINERS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array))
        .map(|arr| arr.len() as u64)
}

/// Number of records in a payload.
///
/// Explicit count field first, then a top-level array, then a nested data
/// array; anything else counts as zero.
pub fn record_count(payload: &Value) -> u64 {
    match payload {
        Value::Array(items) => items.len() as u64,
        Value::Object(obj) => explicit_count(obj)
            .or_else(|| container_len(obj))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Whether a payload carries no data at all.
pub fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        Value::Object(obj) if obj.is_empty() => true,
        Value::Object(obj) => {
            let has_marker = explicit_count(obj).is_some() || container_len(obj).is_some();
            has_marker && record_count(payload) == 0
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call() -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: "sales_report".into(),
            arguments: json!({"year": 2024}),
        }
    }

    #[test]
    fn count_field_wins() {
        assert_eq!(record_count(&json!({"total": 120, "data": [1, 2]})), 120);
        assert_eq!(record_count(&json!({"count": "7"})), 7);
    }

    #[test]
    fn top_level_array_length() {
        assert_eq!(record_count(&json!([{"a": 1}, {"a": 2}, {"a": 3}])), 3);
    }

    #[test]
    fn nested_container_length() {
        assert_eq!(record_count(&json!({"rows": [1, 2, 3, 4]})), 4);
        assert_eq!(record_count(&json!({"summary": "ok"})), 0);
        assert_eq!(record_count(&json!(42)), 0);
    }

    #[test]
    fn emptiness_rules() {
        assert!(is_empty_payload(&json!(null)));
        assert!(is_empty_payload(&json!([])));
        assert!(is_empty_payload(&json!({})));
        assert!(is_empty_payload(&json!("  ")));
        assert!(is_empty_payload(&json!({"data": []})));
        assert!(is_empty_payload(&json!({"count": 0, "note": "nothing"})));

        assert!(!is_empty_payload(&json!({"summary": "ok"})));
        assert!(!is_empty_payload(&json!({"data": [1]})));
        assert!(!is_empty_payload(&json!(0)));
    }

    #[test]
    fn response_tagging() {
        let outcome = ToolOutcome::from_response(
            &call(),
            ToolResponse::new(json!({"data": []})),
            Duration::from_millis(5),
        );
        assert!(outcome.is_empty());
        assert_eq!(outcome.record_count, 0);

        let outcome = ToolOutcome::from_response(
            &call(),
            ToolResponse {
                payload: json!([1, 2]),
                cache_hit: Some(true),
            },
            Duration::from_millis(5),
        );
        assert!(matches!(outcome.body, OutcomeBody::Data { .. }));
        assert_eq!(outcome.record_count, 2);
        assert_eq!(outcome.cache_hit, Some(true));
        assert_eq!(outcome.parameters, json!({"year": 2024}));
    }

    #[test]
    fn error_outcome() {
        let outcome = ToolOutcome::from_error(&call(), "network down", Duration::ZERO);
        assert!(outcome.is_error());
        assert_eq!(outcome.error_message(), Some("network down"));
        assert!(outcome.payload().is_none());
    }
}
