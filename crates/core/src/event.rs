//! Domain event system: decoupled observation of runs.
//!
//! Events are published when something interesting happens during a run.
//! Observers (metrics exporters, audit sinks) subscribe without the
//! orchestrator knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A run accepted its request and classified the query
    RunStarted {
        run_id: String,
        query_mode: String,
        max_iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// The model answered one invocation
    ResponseGenerated {
        run_id: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool call resolved
    ToolExecuted {
        run_id: String,
        tool_name: String,
        success: bool,
        record_count: u64,
        duration_ms: u64,
        cache_hit: Option<bool>,
        timestamp: DateTime<Utc>,
    },

    /// A tool call repeated an earlier call of the same run
    DuplicateToolCall {
        run_id: String,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    /// A run stopped because an iteration, record, or time budget ran out
    BudgetExhausted {
        run_id: String,
        iterations: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A run ended with an error event
    RunFailed {
        run_id: String,
        category: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            run_id: "run-1".into(),
            tool_name: "sales_report".into(),
            success: true,
            record_count: 12,
            duration_ms: 42,
            cache_hit: Some(true),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted {
                tool_name,
                success,
                record_count,
                ..
            } => {
                assert_eq!(tool_name, "sales_report");
                assert!(success);
                assert_eq!(*record_count, 12);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::RunFailed {
            run_id: "run-1".into(),
            category: "provider".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
