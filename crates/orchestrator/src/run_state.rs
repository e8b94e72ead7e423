//! Per-run bookkeeping owned by the iteration controller.

use quarry_core::message::RunId;
use quarry_core::provider::Usage;
use quarry_core::tool::ToolCall;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::outcome::ToolOutcome;

/// One executed call, kept for duplicate detection.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub name: String,
    pub parameters: Value,
    pub record_count: u64,
}

#[derive(Debug)]
pub struct RunState {
    pub run_id: RunId,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub tool_call_history: Vec<ToolCallRecord>,
    pub total_records_gathered: u64,
    pub completed: bool,
    pub usage: Option<Usage>,
    started: Instant,
}

impl RunState {
    pub fn new(run_id: RunId, max_iterations: u32) -> Self {
        Self {
            run_id,
            iteration_count: 0,
            max_iterations,
            tool_call_history: Vec::new(),
            total_records_gathered: 0,
            completed: false,
            usage: None,
            started: Instant::now(),
        }
    }

    /// Advance to the next iteration and return its 1-based number.
    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration_count += 1;
        self.iteration_count
    }

    /// Whether the current iteration is the last the mode permits.
    pub fn at_iteration_cap(&self) -> bool {
        self.iteration_count >= self.max_iterations
    }

    /// Whether `call` repeats an earlier call by name and parameters.
    pub fn is_duplicate(&self, call: &ToolCall) -> bool {
        self.tool_call_history
            .iter()
            .any(|r| r.name == call.name && r.parameters == call.arguments)
    }

    pub fn record(&mut self, outcome: &ToolOutcome) {
        self.total_records_gathered += outcome.record_count;
        self.tool_call_history.push(ToolCallRecord {
            name: outcome.tool_name.clone(),
            parameters: outcome.parameters.clone(),
            record_count: outcome.record_count,
        });
    }

    pub fn add_usage(&mut self, usage: Option<Usage>) {
        if let Some(usage) = usage {
            self.usage.get_or_insert_with(Usage::default).add(&usage);
        }
    }

    pub fn tool_calls_made(&self) -> usize {
        self.tool_call_history.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
