//! Run-level streaming events.
//!
//! `StreamEvent` is what a caller sees of a run. The gateway forwards each
//! event over SSE using `event_type()` as the event name.
//!
//! - `content`       text from the model, in emission order
//! - `tool_started`  a tool call was issued (issue order)
//! - `tool_finished` a tool call resolved (completion order)
//! - `error`         the run failed; terminal
//! - `done`          the run completed; terminal

use quarry_core::provider::Usage;
use serde::{Deserialize, Serialize};

use crate::classifier::Quality;
use crate::guard::ErrorCategory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial text from the model.
    Content { text: String },

    /// A tool call was issued.
    ToolStarted {
        id: String,
        name: String,
        parameters: serde_json::Value,
        /// Same name and parameters as an earlier call of this run
        duplicate: bool,
    },

    /// A tool call resolved.
    ToolFinished {
        id: String,
        name: String,
        quality: Quality,
        record_count: u64,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_hit: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The run failed.
    Error {
        category: ErrorCategory,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },

    /// The run completed.
    Done {
        run_id: String,
        iterations: u32,
        tool_calls_made: usize,
        total_records: u64,
        budget_exhausted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolFinished { .. } => "tool_finished",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// No event may follow a terminal one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}
