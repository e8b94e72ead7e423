//! Message and run identity types.
//!
//! These are the value objects that flow through a run:
//! the caller's history and message become turns, the model answers with
//! text and tool-call parts, and tool outcomes come back as tool-result parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn in the working context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// Directive text
    System,
    /// Tool outcomes for one round
    Tool,
}

/// A single turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who produced this turn
    pub role: Role,

    /// The text content
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Tool outcomes carried by a tool turn (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultPart>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool turn holding every result of one round.
    pub fn tool_results(results: Vec<ToolResultPart>) -> Self {
        let mut msg = Self::with_role(Role::Tool, String::new());
        msg.tool_results = results;
        msg
    }

    /// Whether this turn carries anything a model could read.
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
            || !self.tool_calls.is_empty()
            || self
                .tool_results
                .iter()
                .any(|r| !r.summary.trim().is_empty() || r.payload.is_some())
    }

    /// Size of this turn in its JSON wire form.
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// One tool outcome as placed back into the working context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultPart {
    /// The tool call this result answers
    pub call_id: String,

    /// Tool name
    pub name: String,

    /// Short human-readable summary; survives compaction
    pub summary: String,

    /// Structured quality-annotated payload; dropped from historical turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ToolResultPart {
    /// The text handed to the model for this result.
    pub fn model_text(&self) -> String {
        match &self.payload {
            Some(payload) => serde_json::to_string(payload).unwrap_or_else(|_| self.summary.clone()),
            None => self.summary.clone(),
        }
    }
}

/// Sum of serialized sizes for a slice of turns.
pub fn serialized_size(messages: &[Message]) -> usize {
    messages.iter().map(Message::serialized_size).sum()
}
