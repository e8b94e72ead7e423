//! # Quarry Core
//!
//! Domain types, boundary traits, and error definitions for the Quarry
//! orchestrator. This crate has no framework dependencies; it defines the
//! model that the other crates implement against.
//!
//! The two external collaborators of a run are defined here as traits:
//! [`Provider`] for the language-model service and [`ToolService`] for the
//! tool-execution service. Implementations live in their own crates, and
//! tests swap in scripted stand-ins.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ContextError, ProviderError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role, RunId, ToolResultPart};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{Credentials, Tool, ToolCall, ToolRegistry, ToolResponse, ToolService};
