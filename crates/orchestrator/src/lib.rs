//! The orchestration engine: model invocations and tool rounds, streamed.
//!
//! A run follows an **Invoke → Dispatch → Enrich → Continue** cycle:
//!
//! 1. **Compact** prior turns into a bounded working context
//! 2. **Invoke** the model with an iteration-aware directive, streaming text
//! 3. **Dispatch** every requested tool call concurrently
//! 4. **Enrich** each outcome with a quality label and guidance
//! 5. **Continue** with the results appended, until the model answers
//!    without tools or a budget runs out
//!
//! Callers see the run as a stream of [`StreamEvent`]s ending in exactly one
//! `done` or `error`.

pub mod classifier;
pub mod compactor;
pub mod dates;
pub mod directive;
pub mod dispatcher;
pub mod emitter;
pub mod guard;
pub mod orchestrator;
pub mod outcome;
pub mod query_mode;
pub mod run_state;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use classifier::{ClassifierSettings, Quality, QualityAnnotatedResult};
pub use compactor::ContextCompactor;
pub use dispatcher::{DispatchRequest, DispatchRound, Dispatcher};
pub use emitter::{EmitError, StreamEmitter};
pub use guard::{ErrorCategory, RunFailure};
pub use orchestrator::{Orchestrator, RunEnd, RunRequest};
pub use outcome::{OutcomeBody, ToolOutcome};
pub use query_mode::QueryMode;
pub use run_state::RunState;
pub use stream_event::StreamEvent;
