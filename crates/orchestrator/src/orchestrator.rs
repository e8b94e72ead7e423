//! Iteration controller: the run loop.
//!
//! A run alternates model invocations and tool rounds until the model
//! answers without requesting tools or a budget runs out:
//!
//! 1. Classify the query mode and compact the history into a working context.
//! 2. Invoke the model with a directive for this iteration, streaming text.
//! 3. If it requested tools, dispatch them, enrich each outcome, and append
//!    the tool-call turn, one tool-result turn and a continuation turn.
//! 4. Repeat; the last permitted invocation is offered no tools.
//!
//! Every run ends with exactly one terminal event (`done` or `error`)
//! unless the caller disconnects first.

use chrono::Utc;
use quarry_config::{AppConfig, OrchestratorConfig};
use quarry_core::error::ProviderError;
use quarry_core::event::{DomainEvent, EventBus};
use quarry_core::message::{Message, MessageToolCall, RunId, ToolResultPart};
use quarry_core::provider::{Provider, ProviderRequest, Usage};
use quarry_core::tool::{Credentials, ToolCall, ToolService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::classifier::{self, ClassifierSettings};
use crate::compactor::ContextCompactor;
use crate::directive::{self, ContinuationInput, DirectiveInput};
use crate::dispatcher::{DispatchRequest, Dispatcher};
use crate::emitter::StreamEmitter;
use crate::guard::RunFailure;
use crate::query_mode::QueryMode;
use crate::run_state::RunState;
use crate::stream_event::StreamEvent;

/// One inbound run: the new message, prior turns, and the caller's credentials.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub message: String,
    pub history: Vec<Message>,
    pub credentials: Credentials,
}

impl RunRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    /// `done` was emitted
    Completed { budget_exhausted: bool },
    /// `error` was emitted
    Failed(RunFailure),
    /// The caller went away; nothing terminal was delivered
    Disconnected,
}

/// What one model invocation produced.
struct ModelTurn {
    content: String,
    tool_calls: Vec<MessageToolCall>,
    usage: Option<Usage>,
}

enum InvokeError {
    Provider(ProviderError),
    Disconnected,
}

/// Drives runs against a model provider and a tool service.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolService>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    config: OrchestratorConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolService>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            config: OrchestratorConfig::default(),
            event_bus: None,
        }
    }

    /// Build from application config: model, sampling and orchestrator budgets.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolService>,
        config: &AppConfig,
    ) -> Self {
        Self::new(provider, tools, config.model.clone())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_config(config.orchestrator.clone())
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Publish domain events to this bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a run on its own task and hand back the event stream.
    ///
    /// Dropping the receiver cancels the run at its next suspension point.
    pub fn run_stream(&self, request: RunRequest) -> mpsc::Receiver<StreamEvent> {
        let (mut emitter, rx) = StreamEmitter::channel(self.config.event_buffer);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run(request, &mut emitter).await;
        });
        rx
    }

    /// Execute one run to completion, emitting every event through `emitter`.
    pub async fn run(&self, request: RunRequest, emitter: &mut StreamEmitter) -> RunEnd {
        let RunRequest {
            message,
            history,
            credentials,
        } = request;

        let mode = QueryMode::classify(&message, &self.config.query_mode);
        let mut state = RunState::new(RunId::new(), mode.max_iterations(&self.config));
        let run_id = state.run_id.to_string();

        info!(
            run_id = %run_id,
            mode = %mode,
            max_iterations = state.max_iterations,
            history_turns = history.len(),
            "Run started"
        );
        self.publish(DomainEvent::RunStarted {
            run_id: run_id.clone(),
            query_mode: mode.as_str().to_string(),
            max_iterations: state.max_iterations,
            timestamp: Utc::now(),
        });

        let compactor = ContextCompactor::new(&self.config.context);
        let mut context = match compactor.compact(&history, &message) {
            Ok(context) => context,
            Err(e) => return self.fail(&run_id, RunFailure::from(&e), emitter).await,
        };

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.tools),
            Duration::from_secs(self.config.tool_timeout_secs),
            self.config.min_data_threshold,
        );
        let settings = ClassifierSettings::from_config(&self.config);
        let catalog = self.tools.definitions();
        let mut budget_exhausted = false;

        loop {
            if emitter.is_disconnected() {
                info!(run_id = %run_id, "Caller disconnected; stopping run");
                return RunEnd::Disconnected;
            }

            if state.iteration_count > 0 && self.time_budget_spent(&state) {
                warn!(
                    run_id = %run_id,
                    elapsed_ms = state.elapsed().as_millis() as u64,
                    "Run time budget exhausted"
                );
                budget_exhausted = true;
                self.publish_budget_exhausted(&state, "time_budget");
                break;
            }

            let iteration = state.begin_iteration();
            let record_budget_spent = self.record_budget_spent(&state);
            let is_final = state.at_iteration_cap() || record_budget_spent;
            let tools_offered = !is_final && !catalog.is_empty();
            let record_limit = directive::record_limit(iteration, &self.config);

            let system = directive::system_directive(&DirectiveInput {
                mode,
                iteration,
                max_iterations: state.max_iterations,
                record_limit,
                tools_offered,
            });

            if !compactor.relieve(&mut context) {
                warn!(
                    run_id = %run_id,
                    iteration,
                    "Working context could not be brought under the ceiling"
                );
            }

            debug!(
                run_id = %run_id,
                iteration,
                is_final,
                record_limit,
                turns = context.len(),
                "Invoking model"
            );

            let request = ProviderRequest {
                model: self.model.clone(),
                system: Some(system),
                messages: context.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: if tools_offered {
                    catalog.clone()
                } else {
                    vec![]
                },
            };

            let turn = match self.invoke(request, emitter).await {
                Ok(turn) => turn,
                Err(InvokeError::Disconnected) => {
                    info!(run_id = %run_id, iteration, "Caller disconnected during model output");
                    return RunEnd::Disconnected;
                }
                Err(InvokeError::Provider(e)) => {
                    warn!(run_id = %run_id, iteration, error = %e, "Model invocation failed");
                    return self.fail(&run_id, RunFailure::from(&e), emitter).await;
                }
            };

            state.add_usage(turn.usage);
            self.publish(DomainEvent::ResponseGenerated {
                run_id: run_id.clone(),
                model: self.model.clone(),
                tokens_used: turn.usage.map_or(0, |u| u.total_tokens),
                timestamp: Utc::now(),
            });

            if turn.tool_calls.is_empty() {
                debug!(run_id = %run_id, iteration, "Model answered without tools");
                break;
            }

            if !tools_offered {
                warn!(
                    run_id = %run_id,
                    iteration,
                    ignored = turn.tool_calls.len(),
                    "Model requested tools when none were offered; ignoring"
                );
                if is_final {
                    budget_exhausted = true;
                    let reason = if record_budget_spent && !state.at_iteration_cap() {
                        "record_budget"
                    } else {
                        "iteration_cap"
                    };
                    self.publish_budget_exhausted(&state, reason);
                }
                break;
            }

            let requests = self.dispatch_requests(&turn.tool_calls, &state);
            info!(run_id = %run_id, iteration, calls = requests.len(), "Dispatching tool round");

            let round = dispatcher.dispatch(requests, &credentials, emitter).await;
            if round.cancelled {
                info!(run_id = %run_id, iteration, "Caller disconnected during tool round");
                return RunEnd::Disconnected;
            }

            let mut parts = Vec::with_capacity(round.outcomes.len());
            let mut any_failed = false;
            let mut any_empty = false;
            for outcome in &round.outcomes {
                state.record(outcome);
                self.publish(DomainEvent::ToolExecuted {
                    run_id: run_id.clone(),
                    tool_name: outcome.tool_name.clone(),
                    success: !outcome.is_error(),
                    record_count: outcome.record_count,
                    duration_ms: outcome.duration_ms(),
                    cache_hit: outcome.cache_hit,
                    timestamp: Utc::now(),
                });

                let annotated = classifier::enrich(outcome, &message, mode, &settings);
                any_failed |= annotated.quality == classifier::Quality::Failed;
                any_empty |= annotated.quality == classifier::Quality::Empty;
                parts.push(ToolResultPart {
                    call_id: outcome.request_id.clone(),
                    name: outcome.tool_name.clone(),
                    summary: annotated.summary.clone(),
                    payload: Some(annotated.to_payload()),
                });
            }

            let next_is_final =
                iteration + 1 >= state.max_iterations || self.record_budget_spent(&state);

            let mut assistant = Message::assistant(turn.content);
            assistant.tool_calls = turn.tool_calls;
            context.push(assistant);
            context.push(Message::tool_results(parts));
            context.push(Message::user(directive::continuation_instruction(
                &ContinuationInput {
                    mode,
                    any_failed,
                    any_empty,
                    next_is_final,
                },
            )));
        }

        state.completed = true;
        let done = StreamEvent::Done {
            run_id: run_id.clone(),
            iterations: state.iteration_count,
            tool_calls_made: state.tool_calls_made(),
            total_records: state.total_records_gathered,
            budget_exhausted,
            usage: state.usage,
        };
        if emitter.emit(done).await.is_err() {
            info!(run_id = %run_id, "Caller disconnected before completion");
            return RunEnd::Disconnected;
        }

        info!(
            run_id = %run_id,
            iterations = state.iteration_count,
            tool_calls = state.tool_calls_made(),
            records = state.total_records_gathered,
            budget_exhausted,
            events = emitter.sent(),
            elapsed_ms = state.elapsed().as_millis() as u64,
            "Run complete"
        );
        RunEnd::Completed { budget_exhausted }
    }

    /// Stream one model invocation, forwarding text as it arrives.
    async fn invoke(
        &self,
        request: ProviderRequest,
        emitter: &mut StreamEmitter,
    ) -> Result<ModelTurn, InvokeError> {
        let mut stream = self
            .provider
            .stream(request)
            .await
            .map_err(InvokeError::Provider)?;

        let mut content = String::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();
        let mut usage = None;

        while let Some(chunk) = stream.recv().await {
            let chunk = chunk.map_err(InvokeError::Provider)?;

            if let Some(text) = chunk.content
                && !text.is_empty()
            {
                content.push_str(&text);
                emitter
                    .emit(StreamEvent::Content { text })
                    .await
                    .map_err(|_| InvokeError::Disconnected)?;
            }

            // Providers hand over fully assembled calls
            tool_calls.extend(chunk.tool_calls);

            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        // Tool results are paired with calls by id
        for (index, call) in tool_calls.iter_mut().enumerate() {
            if call.id.is_empty() {
                call.id = format!("call_{index}");
            }
        }

        Ok(ModelTurn {
            content,
            tool_calls,
            usage,
        })
    }

    /// Parse the model's tool calls and flag repeats.
    fn dispatch_requests(&self, calls: &[MessageToolCall], state: &RunState) -> Vec<DispatchRequest> {
        let mut requests: Vec<DispatchRequest> = Vec::with_capacity(calls.len());
        for part in calls {
            let call = ToolCall::from_message_call(part);
            let duplicate = state.is_duplicate(&call)
                || requests
                    .iter()
                    .any(|r| r.call.name == call.name && r.call.arguments == call.arguments);
            if duplicate {
                warn!(
                    run_id = %state.run_id,
                    tool = %call.name,
                    parameters = %call.arguments,
                    "Duplicate tool call; executing anyway"
                );
                self.publish(DomainEvent::DuplicateToolCall {
                    run_id: state.run_id.to_string(),
                    tool_name: call.name.clone(),
                    timestamp: Utc::now(),
                });
            }
            requests.push(DispatchRequest { call, duplicate });
        }
        requests
    }

    fn record_budget_spent(&self, state: &RunState) -> bool {
        self.config
            .max_total_records
            .is_some_and(|max| state.total_records_gathered >= max)
    }

    fn time_budget_spent(&self, state: &RunState) -> bool {
        self.config
            .max_run_secs
            .is_some_and(|max| state.elapsed() >= Duration::from_secs(max))
    }

    async fn fail(&self, run_id: &str, failure: RunFailure, emitter: &mut StreamEmitter) -> RunEnd {
        warn!(
            run_id = %run_id,
            category = failure.category.as_str(),
            error = %failure.message,
            "Run failed"
        );
        self.publish(DomainEvent::RunFailed {
            run_id: run_id.to_string(),
            category: failure.category.as_str().to_string(),
            error_message: failure.message.clone(),
            timestamp: Utc::now(),
        });
        if emitter.emit(failure.to_event()).await.is_err() {
            return RunEnd::Disconnected;
        }
        RunEnd::Failed(failure)
    }

    fn publish_budget_exhausted(&self, state: &RunState, reason: &str) {
        self.publish(DomainEvent::BudgetExhausted {
            run_id: state.run_id.to_string(),
            iterations: state.iteration_count,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}
