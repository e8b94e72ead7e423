//! Parallel tool dispatch.
//!
//! Every call of a round runs in its own task on a `JoinSet`; the round
//! joins all of them before returning. `tool_started` goes out in issue
//! order before each spawn, `tool_finished` in completion order as tasks
//! resolve, and outcomes come back in request order. Calls naming a tool
//! outside the service's catalog fail without reaching the service.

use quarry_core::error::ToolError;
use quarry_core::tool::{Credentials, ToolCall, ToolService};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::classifier;
use crate::emitter::StreamEmitter;
use crate::outcome::ToolOutcome;
use crate::stream_event::StreamEvent;

/// One call to issue this round.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub call: ToolCall,
    /// Repeats an earlier call of the run
    pub duplicate: bool,
}

/// The joined result of a round.
#[derive(Debug)]
pub struct DispatchRound {
    /// One outcome per issued call, in request order
    pub outcomes: Vec<ToolOutcome>,
    /// The caller disconnected during the round
    pub cancelled: bool,
}

pub struct Dispatcher {
    service: Arc<dyn ToolService>,
    timeout: Duration,
    min_data_threshold: u64,
}

impl Dispatcher {
    pub fn new(service: Arc<dyn ToolService>, timeout: Duration, min_data_threshold: u64) -> Self {
        Self {
            service,
            timeout,
            min_data_threshold,
        }
    }

    /// Run every request concurrently and wait for all of them.
    ///
    /// If the caller disconnects, nothing further is issued; calls already
    /// in flight drain and their events are dropped.
    pub async fn dispatch(
        &self,
        requests: Vec<DispatchRequest>,
        credentials: &Credentials,
        emitter: &mut StreamEmitter,
    ) -> DispatchRound {
        let mut join_set = JoinSet::new();
        let mut issued: Vec<ToolCall> = Vec::with_capacity(requests.len());
        let mut cancelled = false;
        let catalog: HashSet<String> = self
            .service
            .definitions()
            .into_iter()
            .map(|def| def.name)
            .collect();

        for request in requests {
            let started = StreamEvent::ToolStarted {
                id: request.call.id.clone(),
                name: request.call.name.clone(),
                parameters: request.call.arguments.clone(),
                duplicate: request.duplicate,
            };
            if emitter.emit(started).await.is_err() {
                cancelled = true;
                break;
            }

            let index = issued.len();
            let service = Arc::clone(&self.service);
            let credentials = credentials.clone();
            let call = request.call.clone();
            let timeout = self.timeout;
            let known = catalog.contains(&call.name);

            if known {
                debug!(tool = %call.name, call_id = %call.id, "Dispatching tool call");
            } else {
                warn!(tool = %call.name, call_id = %call.id, "Model requested a tool outside the catalog");
            }

            join_set.spawn(async move {
                let start = Instant::now();
                if !known {
                    let e = ToolError::NotFound(call.name.clone());
                    return (index, ToolOutcome::from_error(&call, e.to_string(), start.elapsed()));
                }
                let outcome =
                    match tokio::time::timeout(timeout, service.execute(&call, &credentials)).await {
                        Ok(Ok(response)) => {
                            ToolOutcome::from_response(&call, response, start.elapsed())
                        }
                        Ok(Err(e)) => ToolOutcome::from_error(&call, e.to_string(), start.elapsed()),
                        Err(_) => {
                            let e = ToolError::Timeout {
                                tool_name: call.name.clone(),
                                timeout_secs: timeout.as_secs(),
                            };
                            ToolOutcome::from_error(&call, e.to_string(), start.elapsed())
                        }
                    };
                (index, outcome)
            });
            issued.push(request.call);
        }

        let mut slots: Vec<Option<ToolOutcome>> = (0..issued.len()).map(|_| None).collect();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    self.finish(&outcome, emitter, &mut cancelled).await;
                    slots[index] = Some(outcome);
                }
                Err(e) => {
                    error!(error = %e, "Tool task failed");
                }
            }
        }

        // Slots of tasks that panicked or were aborted
        let mut outcomes = Vec::with_capacity(slots.len());
        for (slot, call) in slots.into_iter().zip(&issued) {
            let outcome = match slot {
                Some(outcome) => outcome,
                None => {
                    let outcome = ToolOutcome::from_error(
                        call,
                        "tool task failed during execution",
                        Duration::ZERO,
                    );
                    self.finish(&outcome, emitter, &mut cancelled).await;
                    outcome
                }
            };
            outcomes.push(outcome);
        }

        DispatchRound {
            outcomes,
            cancelled,
        }
    }

    /// Log a resolved call and report it unless the caller is gone.
    async fn finish(&self, outcome: &ToolOutcome, emitter: &mut StreamEmitter, cancelled: &mut bool) {
        info!(
            tool = %outcome.tool_name,
            success = !outcome.is_error(),
            records = outcome.record_count,
            duration_ms = outcome.duration_ms(),
            "Tool call finished"
        );

        if *cancelled {
            return;
        }
        let finished = StreamEvent::ToolFinished {
            id: outcome.request_id.clone(),
            name: outcome.tool_name.clone(),
            quality: classifier::classify(outcome, self.min_data_threshold),
            record_count: outcome.record_count,
            duration_ms: outcome.duration_ms(),
            cache_hit: outcome.cache_hit,
            error: outcome.error_message().map(String::from),
        };
        if emitter.emit(finished).await.is_err() {
            *cancelled = true;
        }
    }
}
