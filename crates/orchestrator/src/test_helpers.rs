//! Shared test helpers: a scripted model and a scripted tool service.

use async_trait::async_trait;
use quarry_core::error::{ProviderError, ToolError};
use quarry_core::message::{Message, MessageToolCall};
use quarry_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage,
};
use quarry_core::tool::{Credentials, ToolCall, ToolResponse, ToolService};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::stream_event::StreamEvent;

/// One scripted model invocation.
#[derive(Clone)]
pub enum ScriptedTurn {
    /// Stream these text chunks, then finish with these tool calls.
    Reply {
        chunks: Vec<String>,
        tool_calls: Vec<MessageToolCall>,
    },
    /// Fail before streaming anything.
    Fail(ProviderError),
    /// Stream some text, then break.
    Interrupt { chunks: Vec<String>, error: ProviderError },
}

impl ScriptedTurn {
    pub fn text(text: &str) -> Self {
        Self::Reply {
            chunks: vec![text.to_string()],
            tool_calls: vec![],
        }
    }

    pub fn tools(tool_calls: Vec<MessageToolCall>) -> Self {
        Self::Reply {
            chunks: vec![],
            tool_calls,
        }
    }
}

/// A mock provider that plays scripted turns in sequence.
///
/// Panics if more calls are made than turns provided, unless built with
/// `repeating`, which replays the last turn forever.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    repeat_last: bool,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(turn: ScriptedTurn) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![turn])
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![ScriptedTurn::text(text)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_turn(&self, request: ProviderRequest) -> ScriptedTurn {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        let mut turns = self.turns.lock().unwrap();
        if self.repeat_last && turns.len() == 1 {
            return turns[0].clone();
        }
        turns.pop_front().unwrap_or_else(|| {
            panic!("ScriptedProvider: no more turns (call #{})", requests.len())
        })
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next_turn(request) {
            ScriptedTurn::Reply { chunks, tool_calls } => {
                let mut message = Message::assistant(chunks.concat());
                message.tool_calls = tool_calls;
                Ok(ProviderResponse {
                    message,
                    usage: Some(usage()),
                    model: "mock-model".into(),
                })
            }
            ScriptedTurn::Fail(e) | ScriptedTurn::Interrupt { error: e, .. } => Err(e),
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let turn = self.next_turn(request);
        let (tx, rx) = mpsc::channel(16);
        match turn {
            ScriptedTurn::Fail(e) => return Err(e),
            ScriptedTurn::Reply { chunks, tool_calls } => {
                tokio::spawn(async move {
                    for chunk in chunks {
                        let _ = tx
                            .send(Ok(StreamChunk {
                                content: Some(chunk),
                                ..StreamChunk::default()
                            }))
                            .await;
                    }
                    let _ = tx
                        .send(Ok(StreamChunk {
                            content: None,
                            tool_calls,
                            done: true,
                            usage: Some(usage()),
                        }))
                        .await;
                });
            }
            ScriptedTurn::Interrupt { chunks, error } => {
                tokio::spawn(async move {
                    for chunk in chunks {
                        let _ = tx
                            .send(Ok(StreamChunk {
                                content: Some(chunk),
                                ..StreamChunk::default()
                            }))
                            .await;
                    }
                    let _ = tx.send(Err(error)).await;
                });
            }
        }
        Ok(rx)
    }
}

/// How a scripted tool answers.
#[derive(Clone)]
pub enum ToolBehavior {
    Return(serde_json::Value),
    Cached(serde_json::Value),
    Fail(ToolError),
    /// Sleep, then return the payload
    Delay(Duration, serde_json::Value),
    Panic,
}

/// A tool service with canned answers per tool name.
pub struct ScriptedToolService {
    behaviors: BTreeMap<String, ToolBehavior>,
    calls: Mutex<Vec<(ToolCall, Credentials)>>,
}

impl ScriptedToolService {
    pub fn new() -> Self {
        Self {
            behaviors: BTreeMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tool(mut self, name: &str, behavior: ToolBehavior) -> Self {
        self.behaviors.insert(name.to_string(), behavior);
        self
    }

    /// Every call received so far, with the credentials it carried.
    pub fn calls(&self) -> Vec<(ToolCall, Credentials)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolService for ScriptedToolService {
    fn name(&self) -> &str {
        "scripted"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.behaviors
            .keys()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: format!("Scripted tool {name}"),
                parameters: serde_json::json!({"type": "object"}),
            })
            .collect()
    }

    async fn execute(
        &self,
        call: &ToolCall,
        credentials: &Credentials,
    ) -> Result<ToolResponse, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((call.clone(), credentials.clone()));

        let behavior = self
            .behaviors
            .get(&call.name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        match behavior {
            ToolBehavior::Return(payload) => Ok(ToolResponse::new(payload)),
            ToolBehavior::Cached(payload) => Ok(ToolResponse {
                payload,
                cache_hit: Some(true),
            }),
            ToolBehavior::Fail(e) => Err(e),
            ToolBehavior::Delay(delay, payload) => {
                tokio::time::sleep(delay).await;
                Ok(ToolResponse::new(payload))
            }
            ToolBehavior::Panic => panic!("scripted tool panic"),
        }
    }
}

/// Helper to create a model tool-call part.
pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// Drain a run's event stream.
pub async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Index of the first event matching `pred`.
pub fn position(events: &[StreamEvent], pred: impl Fn(&StreamEvent) -> bool) -> Option<usize> {
    events.iter().position(pred)
}
