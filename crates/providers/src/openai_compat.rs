//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, and any endpoint exposing
//! `/chat/completions` with function calling.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling, including parallel calls
//! - Rate-limit signalling with the server's `Retry-After` hint

use async_trait::async_trait;
use futures::StreamExt;
use quarry_config::AppConfig;
use quarry_core::error::ProviderError;
use quarry_core::message::{Message, MessageToolCall, Role};
use quarry_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// Used when a 429 carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Build the provider described by the loaded configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::NotConfigured(
                "no API key; set api_key in config.toml or QUARRY_API_KEY".into(),
            )
        })?;
        Ok(Self::new(&config.provider_name, &config.api_url, api_key))
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Convert the directive and turns to OpenAI API format.
    ///
    /// A tool turn expands into one `tool` message per result part.
    fn to_api_messages(system: Option<&str>, messages: &[Message]) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);

        if let Some(system) = system {
            out.push(ApiMessage::text("system", system));
        }

        for m in messages {
            match m.role {
                Role::Tool => {
                    for part in &m.tool_results {
                        out.push(ApiMessage {
                            role: "tool".into(),
                            content: Some(part.model_text()),
                            tool_calls: None,
                            tool_call_id: Some(part.call_id.clone()),
                        });
                    }
                }
                role => out.push(ApiMessage {
                    role: match role {
                        Role::User => "user".into(),
                        Role::Assistant => "assistant".into(),
                        _ => "system".into(),
                    },
                    content: Some(m.content.clone()),
                    tool_calls: if m.tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            m.tool_calls
                                .iter()
                                .map(|tc| ApiToolCall {
                                    id: tc.id.clone(),
                                    r#type: "function".into(),
                                    function: ApiFunction {
                                        name: tc.name.clone(),
                                        arguments: tc.arguments.clone(),
                                    },
                                })
                                .collect(),
                        )
                    },
                    tool_call_id: None,
                }),
            }
        }

        out
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(request.system.as_deref(), &request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    /// Map non-success statuses onto provider errors.
    async fn check_status(
        response: reqwest::Response,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = parse_retry_after(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ModelNotFound(error_body));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    fn map_send_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Parse a `Retry-After` header given in delta-seconds.
fn parse_retry_after(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[async_trait]
impl quarry_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let response = Self::check_status(response).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let mut message = Message::assistant(choice.message.content.unwrap_or_default());
        message.tool_calls = tool_calls;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            message,
            usage,
            model: api_response.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let response = Self::check_status(response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            // Raw bytes: a multibyte character may straddle two network chunks
            let mut buffer: Vec<u8> = Vec::new();

            // Tool call deltas keyed by index; BTreeMap keeps the model's call order
            let mut accumulators: BTreeMap<u32, ToolCallAccumulator> = BTreeMap::new();
            let mut usage: Option<Usage> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);

                while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim_end_matches(['\n', '\r']);

                    // Skip empty lines and SSE comments
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        let _ = tx.send(Ok(final_chunk(&accumulators, usage))).await;
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(stream_resp) => {
                            if let Some(u) = stream_resp.usage {
                                usage = Some(Usage {
                                    prompt_tokens: u.prompt_tokens,
                                    completion_tokens: u.completion_tokens,
                                    total_tokens: u.total_tokens,
                                });
                            }

                            let Some(choice) = stream_resp.choices.first() else {
                                continue;
                            };
                            let delta = &choice.delta;

                            if let Some(ref tc_deltas) = delta.tool_calls {
                                for tc_delta in tc_deltas {
                                    accumulators
                                        .entry(tc_delta.index)
                                        .or_default()
                                        .apply(tc_delta);
                                }
                            }

                            if delta.content.as_ref().is_some_and(|c| !c.is_empty()) {
                                let chunk = StreamChunk {
                                    content: delta.content.clone(),
                                    ..StreamChunk::default()
                                };
                                if tx.send(Ok(chunk)).await.is_err() {
                                    return; // receiver dropped
                                }
                            }
                        }
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // A response cut off before [DONE] may hold half a tool call
            warn!(provider = %provider_name, "Stream ended before [DONE]");
            let _ = tx
                .send(Err(ProviderError::StreamInterrupted(
                    "stream ended before [DONE]".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

fn final_chunk(accumulators: &BTreeMap<u32, ToolCallAccumulator>, usage: Option<Usage>) -> StreamChunk {
    StreamChunk {
        content: None,
        tool_calls: accumulators
            .iter()
            .map(|(index, acc)| acc.to_tool_call(*index))
            .collect(),
        done: true,
        usage,
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn apply(&mut self, delta: &StreamToolCallDelta) {
        if let Some(ref id) = delta.id {
            self.id = id.clone();
        }
        if let Some(ref func) = delta.function {
            if let Some(ref name) = func.name {
                self.name = name.clone();
            }
            if let Some(ref args) = func.arguments {
                self.arguments.push_str(args);
            }
        }
    }

    /// Some servers omit call ids; the stream index stands in for them.
    fn to_tool_call(&self, index: u32) -> MessageToolCall {
        MessageToolCall {
            id: if self.id.is_empty() {
                format!("call_{index}")
            } else {
                self.id.clone()
            },
            name: self.name.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use quarry_core::Provider;
    use quarry_core::message::ToolResultPart;

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url.contains("localhost:11434"));
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = AppConfig::default();
        assert!(matches!(
            OpenAiCompatProvider::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));

        let config = AppConfig {
            api_key: Some("sk-test".into()),
            api_url: "http://localhost:9999/v1/".into(),
            ..AppConfig::default()
        };
        let provider = OpenAiCompatProvider::from_config(&config).unwrap();
        assert_eq!(provider.base_url, "http://localhost:9999/v1");
    }

    #[test]
    fn directive_goes_first() {
        let messages = vec![Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(Some("Be terse"), &messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[0].content.as_deref(), Some("Be terse"));
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "sales_report".into(),
            description: "Fetch sales rows".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "sales_report");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn request_body_omits_tools_when_none_offered() {
        let request = ProviderRequest {
            model: "m".into(),
            system: None,
            messages: vec![Message::user("hi")],
            temperature: 0.2,
            max_tokens: Some(256),
            tools: vec![],
        };
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert!(body.get("tools").is_none());
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn retry_after_header_parsing() {
        assert_eq!(parse_retry_after(Some("17")), 17);
        assert_eq!(parse_retry_after(Some(" 3 ")), 3);
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2026 07:28:00 GMT")), 5);
        assert_eq!(parse_retry_after(None), 5);
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
        assert!(parsed.choices[0].finish_reason.is_none());
    }

    #[test]
    fn parse_stream_tool_call_delta() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"sales_report","arguments":""}}]},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let tc = &parsed.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.index, 0);
        assert_eq!(tc.id.as_deref(), Some("call_abc"));
        assert_eq!(
            tc.function.as_ref().unwrap().name.as_deref(),
            Some("sales_report")
        );
    }

    #[test]
    fn parse_stream_usage() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn tool_call_accumulator_assembly() {
        let mut acc = ToolCallAccumulator::default();
        let first: StreamToolCallDelta = serde_json::from_str(
            r#"{"index":0,"id":"call_123","function":{"name":"sales_report","arguments":"{\"year\""}}"#,
        )
        .unwrap();
        let second: StreamToolCallDelta =
            serde_json::from_str(r#"{"index":0,"function":{"arguments":": 2024}"}}"#).unwrap();
        acc.apply(&first);
        acc.apply(&second);

        let tc = acc.to_tool_call(0);
        assert_eq!(tc.id, "call_123");
        assert_eq!(tc.name, "sales_report");
        assert_eq!(tc.arguments, "{\"year\": 2024}");
    }

    #[test]
    fn final_chunk_keeps_call_order() {
        let mut accumulators = BTreeMap::new();
        for (index, id) in [(2u32, "c"), (0, "a"), (1, "b")] {
            accumulators.insert(
                index,
                ToolCallAccumulator {
                    id: id.into(),
                    name: "t".into(),
                    arguments: "{}".into(),
                },
            );
        }
        let chunk = final_chunk(&accumulators, None);
        let ids: Vec<_> = chunk.tool_calls.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(chunk.done);
    }

    #[test]
    fn calls_without_ids_get_distinct_ids() {
        let mut accumulators = BTreeMap::new();
        for (index, name) in [(0u32, "sales_report"), (1, "inventory")] {
            accumulators.insert(
                index,
                ToolCallAccumulator {
                    id: String::new(),
                    name: name.into(),
                    arguments: "{}".into(),
                },
            );
        }
        let chunk = final_chunk(&accumulators, None);
        let ids: Vec<_> = chunk.tool_calls.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["call_0", "call_1"]);
        assert_eq!(chunk.tool_calls[1].name, "inventory");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let mut msg = Message::assistant("");
        msg.tool_calls = vec![MessageToolCall {
            id: "call_1".into(),
            name: "sales_report".into(),
            arguments: r#"{"year":2024}"#.into(),
        }];
        let api_msgs = OpenAiCompatProvider::to_api_messages(None, &[msg]);
        assert_eq!(api_msgs.len(), 1);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc.len(), 1);
        assert_eq!(tc[0].function.name, "sales_report");
    }

    #[test]
    fn tool_turn_expands_per_result() {
        let msg = Message::tool_results(vec![
            ToolResultPart {
                call_id: "call_1".into(),
                name: "sales".into(),
                summary: "3 records".into(),
                payload: Some(serde_json::json!({"quality": "limited"})),
            },
            ToolResultPart {
                call_id: "call_2".into(),
                name: "costs".into(),
                summary: "failed".into(),
                payload: None,
            },
        ]);
        let api_msgs = OpenAiCompatProvider::to_api_messages(None, &[msg]);
        assert_eq!(api_msgs.len(), 2);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
        assert!(api_msgs[0].content.as_deref().unwrap().contains("limited"));
        assert_eq!(api_msgs[1].tool_call_id.as_deref(), Some("call_2"));
        assert_eq!(api_msgs[1].content.as_deref(), Some("failed"));
    }

    #[test]
    fn parse_multiple_tool_calls_in_stream() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"search","arguments":""}},{"index":1,"id":"call_b","function":{"name":"calc","arguments":""}}]},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let tcs = parsed.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(tcs.len(), 2);
        assert_eq!(tcs[1].index, 1);
    }

    // --- HTTP tests against a local server ---

    /// Serve `app` on an ephemeral port and return its base URL.
    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    /// A completions endpoint that streams `chunks` as separate body frames.
    fn sse_endpoint(chunks: Vec<Vec<u8>>) -> Router {
        Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let chunks = chunks.clone();
                async move {
                    let body = Body::from_stream(futures::stream::iter(
                        chunks.into_iter().map(Ok::<_, std::convert::Infallible>),
                    ));
                    Response::builder()
                        .header(header::CONTENT_TYPE, "text/event-stream")
                        .body(body)
                        .unwrap()
                }
            }),
        )
    }

    fn status_endpoint(status: StatusCode, headers: Vec<(&'static str, &'static str)>) -> Router {
        Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let headers = headers.clone();
                async move {
                    let mut response = (status, "model missing or busy").into_response();
                    for (name, value) in headers {
                        response
                            .headers_mut()
                            .insert(name, header::HeaderValue::from_static(value));
                    }
                    response
                }
            }),
        )
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "m".into(),
            system: Some("Be terse".into()),
            messages: vec![Message::user("hi")],
            temperature: 0.2,
            max_tokens: None,
            tools: vec![],
        }
    }

    async fn drain(
        mut rx: ChunkReceiver,
    ) -> Vec<std::result::Result<StreamChunk, ProviderError>> {
        let mut items = vec![];
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn stream_assembles_split_text_tool_calls_and_usage() {
        let chunks: Vec<Vec<u8>> = vec![
            b": keep-alive\n\n".to_vec(),
            b"data: {\"choices\":[{\"delta\":{\"content\":\"caf".to_vec(),
            // "é" is split across two frames
            vec![0xC3],
            vec![0xA9],
            b"\"}}]}\n\n".to_vec(),
            br#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"sales_report","arguments":"{\"region\":"}},{"index":1,"function":{"name":"inventory","arguments":"{}"}}]}}]}"#.to_vec(),
            b"\n\n".to_vec(),
            br#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"north\"}"}}]}}]}"#.to_vec(),
            b"\r\n\r\n".to_vec(),
            br#"data: {"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#.to_vec(),
            b"\n\ndata: [DONE]\n\n".to_vec(),
        ];
        let base_url = spawn_server(sse_endpoint(chunks)).await;
        let provider = OpenAiCompatProvider::new("local", base_url, "sk-test");

        let items = drain(provider.stream(request()).await.unwrap()).await;
        let chunks: Vec<StreamChunk> = items.into_iter().map(|i| i.unwrap()).collect();

        let text: String = chunks.iter().filter_map(|c| c.content.clone()).collect();
        assert_eq!(text, "café");

        let last = chunks.last().unwrap();
        assert!(last.done);
        assert_eq!(last.tool_calls.len(), 2);
        assert_eq!(last.tool_calls[0].id, "call_0");
        assert_eq!(last.tool_calls[0].name, "sales_report");
        assert_eq!(last.tool_calls[0].arguments, r#"{"region":"north"}"#);
        assert_eq!(last.tool_calls[1].id, "call_1");
        assert_eq!(last.tool_calls[1].name, "inventory");
        assert_eq!(last.usage.unwrap().total_tokens, 10);
    }

    #[tokio::test]
    async fn stream_cut_off_before_done_is_interrupted() {
        let chunks = vec![
            br#"data: {"choices":[{"delta":{"content":"Revenue was"}}]}"#.to_vec(),
            b"\n\n".to_vec(),
            br#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"sales_report","arguments":"{\"ye"}}]}}]}"#.to_vec(),
            b"\n\n".to_vec(),
        ];
        let base_url = spawn_server(sse_endpoint(chunks)).await;
        let provider = OpenAiCompatProvider::new("local", base_url, "sk-test");

        let items = drain(provider.stream(request()).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].as_ref().unwrap().content.as_deref(),
            Some("Revenue was")
        );
        assert!(matches!(
            items.last(),
            Some(Err(ProviderError::StreamInterrupted(_)))
        ));
    }

    #[tokio::test]
    async fn rate_limit_status_carries_retry_after() {
        let app = status_endpoint(StatusCode::TOO_MANY_REQUESTS, vec![("retry-after", "17")]);
        let provider = OpenAiCompatProvider::new("local", spawn_server(app).await, "sk-test");

        let err = provider.stream(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 17 }));

        let err = provider.complete(request()).await.unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(17));
    }

    #[tokio::test]
    async fn rate_limit_without_header_uses_default_hint() {
        let app = status_endpoint(StatusCode::TOO_MANY_REQUESTS, vec![]);
        let provider = OpenAiCompatProvider::new("local", spawn_server(app).await, "sk-test");

        let err = provider.stream(request()).await.unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(DEFAULT_RETRY_AFTER_SECS));
    }

    #[tokio::test]
    async fn auth_and_missing_model_statuses_map_to_errors() {
        let app = status_endpoint(StatusCode::UNAUTHORIZED, vec![]);
        let provider = OpenAiCompatProvider::new("local", spawn_server(app).await, "sk-bad");
        assert!(matches!(
            provider.stream(request()).await.unwrap_err(),
            ProviderError::AuthenticationFailed(_)
        ));

        let app = status_endpoint(StatusCode::NOT_FOUND, vec![]);
        let provider = OpenAiCompatProvider::new("local", spawn_server(app).await, "sk-test");
        match provider.stream(request()).await.unwrap_err() {
            ProviderError::ModelNotFound(body) => assert!(body.contains("model missing")),
            other => panic!("unexpected error: {other:?}"),
        }

        let app = status_endpoint(StatusCode::INTERNAL_SERVER_ERROR, vec![]);
        let provider = OpenAiCompatProvider::new("local", spawn_server(app).await, "sk-test");
        assert!(matches!(
            provider.complete(request()).await.unwrap_err(),
            ProviderError::ApiError { status_code: 500, .. }
        ));
    }

    #[tokio::test]
    async fn complete_parses_tool_calls_and_usage() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                axum::Json(serde_json::json!({
                    "model": "served-model",
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [{
                                "id": "call_9",
                                "type": "function",
                                "function": {"name": "sales_report", "arguments": "{\"year\":2024}"}
                            }]
                        }
                    }],
                    "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
                }))
            }),
        );
        let provider = OpenAiCompatProvider::new("local", spawn_server(app).await, "sk-test");

        let response = provider.complete(request()).await.unwrap();
        assert_eq!(response.model, "served-model");
        assert_eq!(response.message.tool_calls[0].id, "call_9");
        assert_eq!(response.message.tool_calls[0].arguments, r#"{"year":2024}"#);
        assert_eq!(response.usage.unwrap().total_tokens, 6);
    }
}
