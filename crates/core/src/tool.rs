//! Tool boundary: the abstraction over the tool-execution service.
//!
//! Tools are data-fetching operations run by an external service. The
//! orchestrator only sees [`ToolService`]: a catalog of schemas plus an
//! `execute` call that takes caller credentials as opaque pass-through.
//! [`ToolRegistry`] is the in-process implementation over [`Tool`] objects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use crate::error::ToolError;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Parameters as a JSON object
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Build a call from the model's tool-call part.
    ///
    /// Arguments that are not a JSON object become an empty object.
    pub fn from_message_call(call: &MessageToolCall) -> Self {
        let arguments = match serde_json::from_str::<serde_json::Value>(&call.arguments) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            _ => serde_json::Value::Object(serde_json::Map::new()),
        };
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        }
    }
}

/// Caller credentials forwarded to the tool service untouched.
///
/// Stored as header-style key/value pairs. `Debug` never prints values.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials carrying a single bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new().with("authorization", format!("Bearer {}", token.into()))
    }

    /// Add or replace one entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "[REDACTED]")))
            .finish()
    }
}

/// A successful response from the tool service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// The raw result payload
    pub payload: serde_json::Value,

    /// Whether the service answered from its own cache, when it says so
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
}

impl ToolResponse {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            cache_hit: None,
        }
    }
}

/// The tool-execution boundary consumed by the orchestrator.
#[async_trait]
pub trait ToolService: Send + Sync {
    /// A human-readable name for this service.
    fn name(&self) -> &str;

    /// Schemas for every tool the model may call.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute one call on behalf of the caller.
    async fn execute(
        &self,
        call: &ToolCall,
        credentials: &Credentials,
    ) -> std::result::Result<ToolResponse, ToolError>;
}

/// An in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "sales_report").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        credentials: &Credentials,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of in-process tools, usable as a [`ToolService`].
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolService for ToolRegistry {
    fn name(&self) -> &str {
        "in_process"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn execute(
        &self,
        call: &ToolCall,
        credentials: &Credentials,
    ) -> std::result::Result<ToolResponse, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let payload = tool.execute(call.arguments.clone(), credentials).await?;
        Ok(ToolResponse::new(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            credentials: &Credentials,
        ) -> std::result::Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({
                "text": arguments["text"],
                "authorized": credentials.get("authorization").is_some(),
            }))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[tokio::test]
    async fn registry_passes_credentials_through() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "hello world"}),
        };
        let response = registry
            .execute(&call, &Credentials::bearer("secret"))
            .await
            .unwrap();
        assert_eq!(response.payload["text"], "hello world");
        assert_eq!(response.payload["authorized"], true);
        assert_eq!(response.cache_hit, None);
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "call_1".into(),
            name: "nonexistent".into(),
            arguments: serde_json::json!({}),
        };
        let err = registry
            .execute(&call, &Credentials::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        let call = ToolCall::from_message_call(&MessageToolCall {
            id: "c1".into(),
            name: "sales".into(),
            arguments: "{not json".into(),
        });
        assert_eq!(call.arguments, serde_json::json!({}));

        let call = ToolCall::from_message_call(&MessageToolCall {
            id: "c2".into(),
            name: "sales".into(),
            arguments: r#"{"year": 2024}"#.into(),
        });
        assert_eq!(call.arguments["year"], 2024);
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::bearer("super-secret-token");
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("authorization"));
        assert!(!dbg.contains("super-secret-token"));
    }
}
