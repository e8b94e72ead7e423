//! HTTP client for a remote tool-execution service.
//!
//! Wire contract:
//! - `GET {url}/tools` returns `{"tools": [{name, description, parameters}]}`
//! - `POST {url}/tools/{name}/invoke` with `{"parameters": {...}}` returns
//!   `{"result": ..., "cache_hit": bool?}` or `{"error": "..."}`
//!
//! Caller credentials are forwarded as request headers, untouched.

use async_trait::async_trait;
use quarry_config::ToolServiceConfig;
use quarry_core::error::ToolError;
use quarry_core::provider::ToolDefinition;
use quarry_core::tool::{Credentials, ToolCall, ToolResponse, ToolService};
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A [`ToolService`] backed by a remote HTTP endpoint.
pub struct HttpToolService {
    base_url: String,
    timeout_secs: u64,
    client: reqwest::Client,
    catalog: Vec<ToolDefinition>,
}

impl HttpToolService {
    /// Connect to the service and fetch its tool catalog.
    pub async fn connect(
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ToolError::Network(e.to_string()))?;

        let mut service = Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs,
            client,
            catalog: Vec::new(),
        };
        service.catalog = service.fetch_catalog().await?;

        info!(
            url = %service.base_url,
            tools = service.catalog.len(),
            "Connected to tool service"
        );
        Ok(service)
    }

    /// Connect using the `[tool_service]` configuration section.
    pub async fn from_config(config: &ToolServiceConfig) -> Result<Self, ToolError> {
        Self::connect(&config.url, config.timeout_secs).await
    }

    async fn fetch_catalog(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        let url = format!("{}/tools", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ToolError::Network(format!(
                "catalog request returned status {}",
                response.status().as_u16()
            )));
        }

        let body: CatalogResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Network(format!("invalid catalog: {e}")))?;
        Ok(body.tools)
    }

    /// `{base}/tools/{name}/invoke`, with the name kept to one path segment.
    fn invoke_url(&self, tool_name: &str) -> Result<reqwest::Url, ToolError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ToolError::Network(format!("invalid tool service url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ToolError::Network("tool service url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["tools", tool_name, "invoke"]);
        Ok(url)
    }

    fn credential_headers(credentials: &Credentials) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in credentials.iter() {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %key, "Skipping credential that is not a valid header"),
            }
        }
        headers
    }
}

#[async_trait]
impl ToolService for HttpToolService {
    fn name(&self) -> &str {
        "http"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.catalog.clone()
    }

    async fn execute(
        &self,
        call: &ToolCall,
        credentials: &Credentials,
    ) -> Result<ToolResponse, ToolError> {
        let url = self.invoke_url(&call.name)?;
        debug!(tool = %call.name, call_id = %call.id, "Invoking remote tool");

        let response = self
            .client
            .post(url)
            .headers(Self::credential_headers(credentials))
            .json(&serde_json::json!({ "parameters": call.arguments }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout {
                        tool_name: call.name.clone(),
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    ToolError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(ToolError::NotFound(call.name.clone()));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Network(e.to_string()))?;
        let body: InvokeResponse =
            serde_json::from_str(&text).map_err(|_| ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason: if (200..300).contains(&status) {
                    "tool service returned a malformed response".into()
                } else {
                    format!("status {status}: {text}")
                },
            })?;

        if let Some(reason) = body.error {
            return Err(ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason,
            });
        }

        if !(200..300).contains(&status) {
            return Err(ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason: format!("status {status}"),
            });
        }

        Ok(ToolResponse {
            payload: body.result,
            cache_hit: body.cache_hit,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    cache_hit: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}
