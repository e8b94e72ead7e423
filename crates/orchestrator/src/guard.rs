//! Translation of run-fatal errors into stream errors.
//!
//! Rate limits are reported with the provider's retry hint and never retried
//! here. Tool failures never reach this module: they become outcomes.

use quarry_core::error::{ContextError, ProviderError};
use serde::{Deserialize, Serialize};

use crate::stream_event::StreamEvent;

/// Machine-readable class of a run-ending error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Context,
    RateLimited,
    Provider,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::RateLimited => "rate_limited",
            Self::Provider => "provider",
        }
    }
}

/// Why a run ended with an `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub category: ErrorCategory,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl RunFailure {
    pub fn to_event(&self) -> StreamEvent {
        StreamEvent::Error {
            category: self.category,
            message: self.message.clone(),
            retry_after_secs: self.retry_after_secs,
        }
    }
}

impl From<&ProviderError> for RunFailure {
    fn from(err: &ProviderError) -> Self {
        match err.retry_after_secs() {
            Some(secs) => Self {
                category: ErrorCategory::RateLimited,
                message: format!("The model service is rate limiting requests; retry in {secs}s"),
                retry_after_secs: Some(secs),
            },
            None => Self {
                category: ErrorCategory::Provider,
                message: err.to_string(),
                retry_after_secs: None,
            },
        }
    }
}

impl From<&ContextError> for RunFailure {
    fn from(err: &ContextError) -> Self {
        Self {
            category: ErrorCategory::Context,
            message: err.to_string(),
            retry_after_secs: None,
        }
    }
}
