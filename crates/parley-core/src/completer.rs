//! TextCompleter abstraction
//!
//! Provider-agnostic free-text completion, used only to interpret user
//! intent and extract structured fields. Implementations live outside the
//! core; failures must degrade to the deterministic heuristics, never
//! propagate as fatal errors.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Completion request payload
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt
    pub system: String,
    /// User prompt
    pub user: String,
    /// Completion token bound
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl CompletionRequest {
    /// Create a request with conservative defaults for classification
    pub fn classification(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 16,
            temperature: 0.0,
        }
    }
}

/// Completion errors
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("timeout after {0}s")]
    Timeout(u64),
}

/// Text completion provider trait
#[async_trait]
pub trait TextCompleter: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

#[async_trait]
impl TextCompleter for Arc<dyn TextCompleter> {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        (**self).complete(request).await
    }
}
