//! The reasoning-service boundary.

use async_trait::async_trait;
use serde::Serialize;

/// One generation request: model, instruction body, system instruction and
/// the declared output schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub system_instruction: String,
    pub response_schema: serde_json::Value,
}

/// A raw failure reported by the service or the transport.
///
/// The message is kept verbatim; rate-limit detection happens on its text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A generative service that answers with a JSON payload as text.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Send one request and return the raw payload text.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ServiceError>;
}
