//! Reasoning-service access for StudyKit.
//!
//! - [`contracts`] — per-stage prompts, response schemas and semantic validators
//! - [`ReasoningClient`] — contract-enforcing client that retries rate limits
//!   with exponential backoff and jitter
//! - [`GeminiService`] — HTTP implementation of [`ReasoningService`]

pub mod client;
pub mod contracts;
pub mod gemini;
pub mod schema;
pub mod service;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{Invocation, ReasoningClient, RetryPolicy, classify_failure};
pub use contracts::{
    Contract, Directive, KnowledgeGraphContract, QuizContract, QuizPayload, SummaryContract,
    TopicsContract, TopicsPayload,
};
pub use gemini::GeminiService;
pub use schema::{Field, Schema};
pub use service::{GenerateRequest, ReasoningService, ServiceError};
