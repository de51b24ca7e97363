//! Scripted reasoning service for tests.
//!
//! Replies are consumed in order, one per request. Every request is recorded
//! so tests can assert on what was (or was not) sent.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::service::{GenerateRequest, ReasoningService, ServiceError};

enum Reply {
    Payload(String),
    Failure(ServiceError),
    /// Never answers; used to exercise timeouts.
    Stall,
}

/// A [`ReasoningService`] that plays back queued replies.
#[derive(Default)]
pub struct ScriptedService {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful raw payload.
    pub fn push_ok(&self, payload: impl Into<String>) {
        self.push(Reply::Payload(payload.into()));
    }

    /// Queue a service failure with the given error text.
    pub fn push_err(&self, message: impl Into<String>) {
        self.push(Reply::Failure(ServiceError::new(message)));
    }

    /// Queue a reply that never completes.
    pub fn push_stall(&self) {
        self.push(Reply::Stall);
    }

    fn push(&self, reply: Reply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ServiceError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match reply {
            Some(Reply::Payload(payload)) => Ok(payload),
            Some(Reply::Failure(error)) => Err(error),
            Some(Reply::Stall) => std::future::pending().await,
            None => Err(ServiceError::new("scripted service has no reply queued")),
        }
    }
}
