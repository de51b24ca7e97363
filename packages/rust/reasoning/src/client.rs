//! Contract-enforcing reasoning client with rate-limit backoff.
//!
//! Failures are classified from the service's error text: a quota or rate
//! limit marker becomes [`StudyKitError::RateLimited`], anything else
//! [`StudyKitError::Service`]. Payloads that break the contract become
//! [`StudyKitError::SchemaViolation`]. Only rate limits are retried.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use studykit_shared::{Result, RetryConfig, StudyKitError};

use crate::contracts::Contract;
use crate::service::{GenerateRequest, ReasoningService, ServiceError};

/// Markers the service uses for quota exhaustion and throttling.
static RATE_LIMIT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|rate[\s_-]?limit|quota|resource[\s_-]?exhausted|too many requests")
        .expect("rate limit pattern is valid")
});

/// Map a raw service failure onto the error taxonomy.
pub fn classify_failure(error: ServiceError) -> StudyKitError {
    if RATE_LIMIT_MARKER.is_match(&error.message) {
        StudyKitError::RateLimited(error.message)
    } else {
        StudyKitError::Service(error.message)
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff with uniform jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            jitter_max: Duration::from_millis(config.jitter_max_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (0-based):
    /// `base * 2^attempt + uniform(0, jitter_max)`.
    pub fn delay_for(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = self.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..=jitter_ms)
        };
        exp.saturating_add(Duration::from_millis(jitter))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A validated result plus the retry history that produced it.
#[derive(Debug, Clone)]
pub struct Invocation<T> {
    pub value: T,
    /// Number of rate-limited attempts that were retried.
    pub retries: u32,
    /// Backoff delays slept between attempts, in order.
    pub delays: Vec<Duration>,
}

/// Reasoning client shared by the pipeline and the assessment engine.
#[derive(Clone)]
pub struct ReasoningClient {
    service: Arc<dyn ReasoningService>,
    model: String,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ReasoningClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningClient")
            .field("model", &self.model)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ReasoningClient {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        model: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            model: model.into(),
            policy,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send the contract's request and return its validated output.
    ///
    /// Rate-limited attempts are retried up to `max_attempts` in total; the
    /// last rate-limit error is returned unchanged once attempts run out.
    /// Service errors and contract violations are returned immediately.
    #[instrument(skip_all, fields(contract = contract.name(), model = %self.model))]
    pub async fn invoke<C: Contract>(&self, contract: &C) -> Result<Invocation<C::Output>> {
        self.invoke_until(contract, None).await
    }

    /// Like [`invoke`](Self::invoke), bounded by `budget` overall.
    ///
    /// A backoff that would end past the budget is not slept: the rate-limit
    /// error that caused it is returned instead. An attempt still in flight
    /// when the budget runs out yields the last rate-limit error if there was
    /// one, otherwise [`StudyKitError::Timeout`].
    #[instrument(skip_all, fields(contract = contract.name(), model = %self.model))]
    pub async fn invoke_within<C: Contract>(
        &self,
        contract: &C,
        budget: Duration,
    ) -> Result<Invocation<C::Output>> {
        self.invoke_until(contract, Some((Instant::now() + budget, budget)))
            .await
    }

    async fn invoke_until<C: Contract>(
        &self,
        contract: &C,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<Invocation<C::Output>> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: contract.prompt(),
            system_instruction: contract.system_instruction().to_string(),
            response_schema: contract.response_schema().to_json(),
        };

        let mut delays = Vec::new();
        let mut attempt: u32 = 0;
        let mut throttled: Option<StudyKitError> = None;

        loop {
            let outcome = match deadline {
                None => self.attempt(contract, &request).await,
                Some((at, budget)) => {
                    match tokio::time::timeout_at(at, self.attempt(contract, &request)).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            return Err(throttled.unwrap_or_else(|| StudyKitError::Timeout {
                                operation: contract.name().to_string(),
                                after: budget,
                            }));
                        }
                    }
                }
            };

            match outcome {
                Ok(value) => {
                    debug!(attempt, "contract satisfied");
                    return Ok(Invocation {
                        value,
                        retries: attempt,
                        delays,
                    });
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt, &mut rand::thread_rng());
                    if deadline.is_some_and(|(at, _)| Instant::now() + delay >= at) {
                        warn!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "rate limited, backoff exceeds time budget"
                        );
                        return Err(e);
                    }
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "rate limited, backing off"
                    );
                    throttled = Some(e);
                    tokio::time::sleep(delay).await;
                    delays.push(delay);
                    attempt += 1;
                }
                Err(e) => {
                    if matches!(e, StudyKitError::SchemaViolation { .. }) {
                        warn!(error = %e, "response rejected by contract");
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn attempt<C: Contract>(
        &self,
        contract: &C,
        request: &GenerateRequest,
    ) -> Result<C::Output> {
        let raw = self
            .service
            .generate(request)
            .await
            .map_err(classify_failure)?;
        contract.parse(&raw)
    }
}
