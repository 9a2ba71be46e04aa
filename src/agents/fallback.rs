//! Capacity retry and model fallback for streaming invocations
//!
//! The controller is an explicit state machine driven by a loop:
//!
//! - `Attempt(model, retry_count)` runs the invocation once
//! - a capacity failure with budget left waits `delay[retry_count]` and retries
//!   the same model
//! - once the budget is spent, the first fallback model that was not already
//!   attempted becomes `Attempt(fallback, 0)`
//! - with no candidate left the last failed result is returned unchanged
//!
//! Non-capacity failures (and timeouts/ceiling violations) are returned
//! immediately. Only the streaming path is wrapped; chat and review surface
//! capacity failures directly.

use crate::agents::rate_limiter::CapacityDetector;
use crate::config::RetryConfig;
use crate::models::RunStreamResult;
use crate::utils::is_safe_model_name;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

/// Retry bookkeeping threaded through one streaming call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityRetryState {
    pub attempted_models: BTreeSet<String>,
    pub capacity_retry_attempt: usize,
}

/// The model currently being tried and how many same-model retries it had
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub model: String,
    pub retry_count: usize,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fallback { model: String },
    GiveUp,
}

/// Result of one attempt plus the raw stderr used for classification
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub result: RunStreamResult,
    pub stderr: String,
}

/// Drives `Attempt` transitions for one agent
#[derive(Debug, Clone)]
pub struct CapacityRetryController {
    delays: Vec<Duration>,
    fallback_models: Vec<String>,
    detector: CapacityDetector,
}

impl CapacityRetryController {
    /// Fallback models that are not safe to place on a command line are
    /// dropped with a warning.
    pub fn new(retry: &RetryConfig, fallback_models: Vec<String>) -> Self {
        let fallback_models = fallback_models
            .into_iter()
            .filter(|model| {
                let safe = is_safe_model_name(model);
                if !safe {
                    log::warn!("[CapacityRetry] Ignoring unsafe fallback model {:?}", model);
                }
                safe
            })
            .collect();

        Self {
            delays: retry.retry_delays(),
            fallback_models,
            detector: CapacityDetector::from_config(retry),
        }
    }

    /// Number of same-model retries before falling back
    pub fn retry_budget(&self) -> usize {
        self.delays.len()
    }

    /// The capacity pattern a failed attempt matched, if any
    pub fn capacity_pattern(&self, outcome: &AttemptOutcome) -> Option<String> {
        let result = &outcome.result;
        if result.success || result.timed_out || result.output_limit_exceeded {
            return None;
        }
        self.detector
            .detect_any([
                outcome.stderr.as_str(),
                result.error.as_deref().unwrap_or(""),
            ])
            .map(String::from)
    }

    /// Whether a failed attempt is a transient capacity error
    pub fn is_capacity_failure(&self, outcome: &AttemptOutcome) -> bool {
        self.capacity_pattern(outcome).is_some()
    }

    /// Pure transition function for a capacity failure on `attempt`
    pub fn decide(&self, attempt: &Attempt, state: &CapacityRetryState) -> RetryDecision {
        if attempt.retry_count < self.delays.len() {
            return RetryDecision::Retry {
                delay: self.delays[attempt.retry_count],
            };
        }

        match self
            .fallback_models
            .iter()
            .find(|m| **m != attempt.model && !state.attempted_models.contains(*m))
        {
            Some(model) => RetryDecision::Fallback {
                model: model.clone(),
            },
            None => RetryDecision::GiveUp,
        }
    }

    /// Run `invoke` until it succeeds, fails for a non-capacity reason or the
    /// retry and fallback budget is exhausted.
    pub async fn run<F, Fut>(&self, initial_model: String, mut invoke: F) -> RunStreamResult
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = AttemptOutcome>,
    {
        let mut state = CapacityRetryState::default();
        state.attempted_models.insert(initial_model.clone());
        let mut attempt = Attempt {
            model: initial_model,
            retry_count: 0,
        };

        loop {
            let outcome = invoke(attempt.model.clone()).await;
            let Some(pattern) = self.capacity_pattern(&outcome) else {
                return outcome.result;
            };

            match self.decide(&attempt, &state) {
                RetryDecision::Retry { delay } => {
                    log::warn!(
                        "[CapacityRetry] {} has no capacity ({}), retry {}/{} in {}ms",
                        attempt.model,
                        pattern,
                        attempt.retry_count + 1,
                        self.retry_budget(),
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt.retry_count += 1;
                    state.capacity_retry_attempt = attempt.retry_count;
                }
                RetryDecision::Fallback { model } => {
                    log::info!(
                        "[CapacityRetry] Retries exhausted for {} ({}), falling back to {}",
                        attempt.model,
                        pattern,
                        model
                    );
                    state.attempted_models.insert(model.clone());
                    state.capacity_retry_attempt = 0;
                    attempt = Attempt {
                        model,
                        retry_count: 0,
                    };
                }
                RetryDecision::GiveUp => {
                    log::warn!(
                        "[CapacityRetry] No fallback left after {:?}",
                        state.attempted_models
                    );
                    return outcome.result;
                }
            }
        }
    }
}
