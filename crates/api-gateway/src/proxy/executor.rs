//! Bounded, strictly sequential retries over a [`Transport`].
//!
//! Each attempt's response is fully buffered and classified before anything
//! else happens:
//! - status >= 500, or a retryable transport failure: retry after a fixed delay
//!   while budget remains, otherwise give up with `Exhausted`
//! - any other status (2xx, 3xx, 4xx): terminal, returned as-is
//!
//! Both the in-flight attempt and the wait between attempts race the request's
//! cancellation token, so a caller that goes away stops further backend calls.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use super::request::ProxyRequest;
use super::transport::{Outcome, Transport, TransportError};
use crate::stats::ProxyStats;

/// Which methods may be attempted more than once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdempotencyPolicy {
    /// Every method gets the full retry budget.
    #[default]
    All,
    /// Non-idempotent methods (POST, PATCH, ...) get exactly one attempt.
    IdempotentOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub idempotency: IdempotencyPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            idempotency: IdempotencyPolicy::All,
        }
    }
}

impl RetryPolicy {
    /// Number of attempts allowed for this request. Always at least one.
    pub fn budget_for(&self, request: &ProxyRequest) -> u32 {
        let max = self.max_attempts.max(1);
        match self.idempotency {
            IdempotencyPolicy::IdempotentOnly if !request.is_idempotent() => 1,
            _ => max,
        }
    }
}

/// Result of classifying one attempt.
#[derive(Debug)]
pub enum Classification {
    /// Ends the loop; relayed to the caller unchanged.
    Terminal(Outcome),
    /// Worth another attempt if budget remains.
    Retryable(AttemptFailure),
    /// A failure another attempt would not fix.
    Fatal(TransportError),
}

/// The last thing that went wrong, kept for diagnostics.
#[derive(Debug)]
pub enum AttemptFailure {
    Status(Outcome),
    Transport(TransportError),
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::Status(outcome) => write!(f, "backend returned {}", outcome.status),
            AttemptFailure::Transport(e) => write!(f, "{e}"),
        }
    }
}

pub fn classify(result: Result<Outcome, TransportError>) -> Classification {
    match result {
        Ok(outcome) if outcome.status.is_server_error() => {
            Classification::Retryable(AttemptFailure::Status(outcome))
        }
        Ok(outcome) => Classification::Terminal(outcome),
        Err(e) if e.is_retryable() => Classification::Retryable(AttemptFailure::Transport(e)),
        Err(e) => Classification::Fatal(e),
    }
}

/// A terminal response and how many attempts it took.
#[derive(Debug)]
pub struct Delivered {
    pub outcome: Outcome,
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("gave up after {attempts} attempt(s), last failure: {last}")]
    Exhausted { attempts: u32, last: AttemptFailure },

    #[error("attempt {attempts} failed permanently: {source}")]
    Rejected {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("cancelled during attempt {attempts}")]
    Cancelled { attempts: u32 },
}

impl ExecuteError {
    pub fn attempts(&self) -> u32 {
        match self {
            ExecuteError::Exhausted { attempts, .. }
            | ExecuteError::Rejected { attempts, .. }
            | ExecuteError::Cancelled { attempts } => *attempts,
        }
    }
}

/// Delivers requests with the configured retry policy.
#[derive(Debug, Clone)]
pub struct RetryingExecutor<T> {
    transport: T,
    policy: RetryPolicy,
    stats: ProxyStats,
}

impl<T: Transport> RetryingExecutor<T> {
    pub fn new(transport: T, policy: RetryPolicy, stats: ProxyStats) -> Self {
        Self {
            transport,
            policy,
            stats,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute(
        &self,
        request: &ProxyRequest,
        target: &Url,
        cancel: &CancellationToken,
    ) -> Result<Delivered, ExecuteError> {
        let budget = self.policy.budget_for(request);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.stats.inc_attempts();

            let span = gateway_tracing::upstream_attempt_span!(&request.correlation_id, attempt, target);
            let start = Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(attempt, target = %target, "Request cancelled while attempt in flight");
                    return Err(ExecuteError::Cancelled { attempts: attempt });
                }
                result = self.transport.send(request, target).instrument(span.clone()) => result,
            };

            span.record("latency_ms", start.elapsed().as_millis() as u64);
            if let Ok(outcome) = &result {
                span.record("status", outcome.status.as_u16());
            }

            let failure = match classify(result) {
                Classification::Terminal(outcome) => {
                    return Ok(Delivered {
                        outcome,
                        attempts: attempt,
                    });
                }
                Classification::Fatal(source) => {
                    return Err(ExecuteError::Rejected {
                        attempts: attempt,
                        source,
                    });
                }
                Classification::Retryable(failure) => failure,
            };

            if attempt >= budget {
                return Err(ExecuteError::Exhausted {
                    attempts: attempt,
                    last: failure,
                });
            }

            tracing::warn!(
                attempt,
                budget,
                target = %target,
                error = %failure,
                delay_ms = self.policy.delay.as_millis() as u64,
                "Attempt failed, retrying"
            );
            self.stats.inc_retries();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(attempt, target = %target, "Request cancelled while waiting to retry");
                    return Err(ExecuteError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
        }
    }
}
