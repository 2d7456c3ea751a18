//! Retry and cancellation policy for navigation units and oracle calls.
//!
//! Transient navigation failures are retried with capped exponential backoff.
//! An anti-bot block gets one strategy change (the navigator slows down) and
//! one more try, then surfaces.  Oracle calls are retried only for throttling
//! and timeouts, always with a rephrased question; authentication failures
//! are final.  Every wait honours the run's cancellation token.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use partfinder_config::{OracleConfig, RetryConfig};
use partfinder_llm::{DecisionAnswer, DecisionOracle, OracleError, Question};
use partfinder_navigator::{NavigationError, Navigator};

use crate::error::SearchError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub blocked_cooldown: Duration,
    pub oracle_retries: u32,
}

impl RetryPolicy {
    pub fn from_config(retry: &RetryConfig, oracle: &OracleConfig) -> Self {
        Self {
            max_attempts: retry.max_attempts.max(1),
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms.max(retry.base_delay_ms)),
            blocked_cooldown: Duration::from_millis(retry.blocked_cooldown_ms),
            oracle_retries: oracle.max_retries,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), &OracleConfig::default())
    }
}

/// Sleep unless the run is cancelled first.
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), SearchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SearchError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Run one navigation unit (e.g. goto + wait_for) under the retry policy.
///
/// `unit` is re-run from scratch on every attempt, so it must start from a
/// known page.
pub async fn navigate<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    navigator: &dyn Navigator,
    step: &str,
    mut unit: F,
) -> Result<T, SearchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NavigationError>>,
{
    let mut attempt = 0u32;
    let mut changed_strategy = false;

    loop {
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SearchError::Cancelled),
            outcome = unit() => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.is_transient() && attempt < policy.max_attempts {
            let delay = policy.backoff(attempt);
            warn!(step, attempt, delay_ms = delay.as_millis() as u64, %error, "navigation failed, retrying");
            pause(delay, cancel).await?;
            continue;
        }

        if error.is_blocked() && !changed_strategy {
            changed_strategy = true;
            if navigator.slow_down().await {
                warn!(step, %error, cooldown_ms = policy.blocked_cooldown.as_millis() as u64,
                    "blocked by vendor; slowing down for one more try");
                pause(policy.blocked_cooldown, cancel).await?;
                continue;
            }
        }

        return Err(SearchError::Navigation {
            step: step.to_string(),
            source: error,
        });
    }
}

/// The run's access to the decision oracle, if one is configured.
#[derive(Clone, Copy)]
pub struct OracleCaller<'a> {
    oracle: Option<&'a dyn DecisionOracle>,
    policy: &'a RetryPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> OracleCaller<'a> {
    pub fn new(
        oracle: Option<&'a dyn DecisionOracle>,
        policy: &'a RetryPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            oracle,
            policy,
            cancel,
        }
    }

    pub fn is_available(&self) -> bool {
        self.oracle.is_some()
    }

    /// Ask `question`, returning a validated answer, or `None` when no oracle
    /// is configured.
    ///
    /// A malformed answer earns one rephrased retry and is then treated as a
    /// decline.
    pub async fn ask(&self, question: Question, step: &str) -> Result<Option<DecisionAnswer>, SearchError> {
        let Some(oracle) = self.oracle else {
            return Ok(None);
        };

        let mut question = question;
        let mut retries = 0u32;
        let mut malformed_seen = false;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SearchError::Cancelled),
                outcome = oracle.ask(&question) => outcome,
            };
            let outcome = outcome.and_then(|answer| answer.validate(&question.query));

            match outcome {
                Ok(answer) => {
                    debug!(step, attempt = question.attempt, ?answer, "oracle answered");
                    return Ok(Some(answer));
                }
                Err(OracleError::Malformed(reason)) if !malformed_seen => {
                    malformed_seen = true;
                    warn!(step, %reason, "unusable oracle answer, rephrasing once");
                    question = question.rephrased();
                }
                Err(OracleError::Malformed(reason)) => {
                    warn!(step, %reason, "oracle answer still unusable, treating as declined");
                    let declined = DecisionAnswer::Declined
                        .validate(&question.query)
                        .map_err(|source| SearchError::Oracle {
                            step: step.to_string(),
                            source,
                        })?;
                    return Ok(Some(declined));
                }
                Err(error) if error.is_retryable() && retries < self.policy.oracle_retries => {
                    retries += 1;
                    let delay = match &error {
                        OracleError::RateLimited {
                            retry_after: Some(after),
                        } => *after,
                        _ => self.policy.backoff(retries),
                    };
                    warn!(step, retries, delay_ms = delay.as_millis() as u64, %error, "oracle call failed, retrying");
                    pause(delay, self.cancel).await?;
                    question = question.rephrased();
                }
                Err(source) => {
                    return Err(SearchError::Oracle {
                        step: step.to_string(),
                        source,
                    });
                }
            }
        }
    }
}
