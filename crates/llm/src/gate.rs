//! Process-wide throttle in front of the oracle.
//!
//! One [`OracleGate`] is created per process and shared by every search that
//! may consult the oracle, so concurrent batch items draw from a single
//! token bucket and a single concurrency budget.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use partfinder_config::OracleConfig;

use crate::question::{DecisionAnswer, Question};
use crate::{DecisionOracle, OracleError};

pub struct OracleGate {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    permits: Semaphore,
    timeout: Duration,
}

impl std::fmt::Debug for OracleGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleGate")
            .field("available", &self.permits.available_permits())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OracleGate {
    pub fn new(requests_per_minute: u32, max_concurrent: usize, timeout: Duration) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            permits: Semaphore::new(max_concurrent.max(1)),
            timeout,
        }
    }

    pub fn from_config(config: &OracleConfig) -> Arc<Self> {
        Arc::new(Self::new(
            config.requests_per_minute,
            config.max_concurrent,
            Duration::from_secs(config.timeout_secs.max(1)),
        ))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Wraps an oracle so every call passes through a shared [`OracleGate`] and
/// is bounded by the gate's timeout.
#[derive(Debug, Clone)]
pub struct GatedOracle<O> {
    inner: O,
    gate: Arc<OracleGate>,
}

impl<O> GatedOracle<O> {
    pub fn new(inner: O, gate: Arc<OracleGate>) -> Self {
        Self { inner, gate }
    }

    pub fn gate(&self) -> &Arc<OracleGate> {
        &self.gate
    }
}

#[async_trait]
impl<O: DecisionOracle> DecisionOracle for GatedOracle<O> {
    async fn ask(&self, question: &Question) -> Result<DecisionAnswer, OracleError> {
        let _permit = self
            .gate
            .permits
            .acquire()
            .await
            .map_err(|_| OracleError::Transport("oracle gate closed".to_string()))?;
        self.gate.limiter.until_ready().await;
        debug!(attempt = question.attempt, "oracle gate passed");

        match tokio::time::timeout(self.gate.timeout, self.inner.ask(question)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.gate.timeout.as_millis() as u64, "oracle call timed out");
                Err(OracleError::Timeout)
            }
        }
    }
}
