//! Bounded condition polling
//!
//! Every asynchronous effect of the control plane is confirmed by re-reading
//! remote state until a condition holds. Polls are strictly bounded: at most
//! `max_attempts` evaluations, sleeping `interval` only *between* attempts.
//! There is no jitter and no growth; callers that need backoff compose it
//! with [`retry_with_backoff`].

use crate::config::RetryConfig;
use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Attempt budget for a single wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSpec {
    pub max_attempts: u32,

    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
}

impl PollSpec {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    pub const fn secs(max_attempts: u32, interval_secs: u64) -> Self {
        Self::new(max_attempts, Duration::from_secs(interval_secs))
    }
}

/// Result of a bounded poll
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The condition held; carries the value observed on that attempt
    Satisfied(T),
    /// Every attempt was used without the condition holding
    Exhausted { attempts: u32 },
    /// A check failed; polling stopped on the first error
    Errored(CloudError),
}

impl<T> PollOutcome<T> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied(_))
    }

    /// Convert to a `Result`, mapping exhaustion to [`CloudError::Timeout`]
    pub fn into_result(self, waiting_for: impl std::fmt::Display) -> Result<T> {
        match self {
            PollOutcome::Satisfied(value) => Ok(value),
            PollOutcome::Exhausted { attempts } => Err(CloudError::Timeout(format!(
                "{} (gave up after {} attempts)",
                waiting_for, attempts
            ))),
            PollOutcome::Errored(err) => Err(err),
        }
    }

    /// Like `into_result` but lets the caller build the exhaustion error
    pub fn into_result_with(self, exhausted: impl FnOnce(u32) -> CloudError) -> Result<T> {
        match self {
            PollOutcome::Satisfied(value) => Ok(value),
            PollOutcome::Exhausted { attempts } => Err(exhausted(attempts)),
            PollOutcome::Errored(err) => Err(err),
        }
    }
}

/// Poll `check` until it yields a value.
///
/// `check` returns `Ok(Some(v))` when the condition holds, `Ok(None)` to try
/// again and `Err` to stop immediately.
pub async fn poll_for<T, F, Fut>(spec: PollSpec, mut check: F) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 1..=spec.max_attempts {
        match check().await {
            Ok(Some(value)) => {
                debug!(attempt, "Condition satisfied");
                return PollOutcome::Satisfied(value);
            }
            Ok(None) => {}
            Err(err) => {
                debug!(attempt, error = %err, "Condition check failed");
                return PollOutcome::Errored(err);
            }
        }

        if attempt < spec.max_attempts {
            tokio::time::sleep(spec.interval).await;
        }
    }

    debug!(attempts = spec.max_attempts, "Condition not satisfied, budget exhausted");
    PollOutcome::Exhausted {
        attempts: spec.max_attempts,
    }
}

/// Poll a boolean condition
pub async fn poll_until<F, Fut>(spec: PollSpec, mut check: F) -> PollOutcome<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    poll_for(spec, || {
        let fut = check();
        async move { fut.await.map(|done| done.then_some(())) }
    })
    .await
}

/// Re-issue `op` with exponential backoff while `retryable` accepts the error.
///
/// Errors that are not retryable, and the error of the last attempt, are
/// returned as is.
pub async fn retry_with_backoff<T, F, Fut, P>(
    config: &RetryConfig,
    mut op: F,
    retryable: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&CloudError) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_attempts && retryable(&err) => {
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                delay = config.next_delay(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Serialize a `Duration` as whole milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
