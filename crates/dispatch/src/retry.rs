//! Bounded exponential backoff around one unit of work
//!
//! Only transient failures back off and retry. Rate-limited failures retry
//! immediately — the caller has already quarantined the credential, so the
//! next attempt routes elsewhere. Permanent failures stop on the spot.
//!
//! [`run_retryable`] calls the dispatcher's completion hook exactly once,
//! whatever the outcome. Skipping that call leaks the subject's
//! concurrency slot permanently, which is the one contract violation this
//! module exists to make impossible.

use std::time::Duration;

use psn_api::ErrorClass;
use rand::RngExt;
use tracing::{debug, warn};

use crate::dispatcher::JobDispatcher;
use crate::error::Result;

/// Backoff schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), capped, with up to 10%
    /// jitter so a burst of failed jobs does not retry in lockstep.
    fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let raw = self.base_delay.as_secs_f64() * exp;
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter = 1.0 + rand::rng().random_range(0.0..0.1);
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Terminal result of a retried unit of work.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Failed { error: psn_api::Error, attempts: u32 },
}

/// Run one unit of work under the retry policy, then release the
/// subject's concurrency slot.
///
/// The attempt closure is invoked once per try; it owns checkout,
/// execution and checkin for that try. Completion is invoked exactly once
/// after the terminal outcome, success or not.
pub async fn run_retryable<T, F, Fut>(
    policy: &RetryPolicy,
    dispatcher: &JobDispatcher,
    subject_id: &str,
    mut attempt: F,
) -> Result<TaskOutcome<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, psn_api::Error>>,
{
    let outcome = run_attempts(policy, subject_id, &mut attempt).await;
    dispatcher.complete_job(subject_id).await?;
    Ok(outcome)
}

async fn run_attempts<T, F, Fut>(
    policy: &RetryPolicy,
    subject_id: &str,
    attempt: &mut F,
) -> TaskOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, psn_api::Error>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt(attempts).await {
            Ok(value) => return TaskOutcome::Succeeded { value, attempts },
            Err(error) => {
                let class = error.class();
                if class == ErrorClass::Permanent || attempts >= policy.max_attempts {
                    warn!(
                        subject = %subject_id,
                        error = %error,
                        class = class.label(),
                        attempts,
                        "unit of work failed terminally"
                    );
                    return TaskOutcome::Failed { error, attempts };
                }
                if class == ErrorClass::Transient {
                    let delay = policy.delay_for(attempts);
                    debug!(
                        subject = %subject_id,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        attempt = attempts,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    // Rate-limited: the credential is already quarantined,
                    // retry straight away on a different one
                    debug!(subject = %subject_id, attempt = attempts, "rate limited, rerouting");
                }
            }
        }
    }
}
