//! Retry policies and the step retry wrapper
//!
//! A step failure is classified by the decision engine into a named
//! [`RetryStrategy`]; retryable classes are re-attempted with bounded
//! exponential backoff and jitter, capped by both the strategy and the
//! configured per-step ceiling.

use crate::decision::DecisionEngine;
use crate::errors::{OrchestrateError, OrchestrateResult};
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Named retry policy for a class of failures
#[derive(Debug, Clone, Serialize)]
pub struct RetryStrategy {
    /// Policy name ("timeout", "transient-network", ...)
    pub name: &'static str,

    /// Whether this class of failure is worth re-attempting at all
    pub retryable: bool,

    /// Total attempt ceiling, including the first try
    pub max_attempts: u32,

    /// First backoff delay
    pub base_delay: Duration,

    /// Backoff ceiling
    pub max_delay: Duration,

    /// Multiplier applied per attempt
    pub backoff_factor: f64,

    /// Jitter fraction applied symmetrically around the deterministic delay
    pub jitter: f64,

    /// Why this strategy was chosen; logged on every attempt
    pub reason: &'static str,
}

impl RetryStrategy {
    /// Waits and element timeouts: timing problems, retry with patience.
    /// Constants are illustrative defaults, not contractual.
    pub fn timeout() -> Self {
        Self {
            name: "timeout",
            retryable: true,
            max_attempts: 3,
            base_delay: Duration::from_millis(750),
            max_delay: Duration::from_secs(20),
            backoff_factor: 2.5,
            jitter: 0.2,
            reason: "timeout while waiting for page or element",
        }
    }

    /// Transport hiccups get a larger budget
    pub fn transient_network() -> Self {
        Self {
            name: "transient-network",
            retryable: true,
            max_attempts: 5,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.2,
            reason: "network or transport error",
        }
    }

    /// Structural problems: retrying cannot change the outcome
    pub fn validation() -> Self {
        Self {
            name: "validation",
            retryable: false,
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: 0.0,
            reason: "structural validation failure",
        }
    }

    /// Missing element/resource: the page will not grow it on retry
    pub fn not_found() -> Self {
        Self {
            name: "not-found",
            retryable: false,
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: 0.0,
            reason: "required element or resource does not exist",
        }
    }

    /// Novel errors: one conservative retry, never an infinite loop
    pub fn unknown() -> Self {
        Self {
            name: "unknown",
            retryable: true,
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: 0.2,
            reason: "unclassified error, retrying once",
        }
    }

    /// Deterministic part of the backoff: `base * factor^(attempt-1)`,
    /// capped at `max_delay`. Strictly increasing in `attempt` until the
    /// cap is reached.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let exp = self.backoff_factor.powi(attempt as i32 - 1);
        let secs = self.base_delay.as_secs_f64() * exp;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Backoff with bounded jitter: `backoff_delay(attempt) * (1 ± jitter)`.
    /// Always non-negative.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt).as_secs_f64();
        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(delay);
        }
        let spread = delay * self.jitter;
        let jittered = delay + rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Run one step with automatic retry
///
/// On failure the error is classified via
/// [`DecisionEngine::retry_strategy`]; non-retryable classes propagate
/// immediately, retryable ones are re-attempted up to
/// `min(strategy.max_attempts, max_retries)` total attempts with a
/// cancellable backoff sleep between attempts. Exhaustion propagates the
/// most recent error wrapped in [`OrchestrateError::RetriesExhausted`].
pub async fn retry_step<T, F, Fut>(
    step: &str,
    engine: &DecisionEngine,
    max_retries: u32,
    cancel: &CancellationToken,
    mut op: F,
) -> OrchestrateResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OrchestrateResult<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(OrchestrateError::Cancelled(step.to_string()));
        }

        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let strategy = engine.retry_strategy(&err);
        if !strategy.retryable {
            error!(
                step,
                strategy = strategy.name,
                reason = strategy.reason,
                %err,
                "step failed with non-retryable error"
            );
            return Err(err);
        }

        let effective_max = strategy.max_attempts.min(max_retries.max(1));
        if attempt >= effective_max {
            error!(
                step,
                strategy = strategy.name,
                attempts = attempt,
                %err,
                "retry budget exhausted"
            );
            return Err(OrchestrateError::RetriesExhausted {
                step: step.to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = strategy.next_delay(attempt);
        warn!(
            step,
            strategy = strategy.name,
            reason = strategy.reason,
            attempt,
            max_attempts = effective_max,
            delay_ms = delay.as_millis() as u64,
            %err,
            "step failed, retrying after backoff"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(OrchestrateError::Cancelled(step.to_string()));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn deterministic_backoff_is_monotone_until_cap() {
        let strategy = RetryStrategy::timeout();
        let d1 = strategy.backoff_delay(1);
        let d2 = strategy.backoff_delay(2);
        let d3 = strategy.backoff_delay(3);
        assert!(d1 < d2 && d2 < d3);

        // far attempts saturate at the cap
        assert_eq!(strategy.backoff_delay(20), strategy.max_delay);
    }

    #[test]
    fn jittered_delay_is_never_negative_and_bounded() {
        let strategy = RetryStrategy::transient_network();
        for attempt in 1..=8 {
            let base = strategy.backoff_delay(attempt).as_secs_f64();
            for _ in 0..50 {
                let delay = strategy.next_delay(attempt).as_secs_f64();
                assert!(delay >= 0.0);
                assert!(delay <= base * (1.0 + strategy.jitter) + f64::EPSILON);
            }
        }
    }

    #[test]
    fn non_retryable_strategies_carry_zero_budget() {
        assert!(!RetryStrategy::validation().retryable);
        assert!(!RetryStrategy::not_found().retryable);
        assert_eq!(RetryStrategy::unknown().max_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn third_attempt_succeeds_after_two_timeouts() {
        let engine = DecisionEngine::new();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = retry_step("navigate", &engine, 3, &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(OrchestrateError::timeout("navigate", 30_000))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_propagates_immediately() {
        let engine = DecisionEngine::new();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: OrchestrateResult<()> = retry_step("fill_form", &engine, 5, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OrchestrateError::Validation("bad field".into())) }
        })
        .await;

        assert!(matches!(result, Err(OrchestrateError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_wraps_the_last_error() {
        let engine = DecisionEngine::new();
        let cancel = CancellationToken::new();

        let result: OrchestrateResult<()> = retry_step("navigate", &engine, 3, &cancel, || async {
            Err(OrchestrateError::timeout("navigate", 1_000))
        })
        .await;

        match result {
            Err(OrchestrateError::RetriesExhausted { step, attempts, source }) => {
                assert_eq!(step, "navigate");
                assert_eq!(attempts, 3);
                assert!(matches!(*source, OrchestrateError::Timeout { .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn config_ceiling_caps_the_strategy_budget() {
        let engine = DecisionEngine::new();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        // transient-network allows 5 attempts; config allows 2
        let result: OrchestrateResult<()> = retry_step("navigate", &engine, 2, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OrchestrateError::network("navigate", "connection reset")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff_sleep() {
        let engine = DecisionEngine::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: OrchestrateResult<()> = retry_step("navigate", &engine, 3, &cancel, || async {
            Err(OrchestrateError::timeout("navigate", 1_000))
        })
        .await;

        assert!(matches!(result, Err(OrchestrateError::Cancelled(_))));
    }
}
