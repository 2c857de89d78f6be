//! Retry state machine for a single stage invocation
//!
//! `pending → (transient failure → pending)* → succeeded | failed`
//!
//! The retry ceiling is a counted budget of attempts. A transient failure on
//! the last attempt becomes permanent.

use crate::capability::CapabilityError;
use std::time::Duration;

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Permanent outcome of a stage invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("{source} (attempt {attempts})")]
    Permanent { source: CapabilityError, attempts: u32 },
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { last: CapabilityError, attempts: u32 },
}

impl StageError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempts, .. } | Self::RetriesExhausted { attempts, .. } => *attempts,
        }
    }

    /// The capability error that ended the invocation.
    pub fn cause(&self) -> &CapabilityError {
        match self {
            Self::Permanent { source, .. } => source,
            Self::RetriesExhausted { last, .. } => last,
        }
    }
}

/// What to do after recording an attempt.
#[derive(Debug, PartialEq)]
pub enum Transition<T> {
    Succeeded { value: T, attempts: u32 },
    /// Back to pending: wait `delay`, then make attempt `attempt`
    Retry { delay: Duration, attempt: u32, error: CapabilityError },
    Failed(StageError),
}

/// Tracks one stage invocation through its attempts.
#[derive(Debug)]
pub struct Invocation {
    policy: RetryPolicy,
    attempt: u32,
    finished: bool,
}

impl Invocation {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 1,
            finished: false,
        }
    }

    /// The attempt currently pending (1-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Record the outcome of the pending attempt.
    pub fn record<T>(&mut self, outcome: Result<T, CapabilityError>) -> Transition<T> {
        debug_assert!(!self.finished, "invocation already finished");
        let attempts = self.attempt;
        match outcome {
            Ok(value) => {
                self.finished = true;
                Transition::Succeeded { value, attempts }
            }
            Err(error) if error.is_transient() && attempts < self.policy.max_attempts => {
                self.attempt += 1;
                Transition::Retry {
                    delay: self.policy.delay_after(attempts),
                    attempt: self.attempt,
                    error,
                }
            }
            Err(error) if error.is_transient() => {
                self.finished = true;
                Transition::Failed(StageError::RetriesExhausted { last: error, attempts })
            }
            Err(error) => {
                self.finished = true;
                Transition::Failed(StageError::Permanent {
                    source: error,
                    attempts,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(10);
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(350));
        assert_eq!(p.delay_after(40), Duration::from_millis(350));
    }

    #[test]
    fn success_on_first_attempt() {
        let mut inv = Invocation::new(policy(3));
        assert_eq!(
            inv.record::<&str>(Ok("done")),
            Transition::Succeeded { value: "done", attempts: 1 }
        );
        assert!(inv.is_finished());
    }

    #[test]
    fn transient_failures_retry_until_success() {
        let mut inv = Invocation::new(policy(3));
        match inv.record::<()>(Err(CapabilityError::Timeout(5))) {
            Transition::Retry { attempt, delay, .. } => {
                assert_eq!(attempt, 2);
                assert_eq!(delay, Duration::from_millis(100));
            }
            other => panic!("expected retry, got {:?}", other),
        }
        assert!(matches!(
            inv.record::<()>(Err(CapabilityError::RateLimited("429".into()))),
            Transition::Retry { attempt: 3, .. }
        ));
        assert_eq!(
            inv.record(Ok(7)),
            Transition::Succeeded { value: 7, attempts: 3 }
        );
    }

    #[test]
    fn exhausted_budget_becomes_permanent() {
        let mut inv = Invocation::new(policy(2));
        assert!(matches!(
            inv.record::<()>(Err(CapabilityError::Timeout(1))),
            Transition::Retry { .. }
        ));
        match inv.record::<()>(Err(CapabilityError::Timeout(1))) {
            Transition::Failed(err) => {
                assert!(matches!(err, StageError::RetriesExhausted { attempts: 2, .. }));
                assert_eq!(err.cause(), &CapabilityError::Timeout(1));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let mut inv = Invocation::new(policy(5));
        match inv.record::<()>(Err(CapabilityError::InvalidInput("bad".into()))) {
            Transition::Failed(err) => assert_eq!(err.attempts(), 1),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn single_attempt_budget_never_retries() {
        let mut inv = Invocation::new(policy(1));
        assert!(matches!(
            inv.record::<()>(Err(CapabilityError::RateLimited(String::new()))),
            Transition::Failed(StageError::RetriesExhausted { attempts: 1, .. })
        ));
    }
}
