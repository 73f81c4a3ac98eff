//! Bounded retry state machine for upstream fetches
//!
//! Each attempt's outcome is fed to [`RetryState::decide`], which returns what
//! the relay does next. Transitions:
//!
//! - 403 while an Origin header was sent: retry at once without Origin
//! - a retryable status: wait `attempt * step`, then retry
//! - a network error or timeout: wait, then retry; on the last attempt, fail
//! - anything else: deliver the response as is
//!
//! No path allows more than `max_attempts` attempts.

use std::time::Duration;

use crate::config::{RelayConfig, defaults::MAX_RELAY_ATTEMPTS};
use crate::errors::RelayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.clamp(1, MAX_RELAY_ATTEMPTS),
            backoff_step: config.backoff_step,
            retryable_statuses: config.retryable_statuses.clone(),
        }
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

/// Result of one upstream attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Status(u16),
    /// Connect failure, reset or per-attempt timeout
    NetworkError,
}

/// What to do after an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Hand the current response to the client
    Deliver,
    /// Try again after the delay (zero for the Origin fallback)
    Retry(Duration),
    /// Give up with this error
    Fail(RelayError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    strip_origin: bool,
    last_status: Option<u16>,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            attempt: 1,
            strip_origin: false,
            last_status: None,
        }
    }

    /// 1-based number of the attempt about to be, or just, made
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the next request must go out without an Origin header
    pub fn strip_origin(&self) -> bool {
        self.strip_origin
    }

    pub fn last_status(&self) -> Option<u16> {
        self.last_status
    }

    pub fn decide(
        &mut self,
        policy: &RetryPolicy,
        outcome: AttemptOutcome,
        origin_sent: bool,
    ) -> RetryDecision {
        let attempts_left = self.attempt < policy.max_attempts;

        match outcome {
            AttemptOutcome::Status(403) if origin_sent && !self.strip_origin => {
                self.last_status = Some(403);
                if !attempts_left {
                    return RetryDecision::Deliver;
                }
                self.strip_origin = true;
                self.attempt += 1;
                RetryDecision::Retry(Duration::ZERO)
            }
            AttemptOutcome::Status(status) if policy.is_retryable(status) => {
                self.last_status = Some(status);
                if !attempts_left {
                    return RetryDecision::Fail(RelayError::RetryExhausted {
                        attempts: self.attempt,
                        last_status: self.last_status,
                    });
                }
                let delay = policy.backoff_step * self.attempt;
                self.attempt += 1;
                RetryDecision::Retry(delay)
            }
            AttemptOutcome::Status(status) => {
                self.last_status = Some(status);
                RetryDecision::Deliver
            }
            AttemptOutcome::NetworkError => {
                if !attempts_left {
                    return RetryDecision::Fail(RelayError::UpstreamUnavailable);
                }
                let delay = policy.backoff_step * self.attempt;
                self.attempt += 1;
                RetryDecision::Retry(delay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&RelayConfig::default())
    }

    #[test]
    fn test_forbidden_with_origin_retries_immediately_without_origin() {
        let policy = policy();
        let mut state = RetryState::new();

        let decision = state.decide(&policy, AttemptOutcome::Status(403), true);
        assert_eq!(decision, RetryDecision::Retry(Duration::ZERO));
        assert!(state.strip_origin());
        assert_eq!(state.attempt(), 2);

        let decision = state.decide(&policy, AttemptOutcome::Status(200), false);
        assert_eq!(decision, RetryDecision::Deliver);
        assert_eq!(state.attempt(), 2);
    }

    #[test]
    fn test_second_forbidden_is_delivered() {
        let policy = policy();
        let mut state = RetryState::new();
        state.decide(&policy, AttemptOutcome::Status(403), true);
        assert_eq!(
            state.decide(&policy, AttemptOutcome::Status(403), false),
            RetryDecision::Deliver
        );
    }

    #[test]
    fn test_transient_statuses_back_off_linearly_then_exhaust() {
        let policy = policy();
        let mut state = RetryState::new();

        assert_eq!(
            state.decide(&policy, AttemptOutcome::Status(503), true),
            RetryDecision::Retry(Duration::from_secs(1))
        );
        assert_eq!(
            state.decide(&policy, AttemptOutcome::Status(522), true),
            RetryDecision::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            state.decide(&policy, AttemptOutcome::Status(503), true),
            RetryDecision::Fail(RelayError::RetryExhausted {
                attempts: 3,
                last_status: Some(503)
            })
        );
    }

    #[test]
    fn test_configured_attempts_are_capped() {
        let config = RelayConfig {
            max_attempts: 10,
            ..RelayConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 3);

        let mut state = RetryState::new();
        let mut attempts = 1;
        while let RetryDecision::Retry(_) = state.decide(&policy, AttemptOutcome::Status(503), true) {
            attempts += 1;
        }
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_network_error_is_fatal_only_on_last_attempt() {
        let policy = policy();
        let mut state = RetryState::new();
        assert!(matches!(
            state.decide(&policy, AttemptOutcome::NetworkError, true),
            RetryDecision::Retry(_)
        ));
        assert!(matches!(
            state.decide(&policy, AttemptOutcome::NetworkError, true),
            RetryDecision::Retry(_)
        ));
        assert_eq!(
            state.decide(&policy, AttemptOutcome::NetworkError, true),
            RetryDecision::Fail(RelayError::UpstreamUnavailable)
        );
    }

    #[test]
    fn test_other_statuses_end_the_loop() {
        let policy = policy();
        for status in [200, 206, 302, 404, 500] {
            let mut state = RetryState::new();
            assert_eq!(
                state.decide(&policy, AttemptOutcome::Status(status), true),
                RetryDecision::Deliver
            );
        }
    }

    #[test]
    fn test_attempts_never_exceed_bound() {
        let policy = policy();
        let mut state = RetryState::new();
        let outcomes = [
            AttemptOutcome::Status(403),
            AttemptOutcome::NetworkError,
            AttemptOutcome::Status(502),
            AttemptOutcome::Status(502),
        ];
        let mut made = 0;
        for outcome in outcomes {
            made += 1;
            match state.decide(&policy, outcome, !state.strip_origin()) {
                RetryDecision::Retry(_) => continue,
                _ => break,
            }
        }
        assert_eq!(made, 3);
    }
}
