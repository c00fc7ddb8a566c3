use crate::verdict::CaseStatus;
use tracing::warn;

/// Decision returned by the retry policy after a case attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempt produced a usable result, move on to the next case.
    Proceed,
    /// Attempt errored; tear down and run the case again (1-based retry number).
    Retry { attempt: u32 },
    /// Exhausted all retries; keep the error and move on.
    GiveUp,
}

/// Retry policy for case attempts that end in `Error`.
///
/// Each retry starts from scratch: a fresh simulator, a fresh log and a fresh
/// monitor. `Completed` and `Cancelled` attempts are final.
pub struct RetryPolicy {
    max_retries: u32,
    current_attempt: u32,
}

impl RetryPolicy {
    /// `max_attempts` counts the first try, so 1 disables retries.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_retries: max_attempts.saturating_sub(1),
            current_attempt: 0,
        }
    }

    /// Evaluate the status of an attempt and decide what to do next.
    pub fn evaluate(&mut self, case: &str, status: CaseStatus) -> RetryDecision {
        if status != CaseStatus::Error {
            return RetryDecision::Proceed;
        }

        self.current_attempt += 1;

        if self.current_attempt <= self.max_retries {
            warn!(
                case,
                attempt = self.current_attempt,
                max_retries = self.max_retries,
                "case errored, retrying with a fresh session"
            );
            RetryDecision::Retry {
                attempt: self.current_attempt,
            }
        } else {
            warn!(
                case,
                max_retries = self.max_retries,
                "case retries exhausted, keeping error"
            );
            RetryDecision::GiveUp
        }
    }

    /// Reset the retry counter for the next case.
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Retries used so far for the current case.
    #[allow(dead_code)]
    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proceed_on_completed_and_cancelled() {
        let mut policy = RetryPolicy::new(3);
        assert_eq!(policy.evaluate("c", CaseStatus::Completed), RetryDecision::Proceed);
        assert_eq!(policy.evaluate("c", CaseStatus::Cancelled), RetryDecision::Proceed);
        assert_eq!(policy.current_attempt(), 0);
    }

    #[test]
    fn test_retry_then_give_up() {
        let mut policy = RetryPolicy::new(3);
        assert_eq!(
            policy.evaluate("c", CaseStatus::Error),
            RetryDecision::Retry { attempt: 1 }
        );
        assert_eq!(
            policy.evaluate("c", CaseStatus::Error),
            RetryDecision::Retry { attempt: 2 }
        );
        assert_eq!(policy.evaluate("c", CaseStatus::Error), RetryDecision::GiveUp);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let mut policy = RetryPolicy::new(1);
        assert_eq!(policy.evaluate("c", CaseStatus::Error), RetryDecision::GiveUp);
    }

    #[test]
    fn test_zero_attempts_behaves_like_one() {
        let mut policy = RetryPolicy::new(0);
        assert_eq!(policy.evaluate("c", CaseStatus::Error), RetryDecision::GiveUp);
    }

    #[test]
    fn test_reset_clears_attempt_counter() {
        let mut policy = RetryPolicy::new(2);
        policy.evaluate("a", CaseStatus::Error);
        assert_eq!(policy.current_attempt(), 1);
        policy.reset();
        assert_eq!(policy.current_attempt(), 0);
        assert_eq!(
            policy.evaluate("b", CaseStatus::Error),
            RetryDecision::Retry { attempt: 1 }
        );
    }

    #[test]
    fn test_recovery_after_retry_proceeds() {
        let mut policy = RetryPolicy::new(2);
        assert_eq!(
            policy.evaluate("c", CaseStatus::Error),
            RetryDecision::Retry { attempt: 1 }
        );
        assert_eq!(policy.evaluate("c", CaseStatus::Completed), RetryDecision::Proceed);
    }
}
