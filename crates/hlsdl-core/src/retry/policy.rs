use std::time::Duration;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry; the failure is final.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Uncapped, jitter-free exponential backoff: attempt `n` (0-based) waits
/// `base_delay * 2^n` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Decide what to do after attempt `attempt` (0-based) failed.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            return RetryDecision::NoRetry;
        }
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        RetryDecision::RetryAfter(self.base_delay.saturating_mul(multiplier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base_delay() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(0), RetryDecision::RetryAfter(Duration::from_millis(1000)));
        assert_eq!(p.decide(1), RetryDecision::RetryAfter(Duration::from_millis(2000)));
        assert_eq!(p.decide(2), RetryDecision::RetryAfter(Duration::from_millis(4000)));
    }

    #[test]
    fn respects_max_retries() {
        let p = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
        };
        assert!(matches!(p.decide(0), RetryDecision::RetryAfter(_)));
        assert!(matches!(p.decide(1), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(2), RetryDecision::NoRetry);
    }

    #[test]
    fn zero_retries_never_retries() {
        let p = RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(10),
        };
        assert_eq!(p.decide(0), RetryDecision::NoRetry);
    }

    #[test]
    fn huge_attempt_saturates() {
        let p = RetryPolicy {
            max_retries: u32::MAX,
            base_delay: Duration::from_secs(1),
        };
        match p.decide(40) {
            RetryDecision::RetryAfter(d) => assert!(d >= Duration::from_secs(u32::MAX as u64)),
            RetryDecision::NoRetry => panic!("expected retry"),
        }
    }
}
