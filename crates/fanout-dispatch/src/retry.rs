//! Retry policy: outcome classification and backoff computation.

use std::time::Duration;

use rand::Rng;

use fanout_core::config::RetryConfig;
use fanout_core::types::SendOutcome;

/// What the worker should do with a finished attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Task succeeded.
    Succeed { message_id: String },
    /// Transient failure with attempts left: park until backoff expires.
    Retry { delay: Duration, detail: String },
    /// Permanent failure, or transient with attempts exhausted.
    Fail { detail: String },
}

/// Stateless policy; all knobs come from [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Classify an attempt's outcome. `attempts` counts attempts already
    /// made, the one that produced `outcome` included.
    pub fn classify(&self, outcome: &SendOutcome, attempts: u32) -> Disposition {
        match outcome {
            SendOutcome::Delivered { message_id } => Disposition::Succeed {
                message_id: message_id.clone(),
            },
            SendOutcome::Permanent { detail } => Disposition::Fail {
                detail: detail.clone(),
            },
            SendOutcome::Transient { detail } => {
                if attempts < self.config.max_attempts {
                    Disposition::Retry {
                        delay: self.backoff(attempts),
                        detail: detail.clone(),
                    }
                } else {
                    Disposition::Fail {
                        detail: format!("retries exhausted after {attempts} attempts: {detail}"),
                    }
                }
            }
        }
    }

    /// Exponential backoff: `base * 2^(attempts-1)`, capped, plus
    /// uniform jitter. Non-decreasing in `attempts` up to the cap.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let raw = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_cap_ms);
        let jitter = if self.config.backoff_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.backoff_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(raw + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_cap_ms: 60_000,
            backoff_jitter_ms: 0,
        })
    }

    #[test]
    fn test_delivered_succeeds() {
        let d = policy().classify(
            &SendOutcome::Delivered {
                message_id: "m1".into(),
            },
            1,
        );
        assert_eq!(
            d,
            Disposition::Succeed {
                message_id: "m1".into()
            }
        );
    }

    #[test]
    fn test_permanent_never_retries() {
        let d = policy().classify(
            &SendOutcome::Permanent {
                detail: "bad recipient".into(),
            },
            1,
        );
        assert!(matches!(d, Disposition::Fail { .. }));
    }

    #[test]
    fn test_transient_retries_until_exhausted() {
        let p = policy();
        let transient = SendOutcome::Transient {
            detail: "502".into(),
        };
        assert!(matches!(p.classify(&transient, 1), Disposition::Retry { .. }));
        assert!(matches!(p.classify(&transient, 2), Disposition::Retry { .. }));
        // Third attempt was the last allowed one.
        assert!(matches!(p.classify(&transient, 3), Disposition::Fail { .. }));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(2_000));
        assert_eq!(p.backoff(2), Duration::from_millis(4_000));
        assert_eq!(p.backoff(3), Duration::from_millis(8_000));
        assert_eq!(p.backoff(10), Duration::from_millis(60_000));
        // Non-decreasing across the whole range.
        let mut prev = Duration::ZERO;
        for n in 1..20 {
            let b = p.backoff(n);
            assert!(b >= prev);
            prev = b;
        }
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let p = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 100,
            backoff_cap_ms: 1_000,
            backoff_jitter_ms: 50,
        });
        for _ in 0..100 {
            let b = p.backoff(1);
            assert!(b >= Duration::from_millis(100));
            assert!(b <= Duration::from_millis(150));
        }
    }
}
