//! Bounded retry with exponential backoff for network-dependent commands
//!
//! Failures whose text matches a non-retryable signature (auth/permission)
//! short-circuit immediately; repeating those cannot succeed without external
//! intervention. Everything else is assumed transient.

use anyhow::Result;
use std::thread;
use std::time::Duration;

/// Failure signatures that retrying cannot fix
const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "authentication failed",
    "permission denied",
    "access denied",
    "could not read username",
    "could not read password",
    "401",
    "403",
];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub delay_cap: Duration,
}

impl RetryPolicy {
    /// Policy for interactive runs: fail fast, the user is watching
    pub fn interactive() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 2,
            delay_cap: Duration::from_secs(30),
        }
    }

    /// Policy for unattended runs: freshly booted hosts often have no
    /// network yet, so wait longer and try harder
    pub fn unattended() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(5),
            multiplier: 2,
            delay_cap: Duration::from_secs(60),
        }
    }

    pub fn for_context(unattended: bool) -> Self {
        if unattended {
            Self::unattended()
        } else {
            Self::interactive()
        }
    }

    /// Sleep duration before retrying after the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.delay_cap)
    }

    pub fn is_non_retryable(&self, error: &str) -> bool {
        let lowered = error.to_lowercase();
        NON_RETRYABLE_PATTERNS.iter().any(|p| lowered.contains(p))
    }
}

/// Run `f` under the policy. Non-retryable failures return after one attempt;
/// otherwise the last failure is returned once attempts are exhausted.
pub fn with_retry<T, F>(policy: &RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last_err = None;

    for attempt in 1..=policy.max_attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) => {
                let text = e.to_string();
                if policy.is_non_retryable(&text) {
                    log::debug!("attempt {attempt}: non-retryable failure: {text}");
                    return Err(e);
                }
                if attempt < policy.max_attempts {
                    let delay = policy.delay_for(attempt);
                    log::warn!(
                        "attempt {attempt}/{} failed ({text}), retrying in {delay:?}",
                        policy.max_attempts
                    );
                    thread::sleep(delay);
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.expect("max_attempts is at least 1"))
}
