//! Reconnect backoff policy.
//!
//! Exponential and deterministic, with a hard cap on attempts. After the
//! last attempt the client gives up and reports the relay as unavailable.

use std::time::Duration;

/// Backoff schedule for relay reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Number of attempts before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based), or `None` once the
    /// attempts are exhausted.
    ///
    /// Default schedule: 1s, 2s, 4s, 8s, 16s.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }

    /// Iterate the whole schedule.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).filter_map(move |attempt| self.delay_for(attempt))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles() {
        let delays: Vec<u64> = ReconnectPolicy::default()
            .delays()
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn sixth_attempt_is_refused() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(5), Some(Duration::from_secs(16)));
        assert_eq!(policy.delay_for(6), None);
    }

    #[test]
    fn attempt_zero_is_not_an_attempt() {
        assert_eq!(ReconnectPolicy::default().delay_for(0), None);
    }

    #[test]
    fn delay_is_capped() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 8,
        };
        assert_eq!(policy.delay_for(4), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for(8), Some(Duration::from_secs(10)));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = ReconnectPolicy {
            max_attempts: u32::MAX,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay_for(200), Some(Duration::from_secs(16)));
    }
}
