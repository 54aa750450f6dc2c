use std::time::Duration;
use tether_config::SyncConfig;

/// Exponential backoff: `initial`, doubling each attempt, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Total attempts allowed, unlimited when `None`
    pub max_attempts: Option<u32>,
}

impl BackoffPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            initial: config.initial_backoff(),
            max: config.max_backoff(),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before retrying after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial.saturating_mul(1u32 << shift).min(self.max)
    }

    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempts: 0,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Retry state for one operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
}

impl Backoff {
    /// Attempts that have failed so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and sleep before the next one.
    ///
    /// Returns `false` without sleeping once the attempt limit is reached.
    pub async fn wait(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        if self
            .policy
            .max_attempts
            .is_some_and(|limit| self.attempts >= limit)
        {
            return false;
        }
        tokio::time::sleep(self.policy.delay_for(self.attempts)).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: Option<u32>) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(250),
            max: Duration::from_millis(1000),
            max_attempts,
        }
    }

    #[test]
    fn delays_double_then_cap() {
        let p = policy(None);
        let delays: Vec<u64> = (1..=5).map(|a| p.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![250, 500, 1000, 1000, 1000]);
        assert_eq!(p.delay_for(200), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sleeps_for_the_policy_delay() {
        let mut backoff = policy(None).start();
        let start = tokio::time::Instant::now();
        assert!(backoff.wait().await);
        assert!(backoff.wait().await);
        assert_eq!(start.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_limit_stops_retries() {
        let mut backoff = policy(Some(3)).start();
        assert!(backoff.wait().await);
        assert!(backoff.wait().await);
        assert!(!backoff.wait().await);
        assert_eq!(backoff.attempts(), 3);
    }
}
