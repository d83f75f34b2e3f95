use std::time::Duration;

/// Send retry policy: attempt count plus a backoff schedule. Attempts past
/// the end of the schedule reuse its last entry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Default schedule for bridge sends.
    pub fn bridge_default() -> Self {
        Self::new(
            3,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
        )
    }

    /// No retries, for tests that should not sleep.
    pub fn none() -> Self {
        Self::new(1, Vec::new())
    }

    /// Delay to wait after the given failed attempt (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt as usize).min(self.backoff.len() - 1);
        self.backoff[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_clamps_to_last_entry() {
        let policy = RetryPolicy::new(
            5,
            vec![Duration::from_millis(100), Duration::from_millis(400)],
        );
        assert_eq!(policy.delay_after(0), Duration::from_millis(100));
        assert_eq!(policy.delay_after(1), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(400));
    }

    #[test]
    fn empty_schedule_never_sleeps() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.delay_after(0), Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }
}
