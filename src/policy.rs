//! Restart timing: the delay policy and the windowed restart budget.

use std::time::{Duration, Instant};

use crate::error::{Result, VigilError};

/// Governs how long to wait before relaunching an exited target.
///
/// With `backoff_factor == 1.0` every restart waits `base_delay`. A larger
/// factor grows the delay multiplicatively with consecutive failures, clamped
/// to `max_delay`.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// A fixed-delay policy with no backoff.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            backoff_factor: 1.0,
            max_delay: delay,
        }
    }

    /// Delay to apply after the `consecutive_failures`-th recent failure.
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        if self.backoff_factor <= 1.0 || consecutive_failures <= 1 {
            return self.base_delay.min(self.max_delay);
        }
        // Exponent is capped so the f64 math cannot blow up on a long crash loop.
        let exponent = consecutive_failures.saturating_sub(1).min(32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.backoff_factor < 1.0 {
            return Err(VigilError::InvalidConfiguration(
                "backoff factor must be at least 1.0".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(VigilError::InvalidConfiguration(
                "max delay must not be smaller than the base delay".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counts restarts within a sliding window and decides when to give up.
///
/// Every restart attempt is charged; marks older than the window are pruned,
/// so a target that stays up long enough earns its budget back. With no cap
/// the budget never exhausts and the supervisor retries forever.
#[derive(Debug)]
pub struct RestartBudget {
    max_restarts: Option<u32>,
    window: Duration,
    marks: Vec<Instant>,
}

impl RestartBudget {
    pub fn new(max_restarts: Option<u32>, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            marks: Vec::new(),
        }
    }

    /// Record one restart attempt.
    pub fn charge(&mut self) {
        let now = Instant::now();
        self.marks.push(now);
        self.prune(now);
    }

    /// Number of restarts still inside the window.
    pub fn recent(&mut self) -> u32 {
        self.prune(Instant::now());
        self.marks.len() as u32
    }

    /// True once more than `max_restarts` attempts landed inside the window.
    pub fn exhausted(&mut self) -> bool {
        match self.max_restarts {
            None => false,
            Some(max) => self.recent() > max,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.marks
            .retain(|mark| now.duration_since(*mark) <= window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RestartPolicy::fixed(Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(7), Duration::from_millis(500));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RestartPolicy {
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(400),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        // Clamped from here on.
        assert_eq!(policy.delay_after(4), Duration::from_millis(400));
        assert_eq!(policy.delay_after(40), Duration::from_millis(400));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let policy = RestartPolicy {
            base_delay: Duration::from_secs(2),
            backoff_factor: 0.5,
            max_delay: Duration::from_secs(60),
        };
        assert!(policy.validate().is_err());

        let policy = RestartPolicy {
            base_delay: Duration::from_secs(10),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(1),
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn uncapped_budget_never_exhausts() {
        let mut budget = RestartBudget::new(None, Duration::from_secs(60));
        for _ in 0..100 {
            budget.charge();
        }
        assert!(!budget.exhausted());
        assert_eq!(budget.recent(), 100);
    }

    #[test]
    fn budget_exhausts_past_cap() {
        let mut budget = RestartBudget::new(Some(2), Duration::from_secs(60));
        budget.charge();
        assert!(!budget.exhausted());
        budget.charge();
        assert!(!budget.exhausted());
        budget.charge();
        assert!(budget.exhausted());
    }

    #[test]
    fn budget_window_forgives_old_marks() {
        let mut budget = RestartBudget::new(Some(1), Duration::from_millis(50));
        budget.charge();
        budget.charge();
        assert!(budget.exhausted());

        thread::sleep(Duration::from_millis(120));
        assert_eq!(budget.recent(), 0);
        assert!(!budget.exhausted());
    }
}
