//! Retry delay handling for failed token fetches

use std::time::Duration;

/// Configuration for the delay between retries of a failed fetch
///
/// A multiplier of 1 yields a fixed retry interval; a larger multiplier
/// yields exponential backoff capped at `max_delay`.
#[derive(Clone, Debug)]
pub struct RetryDelayConfig {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
}

impl Default for RetryDelayConfig {
    /// Default retry delay configuration
    ///
    /// Uses an initial delay of 100 ms with a multiplier of 2, capped at
    /// 15 seconds.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(15),
            multiplier: 2,
        }
    }
}

impl RetryDelayConfig {
    /// Constructs a new retry delay configuration
    ///
    /// The first failure is delayed by `initial_delay`. Subsequent failures
    /// multiply the prior delay by `multiplier`, capped at `max_delay`.
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: multiplier.max(1),
        }
    }

    /// Constructs a configuration that retries at a fixed interval
    pub fn fixed(interval: Duration) -> Self {
        Self::new(interval, interval, 1)
    }
}

/// Utility trait for threading results through a retry delay tracker
pub trait WithRetryDelay {
    /// The output once a delay has been attached
    type Output;

    /// Reports this result to the tracker, pairing failures with the delay
    /// to observe before the next attempt
    fn with_retry_delay(self, tracker: &mut RetryDelayTracker) -> Self::Output;
}

impl<T, E> WithRetryDelay for Result<T, E> {
    type Output = Result<T, (E, Duration)>;

    fn with_retry_delay(self, tracker: &mut RetryDelayTracker) -> Self::Output {
        match self {
            Ok(ok) => {
                tracker.success();
                Ok(ok)
            }
            Err(err) => Err((err, tracker.failure())),
        }
    }
}

/// Stateful tracker for the current retry delay
#[derive(Debug)]
pub struct RetryDelayTracker {
    config: RetryDelayConfig,
    last_delay: Option<Duration>,
}

impl RetryDelayTracker {
    /// Constructs a new tracker from a [`RetryDelayConfig`]
    pub fn new(config: RetryDelayConfig) -> Self {
        Self {
            config,
            last_delay: None,
        }
    }

    /// Reports a success, resetting the delay state
    pub fn success(&mut self) {
        self.last_delay = None;
    }

    /// Reports a failure and returns the delay to observe before retrying
    pub fn failure(&mut self) -> Duration {
        let next = self
            .last_delay
            .map(|d| (d.saturating_mul(self.config.multiplier)).min(self.config.max_delay))
            .unwrap_or(self.config.initial_delay);
        self.last_delay = Some(next);
        next
    }
}

impl From<RetryDelayConfig> for RetryDelayTracker {
    fn from(config: RetryDelayConfig) -> Self {
        Self::new(config)
    }
}
