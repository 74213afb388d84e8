//! Generic polling loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::WaiterSettings;
use crate::error::{Result, WaitError};

use super::message::WaitMessage;
use super::sleeper::Sleeper;

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    /// Not done yet, poll again.
    Pending,
    /// Done.
    Ready(T),
}

/// Polls a probe until it is ready, sleeping between attempts.
#[derive(Debug, Clone)]
pub struct Poller {
    settings: WaiterSettings,
    sleeper: Arc<dyn Sleeper>,
}

impl Poller {
    /// Creates a poller.
    #[must_use]
    pub fn new(settings: WaiterSettings, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { settings, sleeper }
    }

    /// Returns the waiter settings.
    #[must_use]
    pub const fn settings(&self) -> &WaiterSettings {
        &self.settings
    }

    /// Returns the sleeper this poller uses.
    #[must_use]
    pub fn sleeper(&self) -> Arc<dyn Sleeper> {
        Arc::clone(&self.sleeper)
    }

    /// Creates a progress message throttled by the configured interval.
    #[must_use]
    pub fn message(&self, text: impl Into<String>) -> WaitMessage {
        WaitMessage::new(text, Duration::from_secs(self.settings.message_interval_secs))
    }

    /// Returns the delay before the given zero-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = Duration::from_secs(self.settings.delay_secs);
        let cap = Duration::from_secs(self.settings.max_delay_secs.max(self.settings.delay_secs));
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.settings.backoff_factor.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor).map_or(cap, |delay| delay.min(cap))
    }

    /// Runs the loop: emit the progress message, sleep, probe. Gives up after
    /// the configured number of attempts.
    ///
    /// # Errors
    ///
    /// Returns the probe's error, or [`WaitError::MaxAttemptsExceeded`].
    pub async fn poll<T, F, Fut>(&self, subject: &str, message: &mut WaitMessage, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Poll<T>>>,
    {
        let mut elapsed = Duration::ZERO;

        for attempt in 0..self.settings.max_attempts {
            message.say(elapsed);

            let delay = self.delay_for(attempt);
            self.sleeper.sleep(delay).await;
            elapsed += delay;

            if let Poll::Ready(value) = probe().await? {
                return Ok(value);
            }
        }

        Err(WaitError::MaxAttemptsExceeded {
            subject: subject.to_string(),
            attempts: self.settings.max_attempts,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::sleeper::testing::RecordingSleeper;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings(max_attempts: u32, backoff_factor: f64) -> WaiterSettings {
        WaiterSettings {
            delay_secs: 2,
            max_attempts,
            backoff_factor,
            max_delay_secs: 10,
            message_interval_secs: 30,
            status_cache_secs: 2,
        }
    }

    #[tokio::test]
    async fn test_poll_until_ready() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let poller = Poller::new(settings(5, 1.0), sleeper.clone());
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let mut message = poller.message("Waiting");
        let value = poller
            .poll("thing", &mut message, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(if n == 2 { Poll::Ready(n) } else { Poll::Pending })
            })
            .await
            .expect("poll failed");

        assert_eq!(value, 2);
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(2); 3]);
    }

    #[tokio::test]
    async fn test_poll_gives_up() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let poller = Poller::new(settings(3, 1.0), sleeper.clone());

        let mut message = poller.message("Waiting");
        let result: Result<()> = poller
            .poll("thing", &mut message, || async { Ok(Poll::Pending) })
            .await;

        assert!(matches!(
            result,
            Err(crate::error::DeployError::Wait(WaitError::MaxAttemptsExceeded { attempts: 3, .. }))
        ));
        assert_eq!(sleeper.slept().len(), 3);
    }

    #[test]
    fn test_backoff_is_capped() {
        let poller = Poller::new(settings(10, 2.0), Arc::new(RecordingSleeper::default()));
        assert_eq!(poller.delay_for(0), Duration::from_secs(2));
        assert_eq!(poller.delay_for(1), Duration::from_secs(4));
        assert_eq!(poller.delay_for(2), Duration::from_secs(8));
        assert_eq!(poller.delay_for(3), Duration::from_secs(10));
        assert_eq!(poller.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_huge_delays_saturate_at_cap() {
        let poller = Poller::new(
            WaiterSettings {
                delay_secs: u64::MAX,
                max_delay_secs: u64::MAX,
                backoff_factor: f64::MAX,
                ..settings(3, 2.0)
            },
            Arc::new(RecordingSleeper::default()),
        );
        assert_eq!(poller.delay_for(0), Duration::from_secs(u64::MAX));
        assert_eq!(poller.delay_for(u32::MAX), Duration::from_secs(u64::MAX));
    }
}
