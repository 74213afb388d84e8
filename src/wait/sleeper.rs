//! Injectable sleeping.

use async_trait::async_trait;
use std::time::Duration;

/// Suspends the current task. Polling loops and retry loops sleep through
/// this trait so tests can observe delays without waiting on them.
#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    /// Sleeps for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
