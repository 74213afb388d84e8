//! Throttled progress messages for long waits.

use std::time::Duration;
use tracing::debug;

/// A progress message emitted while waiting, at most once per interval of
/// elapsed wait time.
#[derive(Debug, Clone)]
pub struct WaitMessage {
    message: String,
    interval: Duration,
    last_emitted: Option<Duration>,
}

impl WaitMessage {
    /// Creates a wait message.
    #[must_use]
    pub fn new(message: impl Into<String>, interval: Duration) -> Self {
        Self {
            message: message.into(),
            interval,
            last_emitted: None,
        }
    }

    /// Emits the message if the throttle interval has passed since the last
    /// emission. Returns the text when it was emitted.
    pub fn say(&mut self, elapsed: Duration) -> Option<String> {
        let due = self
            .last_emitted
            .is_none_or(|last| elapsed.saturating_sub(last) >= self.interval);
        if !due {
            return None;
        }

        self.last_emitted = Some(elapsed);
        let text = format!("{}... ({} elapsed)", self.message, format_elapsed(elapsed));
        debug!("{text}");
        Some(text)
    }
}

/// Formats a duration as `XmYs`.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m{}s", secs / 60, secs % 60)
}
