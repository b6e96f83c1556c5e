//! Periodic timestamp broadcast.

use crate::notifier::Notifier;
use chrono::{DateTime, Local, SecondsFormat, TimeZone};
use std::fmt::Display;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default period between broadcasts.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Format a tick message: `time=<ISO-8601 timestamp with offset>`.
#[must_use]
pub fn tick_message<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("time={}", at.to_rfc3339_opts(SecondsFormat::Millis, false))
}

/// Broadcasts the current time to every connected user.
#[derive(Debug, Clone)]
pub struct Ticker {
    notifier: Notifier,
    period: Duration,
}

impl Ticker {
    /// Create a ticker for the given notifier.
    #[must_use]
    pub fn new(notifier: Notifier, period: Duration) -> Self {
        Self { notifier, period }
    }

    /// Get the tick period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Publish one timestamp to every user.
    ///
    /// Returns the number of channels reached.
    pub fn tick(&self) -> usize {
        if self.notifier.registry().is_empty() {
            return 0;
        }
        let message = tick_message(&Local::now());
        let reached = self.notifier.emit_to_all(&message);
        debug!(users = reached, %message, "Emitted timestamp");
        reached
    }

    /// Tick every period until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticks = interval(self.period.max(Duration::from_millis(1)));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = self.period.as_millis() as u64, "Ticker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticks.tick() => {
                    self.tick();
                }
            }
        }

        info!("Ticker stopped");
    }
}
