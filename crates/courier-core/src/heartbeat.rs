//! Keep-alive ticks scoped to a channel's lifetime.

use crate::message::Notification;
use futures_util::stream::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Produce a heartbeat every `period` until `scope` is cancelled.
///
/// The first tick fires one full period after the call. Pass a token derived
/// from [`Channel::scope`](crate::Channel::scope) so the timer is torn down
/// together with the channel.
pub fn heartbeat(
    period: Duration,
    scope: CancellationToken,
) -> impl Stream<Item = Notification> + Send + 'static {
    let period = period.max(Duration::from_millis(1));
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    IntervalStream::new(ticks)
        .map(|_| Notification::Heartbeat)
        .take_until(scope.cancelled_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_cadence() {
        let start = Instant::now();
        let mut beats = Box::pin(heartbeat(Duration::from_secs(15), CancellationToken::new()));

        assert_eq!(beats.next().await, Some(Notification::Heartbeat));
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert!(start.elapsed() < Duration::from_secs(16));

        assert_eq!(beats.next().await, Some(Notification::Heartbeat));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_with_scope() {
        let scope = CancellationToken::new();
        let mut beats = Box::pin(heartbeat(Duration::from_secs(15), scope.clone()));

        assert!(beats.next().await.is_some());
        scope.cancel();
        assert!(beats.next().await.is_none());
    }
}
