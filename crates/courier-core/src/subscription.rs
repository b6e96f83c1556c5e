//! A single open stream to a user's channel.
//!
//! A subscription merges channel messages with its own heartbeat. However it
//! ends (client gone, server error, channel completed), dropping it releases
//! its hold on the channel; the last one out evicts and completes it.

use crate::channel::Channel;
use crate::heartbeat::heartbeat;
use crate::message::{Notification, UserId};
use crate::registry::Registry;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::debug;

/// Holds one subscriber slot on a channel for as long as it lives.
struct Lease {
    registry: Arc<Registry>,
    user_id: UserId,
    channel: Arc<Channel>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let left = self.channel.decrement_subscribers();
        debug!(user = %self.user_id, subscribers = left, "Subscription ended");

        if left == 0 && self.registry.evict(&self.user_id, &self.channel) {
            self.channel.complete();
            debug!(user = %self.user_id, "Evicted idle channel");
        }
    }
}

/// Stream of notifications for one connected client.
pub struct Subscription {
    stream: BoxStream<'static, Notification>,
    lease: Lease,
}

impl Subscription {
    /// Attach to the user's channel and start the heartbeat.
    pub(crate) fn open(registry: Arc<Registry>, user_id: &str, heartbeat_interval: Duration) -> Self {
        let channel = registry.attach(user_id);

        let messages = channel.subscribe().map(Notification::Message);
        let beats = heartbeat(heartbeat_interval, channel.scope());

        Self {
            stream: stream::select(messages, beats).boxed(),
            lease: Lease {
                registry,
                user_id: user_id.to_string(),
                channel,
            },
        }
    }

    /// The user this subscription belongs to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.lease.user_id
    }

    pub(crate) fn channel(&self) -> &Arc<Channel> {
        &self.lease.channel
    }
}

impl Stream for Subscription {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("user_id", &self.lease.user_id)
            .finish_non_exhaustive()
    }
}
