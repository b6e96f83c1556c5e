//! Entry point used by the server: connect, send, broadcast, drain.

use crate::channel::DEFAULT_CHANNEL_CAPACITY;
use crate::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use crate::message::{UserId, CONNECTED_PAYLOAD};
use crate::registry::Registry;
use crate::shutdown::DrainReport;
use crate::subscription::Subscription;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Broadcast capacity per user channel.
    pub channel_capacity: usize,
    /// Period between heartbeats on every subscription.
    pub heartbeat_interval: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Per-user server push.
///
/// Cheap to clone; clones share one registry. Construct one per process (or
/// per test) and call [`Notifier::shutdown`] before the server stops.
#[derive(Debug, Clone)]
pub struct Notifier {
    registry: Arc<Registry>,
    config: NotifierConfig,
}

impl Notifier {
    /// Create a new notifier with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(NotifierConfig::default())
    }

    /// Create a new notifier with custom configuration.
    #[must_use]
    pub fn with_config(config: NotifierConfig) -> Self {
        info!("Creating notifier with config: {:?}", config);
        Self {
            registry: Arc::new(Registry::with_channel_capacity(config.channel_capacity)),
            config,
        }
    }

    /// Get the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Open a stream for a user.
    ///
    /// The user's channel is created if needed and `connected` is published
    /// to it, so the new stream (and any other stream of the same user) sees
    /// the acknowledgment first. Must be called inside a Tokio runtime.
    pub fn connect(&self, user_id: &str) -> Subscription {
        let subscription =
            Subscription::open(Arc::clone(&self.registry), user_id, self.config.heartbeat_interval);
        subscription.channel().publish(CONNECTED_PAYLOAD);
        debug!(
            user = %user_id,
            subscribers = subscription.channel().subscriber_count(),
            "Connected"
        );
        subscription
    }

    /// Send a message to one user.
    ///
    /// Returns the number of streams reached. Unknown users are ignored.
    pub fn emit_to_user(&self, user_id: &str, message: &str) -> usize {
        match self.registry.lookup(user_id) {
            Some(channel) => channel.publish(message),
            None => {
                trace!(user = %user_id, "No channel for user, dropping message");
                0
            }
        }
    }

    /// Send a message to every connected user.
    ///
    /// Returns the number of channels published to.
    pub fn emit_to_all(&self, message: &str) -> usize {
        let payload: Arc<str> = Arc::from(message);
        let channels = self.registry.snapshot();
        for (_, channel) in &channels {
            channel.publish(Arc::clone(&payload));
        }
        channels.len()
    }

    /// Users that currently have a channel.
    #[must_use]
    pub fn current_users(&self) -> Vec<UserId> {
        self.registry.user_ids()
    }

    /// Live stream count for a user.
    #[must_use]
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.registry
            .lookup(user_id)
            .map(|channel| channel.subscriber_count())
            .unwrap_or(0)
    }

    /// Complete every channel and forget all users.
    ///
    /// Streams opened afterwards end straight away.
    pub fn shutdown(&self) -> DrainReport {
        self.registry.shutdown()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
