//! Registry of per-user channels.
//!
//! Channels are created on first connect and evicted when their last
//! subscriber leaves. Creation and subscriber registration happen while the
//! map entry is held, so an eviction can never slip in between them.
//!
//! Once [`Registry::shutdown`] has started the registry is closed: new users
//! get a channel that is already completed and never tracked.

use crate::channel::{Channel, DEFAULT_CHANNEL_CAPACITY};
use crate::message::UserId;
use crate::shutdown::{drain_each, Drain, DrainError, DrainReport};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Concurrent map of user id to channel.
#[derive(Debug)]
pub struct Registry {
    /// Channels indexed by user.
    channels: DashMap<UserId, Arc<Channel>>,
    /// Broadcast capacity for new channels.
    channel_capacity: usize,
    /// Cancelled when shutdown starts.
    closed: CancellationToken,
}

impl Registry {
    /// Create a new registry with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new registry whose channels use the given capacity.
    #[must_use]
    pub fn with_channel_capacity(channel_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            channel_capacity,
            closed: CancellationToken::new(),
        }
    }

    /// Get the channel for a user, creating it if absent.
    ///
    /// Concurrent calls for the same unseen user all observe one instance.
    /// After shutdown the returned channel is already completed.
    pub fn get_or_create(&self, user_id: &str) -> Arc<Channel> {
        self.get_or_insert(user_id, false)
    }

    /// Get or create the channel and register one subscriber on it.
    ///
    /// The count is bumped while the entry is locked, which is what keeps a
    /// concurrent eviction from removing the channel underneath us.
    pub(crate) fn attach(&self, user_id: &str) -> Arc<Channel> {
        self.get_or_insert(user_id, true)
    }

    fn get_or_insert(&self, user_id: &str, attach: bool) -> Arc<Channel> {
        if let Some(channel) = self.channels.get(user_id) {
            if attach {
                channel.increment_subscribers();
            }
            return Arc::clone(channel.value());
        }

        let entry = self.channels.entry(user_id.to_string());
        // Checked under the shard lock: shutdown closes before it removes
        // anything, so an insert it cannot see is never made.
        if self.closed.is_cancelled() {
            drop(entry);
            debug!(user = %user_id, "Registry closed, handing out completed channel");
            let channel = Arc::new(Channel::with_capacity(user_id, self.channel_capacity));
            channel.complete();
            if attach {
                channel.increment_subscribers();
            }
            return channel;
        }

        let entry = entry.or_insert_with(|| {
            debug!(user = %user_id, "Creating new channel");
            Arc::new(Channel::with_capacity(user_id, self.channel_capacity))
        });
        if attach {
            let subscribers = entry.value().increment_subscribers();
            debug!(user = %user_id, subscribers, "Subscriber attached");
        }
        Arc::clone(entry.value())
    }

    /// Look up a user's channel without creating it.
    #[must_use]
    pub fn lookup(&self, user_id: &str) -> Option<Arc<Channel>> {
        self.channels.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Point-in-time view of the tracked users.
    #[must_use]
    pub fn user_ids(&self) -> Vec<UserId> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Point-in-time view of every tracked channel.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(UserId, Arc<Channel>)> {
        self.channels
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Number of tracked users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no users are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Remove a user's channel if it has no subscribers.
    ///
    /// Returns `true` if the entry was removed. The removed channel is
    /// completed. A channel that still has subscribers is left alone.
    pub fn remove_if_empty(&self, user_id: &str) -> bool {
        match self
            .channels
            .remove_if(user_id, |_, channel| channel.subscriber_count() == 0)
        {
            Some((_, channel)) => {
                channel.complete();
                debug!(user = %user_id, "Removed empty channel");
                true
            }
            None => false,
        }
    }

    /// Remove exactly `channel` if it is still registered for the user and
    /// idle. The caller completes it on success.
    pub(crate) fn evict(&self, user_id: &str, channel: &Arc<Channel>) -> bool {
        self.channels
            .remove_if(user_id, |_, current| {
                Arc::ptr_eq(current, channel) && current.subscriber_count() == 0
            })
            .is_some()
    }

    /// Check if shutdown has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close the registry, then remove and complete every channel.
    ///
    /// A channel that fails to complete is logged and skipped; the rest are
    /// still completed. The registry is empty afterwards.
    pub fn shutdown(&self) -> DrainReport {
        self.shutdown_with(|_, channel| channel.drain())
    }

    fn shutdown_with<F>(&self, drain: F) -> DrainReport
    where
        F: FnMut(&str, &Channel) -> Result<(), DrainError>,
    {
        self.closed.cancel();

        let mut removed = Vec::with_capacity(self.channels.len());
        self.channels.retain(|user_id, channel| {
            removed.push((user_id.clone(), Arc::clone(channel)));
            false
        });

        let report = drain_each(
            removed
                .iter()
                .map(|(user_id, channel)| (user_id.as_str(), channel.as_ref())),
            drain,
        );
        info!(
            completed = report.completed,
            failed = report.failed.len(),
            "Registry drained"
        );
        report
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
