//! Per-user broadcast channel.
//!
//! A channel fans every published payload out to the receivers that are live
//! at publish time. Nothing is buffered for subscribers that arrive later, and
//! a receiver that falls behind skips what it missed rather than slowing the
//! publisher down.

use crate::message::UserId;
use futures_util::future;
use futures_util::stream::{Stream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Default broadcast channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A single user's message bus.
#[derive(Debug)]
pub struct Channel {
    /// Owning user.
    user_id: UserId,
    /// Broadcast sender for this channel.
    sender: broadcast::Sender<Arc<str>>,
    /// Live subscriber count. The registry decides eviction from this alone.
    subscribers: AtomicUsize,
    /// Cancelled once the channel is completed.
    closed: CancellationToken,
}

impl Channel {
    /// Create a new channel.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self::with_capacity(user_id, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new channel with a specific capacity.
    ///
    /// The capacity bounds how far a receiver may lag before it starts
    /// skipping messages.
    #[must_use]
    pub fn with_capacity(user_id: impl Into<UserId>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            user_id: user_id.into(),
            sender,
            subscribers: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Get the owning user.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Publish a payload to every live receiver.
    ///
    /// Returns the number of receivers that got the payload. Zero receivers
    /// and a completed channel are both fine; the payload is dropped.
    pub fn publish(&self, payload: impl Into<Arc<str>>) -> usize {
        if self.closed.is_cancelled() {
            return 0;
        }
        let count = self.sender.send(payload.into()).unwrap_or_default();
        trace!(user = %self.user_id, recipients = count, "Published to channel");
        count
    }

    /// Subscribe to payloads published from now on.
    ///
    /// The stream ends once the channel is completed. Subscribing to an
    /// already completed channel yields an empty stream.
    pub fn subscribe(&self) -> impl Stream<Item = Arc<str>> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|item| {
                future::ready(match item {
                    Ok(payload) => Some(payload),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        trace!(skipped, "Receiver lagged, skipping messages");
                        None
                    }
                })
            })
            .take_until(self.closed.clone().cancelled_owned())
    }

    /// Mark the channel complete. Idempotent.
    pub fn complete(&self) {
        if !self.closed.is_cancelled() {
            debug!(user = %self.user_id, "Completing channel");
        }
        self.closed.cancel();
    }

    /// Check whether the channel has been completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// A token cancelled when this channel completes.
    ///
    /// Cancelling the returned token does not complete the channel.
    #[must_use]
    pub fn scope(&self) -> CancellationToken {
        self.closed.child_token()
    }

    /// Get the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    /// Record a new subscriber. Returns the new count.
    pub fn increment_subscribers(&self) -> usize {
        self.subscribers.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record a departed subscriber. Returns the new count, never below zero.
    pub fn decrement_subscribers(&self) -> usize {
        let previous = match self.subscribers.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |n| Some(n.saturating_sub(1)),
        ) {
            Ok(n) | Err(n) => n,
        };
        previous.saturating_sub(1)
    }
}
