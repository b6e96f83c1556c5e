//! Notification types delivered to subscribers.

use std::fmt;
use std::sync::Arc;

/// Opaque user identity. Not validated by the core.
pub type UserId = String;

/// Payload sent to a channel when a new stream connects.
pub const CONNECTED_PAYLOAD: &str = "connected";

/// Keep-alive payload produced by the heartbeat generator.
pub const HEARTBEAT_PAYLOAD: &str = "::heartbeat::";

/// A single item on a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A message published to the user's channel.
    Message(Arc<str>),
    /// A keep-alive tick.
    Heartbeat,
}

impl Notification {
    /// Text payload carried by this notification.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message(payload) => payload,
            Self::Heartbeat => HEARTBEAT_PAYLOAD,
        }
    }

    /// Whether this is a keep-alive tick.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Notification {
    fn from(payload: &str) -> Self {
        Self::Message(Arc::from(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payloads() {
        assert_eq!(Notification::from("hello").as_str(), "hello");
        assert_eq!(Notification::Heartbeat.as_str(), "::heartbeat::");
        assert!(Notification::Heartbeat.is_heartbeat());
        assert!(!Notification::from(CONNECTED_PAYLOAD).is_heartbeat());
    }
}
