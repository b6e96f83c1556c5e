//! # courier-core
//!
//! Per-user server push for the Courier notification server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Channel** - One user's best-effort broadcast bus
//! - **Registry** - User id to channel map with create-on-connect and evict-on-last-leave
//! - **Subscription** - One open stream: channel messages merged with heartbeats
//! - **Notifier** - Connect, send to one user, broadcast to all, drain on shutdown
//! - **Ticker** - Periodic timestamp broadcast
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Subscription │────▶│  Registry   │────▶│  Channel    │
//! └──────────────┘     └─────────────┘     └─────────────┘
//!        ▲                    ▲                   │
//!        │                    │                   ▼
//! ┌──────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Heartbeat   │     │  Notifier   │◀────│   Ticker    │
//! └──────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod channel;
pub mod heartbeat;
pub mod message;
pub mod notifier;
pub mod registry;
pub mod shutdown;
pub mod subscription;
pub mod ticker;

pub use channel::Channel;
pub use heartbeat::heartbeat;
pub use message::{Notification, UserId, CONNECTED_PAYLOAD, HEARTBEAT_PAYLOAD};
pub use notifier::{Notifier, NotifierConfig};
pub use registry::Registry;
pub use shutdown::{drain_all, Drain, DrainError, DrainReport};
pub use subscription::Subscription;
pub use ticker::{tick_message, Ticker};
