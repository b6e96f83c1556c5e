//! Shared fixtures for Courier benchmarks.

use courier_core::{Notifier, Subscription};
use tokio::runtime::{Builder, Runtime};

/// Single-threaded runtime with timers enabled.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build runtime")
}

/// Open one stream for each of `count` distinct users.
///
/// Must be called inside a runtime context.
#[must_use]
pub fn connect_users(notifier: &Notifier, count: usize) -> Vec<Subscription> {
    (0..count)
        .map(|i| notifier.connect(&format!("user-{}", i)))
        .collect()
}

/// Open `count` streams for a single user.
///
/// Must be called inside a runtime context.
#[must_use]
pub fn connect_same_user(notifier: &Notifier, user_id: &str, count: usize) -> Vec<Subscription> {
    (0..count).map(|_| notifier.connect(user_id)).collect()
}
