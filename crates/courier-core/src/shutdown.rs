//! Shutdown draining.
//!
//! On process shutdown every channel is completed so that open streams end
//! cleanly instead of holding the server open. One channel failing to
//! complete must not stop the others.

use crate::channel::Channel;
use crate::message::UserId;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while completing a channel.
#[derive(Debug, Error)]
pub enum DrainError {
    /// The target refused to complete.
    #[error("Failed to complete channel: {0}")]
    Rejected(String),
}

/// Something that can be completed during shutdown.
pub trait Drain: Send + Sync {
    /// Signal that no further messages will arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if the target could not be completed.
    fn drain(&self) -> Result<(), DrainError>;
}

impl Drain for Channel {
    fn drain(&self) -> Result<(), DrainError> {
        self.complete();
        Ok(())
    }
}

/// Outcome of a drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Number of targets completed.
    pub completed: usize,
    /// Users whose channel failed to complete.
    pub failed: Vec<UserId>,
}

/// Complete every target, isolating failures.
pub fn drain_all<'a, I>(targets: I) -> DrainReport
where
    I: IntoIterator<Item = (&'a str, &'a dyn Drain)>,
{
    drain_each(targets, |_, target| target.drain())
}

/// Run `drain` over every target. A failure is logged with its user id and
/// the pass moves on.
pub(crate) fn drain_each<'a, T, I, F>(targets: I, mut drain: F) -> DrainReport
where
    T: ?Sized + 'a,
    I: IntoIterator<Item = (&'a str, &'a T)>,
    F: FnMut(&str, &T) -> Result<(), DrainError>,
{
    let targets: Vec<_> = targets.into_iter().collect();
    if targets.is_empty() {
        info!("Shutting down: no active channels");
    } else {
        info!(count = targets.len(), "Shutting down: completing channels");
    }

    let mut report = DrainReport::default();
    for (user_id, target) in targets {
        match drain(user_id, target) {
            Ok(()) => report.completed += 1,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Error completing channel");
                report.failed.push(user_id.to_string());
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stuck;

    impl Drain for Stuck {
        fn drain(&self) -> Result<(), DrainError> {
            Err(DrainError::Rejected("stuck".into()))
        }
    }

    #[test]
    fn test_failure_does_not_stop_drain() {
        let first = Channel::new("u1");
        let second = Channel::new("u2");
        let stuck = Stuck;

        let report = drain_all([
            ("u1", &first as &dyn Drain),
            ("bad", &stuck as &dyn Drain),
            ("u2", &second as &dyn Drain),
        ]);

        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, vec!["bad".to_string()]);
        assert!(first.is_completed());
        assert!(second.is_completed());
    }

    #[test]
    fn test_drain_nothing() {
        let report = drain_all(std::iter::empty());
        assert_eq!(report, DrainReport::default());
    }
}
