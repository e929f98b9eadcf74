//! Caller-controlled cancellation with an optional deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::provider::SourceError;

/// Shared cancel flag plus an optional deadline.
///
/// Clones share the flag, so a UI thread can cancel a fetch running elsewhere.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also expires after `budget`.
    pub fn with_timeout(budget: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + budget),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Canceled)` once canceled or past the deadline.
    pub fn check(&self) -> Result<(), SourceError> {
        if self.is_canceled() {
            Err(SourceError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_live() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        assert_eq!(token.remaining(), None);
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(matches!(token.check(), Err(SourceError::Canceled)));
    }

    #[test]
    fn deadline_expires() {
        let token = CancelToken::with_timeout(Duration::from_millis(10));
        assert!(!token.is_canceled());
        std::thread::sleep(Duration::from_millis(15));
        assert!(token.is_canceled());
        assert_eq!(token.remaining(), Some(Duration::ZERO));
    }
}
