//! Cooperative cancellation for research runs.

use crate::types::{AppError, Result};
use std::time::Duration;
use tokio::sync::watch;

/// Clonable cancellation flag. Every clone observes the same signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(cancelled())
        } else {
            Ok(())
        }
    }

    /// Resolves when the token fires.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // the sender lives in `self`, so wait_for only fails if it is dropped
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return self.check();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.check(),
            _ = self.cancelled() => Err(cancelled()),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

fn cancelled() -> AppError {
    AppError::Cancelled
}

/// Whether `err` came from a fired [`CancelToken`].
pub fn is_cancellation(err: &AppError) -> bool {
    matches!(err, AppError::Cancelled)
}
