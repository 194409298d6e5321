//! core::cancel
//!
//! Cooperative cancellation for provider calls.
//!
//! A [`CancelToken`] is cloned into every place that needs to observe it. The
//! provider client races each request against [`CancelToken::cancelled`], and
//! the persist engine checks [`CancelToken::is_cancelled`] between writes.
//! Work that already reached the provider is not rolled back.

use std::sync::Arc;

use tokio::sync::watch;

/// A token that can be used to cancel in-flight provider operations.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Cancel every operation observing this token.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    /// Check if the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so `changed` only fails if it is dropped
        // mid-await, which cannot happen while we borrow it.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
