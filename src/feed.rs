//! In-process change feed.
//!
//! The store publishes every committed insert/delete here. Readers open a
//! [`Subscription`] filtered to one user; the handle is released either
//! explicitly with [`Subscription::unsubscribe`] or when it is dropped.
//!
//! All users share one bounded channel. A reader that falls more than the
//! channel capacity behind gets [`Lagged`] instead of the lost changes and
//! has to reload from the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::model::Change;

pub const DEFAULT_CAPACITY: usize = 256;

/// Changes were dropped before this subscriber read them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("change feed subscriber lagged, {0} changes skipped")]
pub struct Lagged(pub u64);

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<Change>,
    live: Arc<AtomicUsize>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        ChangeFeed {
            tx,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, change: Change) {
        // No receivers is not an error; nobody is watching.
        let delivered = self.tx.send(change).unwrap_or(0);
        tracing::trace!(delivered, "published change");
    }

    pub fn subscribe(&self, user_id: &str) -> Subscription {
        self.live.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(user_id = %user_id, "change feed subscription opened");
        Subscription {
            user_id: user_id.to_string(),
            rx: self.tx.subscribe(),
            token: CancellationToken::new(),
            live: self.live.clone(),
            released: false,
        }
    }

    /// Number of subscriptions that have not been released yet.
    pub fn live_subscriptions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

pub struct Subscription {
    user_id: String,
    rx: broadcast::Receiver<Change>,
    token: CancellationToken,
    live: Arc<AtomicUsize>,
    released: bool,
}

impl Subscription {
    /// Waits for the next change belonging to this subscription's user.
    /// Returns `None` once the subscription is cancelled or the feed is gone.
    pub async fn recv(&mut self) -> Option<Result<Change, Lagged>> {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => return None,
                msg = self.rx.recv() => match msg {
                    Ok(change) if change.user_id() == self.user_id => return Some(Ok(change)),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id = %self.user_id, skipped, "change feed subscriber lagged");
                        return Some(Err(Lagged(skipped)));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<Result<Change, Lagged>> {
        if self.token.is_cancelled() {
            return None;
        }
        loop {
            match self.rx.try_recv() {
                Ok(change) if change.user_id() == self.user_id => return Some(Ok(change)),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %self.user_id, skipped, "change feed subscriber lagged");
                    return Some(Err(Lagged(skipped)));
                }
                Err(_) => return None,
            }
        }
    }

    /// Token that ends [`Subscription::recv`] when cancelled from elsewhere.
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.released && !self.token.is_cancelled()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.token.cancel();
        self.live.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(user_id = %self.user_id, "change feed subscription released");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
