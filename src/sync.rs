//! Live per-user mirror of the bookmark table.
//!
//! A [`SyncView`] loads a user's bookmarks once and then keeps the local copy
//! current from the change feed. The local list is a cache: it never holds two
//! entries with the same id, and the store stays the source of truth.
//!
//! Rows arriving from the feed are prepended regardless of `created_at`, so
//! after a mount the list is only approximately ordered. When the feed
//! reports that changes were dropped, the view reloads the whole list.

use std::collections::HashSet;

use crate::error::{DeleteError, StoreError};
use crate::feed::{ChangeFeed, Lagged, Subscription};
use crate::model::{Bookmark, Change};
use crate::store::BookmarkStore;

#[derive(Debug, Default, Clone)]
pub struct BookmarkCache {
    items: Vec<Bookmark>,
}

impl BookmarkCache {
    /// Replaces the contents, dropping any repeated id after its first
    /// occurrence.
    pub fn replace(&mut self, items: Vec<Bookmark>) {
        let mut seen = HashSet::new();
        self.items = items
            .into_iter()
            .filter(|b| seen.insert(b.id.clone()))
            .collect();
    }

    /// Prepends `bookmark` unless its id is already cached.
    pub fn merge_insert(&mut self, bookmark: Bookmark) -> bool {
        if self.contains(&bookmark.id) {
            return false;
        }
        self.items.insert(0, bookmark);
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|b| b.id != id);
        self.items.len() != before
    }

    /// Returns whether the cache changed.
    pub fn apply(&mut self, change: Change) -> bool {
        match change {
            Change::Insert { record } => self.merge_insert(record),
            Change::Delete { id, .. } => self.remove(&id),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|b| b.id == id)
    }

    pub fn items(&self) -> &[Bookmark] {
        &self.items
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|b| b.id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What [`SyncView::next_change`] did to the local list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    Change(Change),
    /// Changes were lost on the feed and the list was reloaded from the store.
    Resynced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Declined,
    Deleted,
}

pub struct SyncView {
    user_id: String,
    cache: BookmarkCache,
    subscription: Option<Subscription>,
    deleting: HashSet<String>,
}

impl SyncView {
    /// Subscribes to the user's changes, performs the initial load and applies
    /// whatever arrived in between. A failed load leaves the list empty.
    pub async fn mount(store: &dyn BookmarkStore, feed: &ChangeFeed, user_id: &str) -> Self {
        let subscription = feed.subscribe(user_id);

        let mut cache = BookmarkCache::default();
        match store.list(user_id).await {
            Ok(items) => cache.replace(items),
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "error fetching bookmarks");
            }
        }

        let mut view = SyncView {
            user_id: user_id.to_string(),
            cache,
            subscription: Some(subscription),
            deleting: HashSet::new(),
        };
        view.drain(store).await;
        view
    }

    pub fn bookmarks(&self) -> &[Bookmark] {
        self.cache.items()
    }

    pub fn cache(&self) -> &BookmarkCache {
        &self.cache
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(|s| s.is_active())
    }

    pub fn apply(&mut self, change: Change) -> bool {
        if change.user_id() != self.user_id {
            return false;
        }
        self.cache.apply(change)
    }

    /// Merges a record this view's own form just created. A later feed insert
    /// for the same id is then a no-op.
    pub fn record_created(&mut self, bookmark: Bookmark) -> bool {
        if bookmark.user_id != self.user_id {
            return false;
        }
        self.cache.merge_insert(bookmark)
    }

    /// Applies every change already queued on the subscription, reloading
    /// from `store` if any were lost.
    pub async fn drain(&mut self, store: &dyn BookmarkStore) -> usize {
        let mut applied = 0;
        let mut lagged = false;
        while let Some(received) = self.subscription.as_mut().and_then(|s| s.try_recv()) {
            match received {
                Ok(change) => {
                    self.cache.apply(change);
                    applied += 1;
                }
                Err(Lagged(_)) => lagged = true,
            }
        }
        if lagged {
            self.resync(store).await;
        }
        applied
    }

    /// Waits for the next change and applies it. Returns `None` once the view
    /// has been torn down.
    pub async fn next_change(&mut self, store: &dyn BookmarkStore) -> Option<ViewUpdate> {
        match self.subscription.as_mut()?.recv().await? {
            Ok(change) => {
                self.cache.apply(change.clone());
                Some(ViewUpdate::Change(change))
            }
            Err(Lagged(_)) => {
                self.resync(store).await;
                Some(ViewUpdate::Resynced)
            }
        }
    }

    /// Replaces the list with a fresh load. A failed load keeps the current
    /// list.
    pub async fn resync(&mut self, store: &dyn BookmarkStore) {
        match store.list(&self.user_id).await {
            Ok(items) => {
                tracing::info!(user_id = %self.user_id, count = items.len(), "bookmark list reloaded");
                self.cache.replace(items);
            }
            Err(e) => {
                tracing::error!(user_id = %self.user_id, error = %e, "error reloading bookmarks");
            }
        }
    }

    pub fn is_deleting(&self, id: &str) -> bool {
        self.deleting.contains(id)
    }

    /// Marks `id` as being deleted. Fails if a delete for it is outstanding.
    pub fn begin_delete(&mut self, id: &str) -> Result<(), DeleteError> {
        if !self.deleting.insert(id.to_string()) {
            return Err(DeleteError::InProgress(id.to_string()));
        }
        Ok(())
    }

    /// Settles an outstanding delete. On failure the record stays cached.
    pub fn finish_delete(&mut self, id: &str, result: Result<bool, StoreError>) -> Result<(), DeleteError> {
        self.deleting.remove(id);
        match result {
            Ok(_) => {
                self.cache.remove(id);
                Ok(())
            }
            Err(e) => {
                tracing::error!(user_id = %self.user_id, bookmark_id = %id, error = %e, "error deleting bookmark");
                Err(DeleteError::Store(e))
            }
        }
    }

    pub async fn delete<F>(&mut self, store: &dyn BookmarkStore, id: &str, confirm: F) -> Result<DeleteOutcome, DeleteError>
    where
        F: FnOnce() -> bool,
    {
        if !confirm() {
            return Ok(DeleteOutcome::Declined);
        }

        self.begin_delete(id)?;
        let result = store.delete(&self.user_id, id).await;
        self.finish_delete(id, result)?;
        Ok(DeleteOutcome::Deleted)
    }

    /// Releases the change feed subscription. Dropping the view does the same.
    pub fn teardown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
