use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Bookmark, NewBookmark};

/// Row storage for bookmarks. Every call is scoped to the owning user.
#[async_trait]
pub trait BookmarkStore: Send + Sync + 'static {
    /// All bookmarks owned by `user_id`, newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<Bookmark>, StoreError>;

    /// Persists a new bookmark and returns it with its assigned `id` and
    /// `created_at`.
    async fn insert(&self, new: NewBookmark) -> Result<Bookmark, StoreError>;

    /// Removes the bookmark `id` if it is owned by `user_id`.
    /// Returns `true` if a row was removed.
    async fn delete(&self, user_id: &str, id: &str) -> Result<bool, StoreError>;
}
