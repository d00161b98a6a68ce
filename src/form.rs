//! Bookmark creation form: local validation followed by a single insert.

use url::Url;

use crate::error::{FormError, StoreError};
use crate::model::{Bookmark, NewBookmark};
use crate::store::BookmarkStore;

/// Checks the URL first, then the title. Nothing is sent to the store when
/// either check fails.
pub fn validate(user_id: &str, title: &str, url: &str) -> Result<NewBookmark, FormError> {
    if Url::parse(url).is_err() {
        return Err(FormError::InvalidUrl);
    }

    let title = title.trim();
    if title.is_empty() {
        return Err(FormError::EmptyTitle);
    }

    Ok(NewBookmark {
        user_id: user_id.to_string(),
        title: title.to_string(),
        url: url.trim().to_string(),
    })
}

#[derive(Debug, Default)]
pub struct BookmarkForm {
    pub title: String,
    pub url: String,
    submitting: bool,
    error: Option<String>,
}

impl BookmarkForm {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        BookmarkForm {
            title: title.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    /// Message currently shown under the form, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Validates the inputs and marks the form as submitting.
    pub fn begin(&mut self, user_id: &str) -> Result<NewBookmark, FormError> {
        if self.submitting {
            return Err(FormError::Busy);
        }
        self.error = None;

        match validate(user_id, &self.title, &self.url) {
            Ok(new) => {
                self.submitting = true;
                Ok(new)
            }
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Settles an outstanding submission. Inputs are cleared only on success.
    pub fn complete(&mut self, result: Result<Bookmark, StoreError>) -> Result<Bookmark, FormError> {
        self.submitting = false;
        match result {
            Ok(record) => {
                self.title.clear();
                self.url.clear();
                self.error = None;
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to add bookmark");
                self.error = Some(e.to_string());
                Err(FormError::Store(e))
            }
        }
    }

    pub async fn submit<F>(
        &mut self,
        store: &dyn BookmarkStore,
        user_id: &str,
        on_created: F,
    ) -> Result<Bookmark, FormError>
    where
        F: FnOnce(&Bookmark),
    {
        let new = self.begin(user_id)?;
        let result = store.insert(new).await;
        let record = self.complete(result)?;
        on_created(&record);
        Ok(record)
    }
}
