use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("malformed row: {0}")]
    MalformedRow(String),
    #[error("insert returned no row")]
    NothingReturned,
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("auth server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("missing code verifier")]
    MissingVerifier,
}

pub const INVALID_URL_MESSAGE: &str = "Please enter a valid URL (including http:// or https://)";
pub const EMPTY_TITLE_MESSAGE: &str = "Please enter a title";

#[derive(Debug, Error)]
pub enum FormError {
    #[error("{}", INVALID_URL_MESSAGE)]
    InvalidUrl,
    #[error("{}", EMPTY_TITLE_MESSAGE)]
    EmptyTitle,
    #[error("a bookmark is already being added")]
    Busy,
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl FormError {
    pub fn is_validation(&self) -> bool {
        matches!(self, FormError::InvalidUrl | FormError::EmptyTitle)
    }
}

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("bookmark {0} is already being deleted")]
    InProgress(String),
    #[error("Failed to delete bookmark: {0}")]
    Store(#[from] StoreError),
}
