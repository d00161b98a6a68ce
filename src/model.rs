use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBookmark {
    pub user_id: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A row change as delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Insert { record: Bookmark },
    Delete { id: String, user_id: String },
}

impl Change {
    pub fn user_id(&self) -> &str {
        match self {
            Change::Insert { record } => &record.user_id,
            Change::Delete { user_id, .. } => user_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Change::Insert { .. } => "insert",
            Change::Delete { .. } => "delete",
        }
    }
}
