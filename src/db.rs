use crate::config::Config;
use crate::error::StoreError;
use crate::feed::ChangeFeed;
use crate::model::{Bookmark, Change, NewBookmark};
use crate::store::BookmarkStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::path::Path;
use std::time::Duration;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_bookmarks.sql", include_str!("migrations/001_bookmarks.sql"))];

const BOOKMARK_COLUMNS: &str = "id, user_id, title, url, created_at";

pub struct Database {
    db: LibsqlDatabase,
    conn: Connection,
    feed: ChangeFeed,
    turso_url: Option<String>,
    turso_auth_token: Option<String>,
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn is_replica(turso_url: &Option<String>, turso_auth_token: &Option<String>) -> bool {
        turso_url.is_some() && turso_auth_token.is_some()
    }

    pub fn replicated(&self) -> bool {
        Self::is_replica(&self.turso_url, &self.turso_auth_token)
    }

    pub async fn sync(&self) -> Result<()> {
        if self.replicated() {
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    async fn migrate(conn: &Connection) -> Result<()> {
        for (filename, sql) in SYSTEM_MIGRATIONS.iter().chain(MIGRATIONS) {
            Self::run_migration(conn, filename, sql).await?;
        }
        Ok(())
    }

    pub async fn new(cfg: &Config, data_dir: &Path, feed: ChangeFeed) -> Result<Self> {
        let path = data_dir.join(cfg.app.get_db());
        let turso_url = cfg.app.turso_url.clone();
        let turso_auth_token = cfg.app.turso_auth_token.clone();

        let db = match (&turso_url, &turso_auth_token) {
            (Some(url), Some(token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let sync_interval = Duration::from_secs(cfg.app.sync_interval_seconds);
                Builder::new_synced_database(&path, url.clone(), token.clone())
                    .sync_interval(sync_interval)
                    .build()
                    .await?
            }
            _ => Builder::new_local(&path).build().await?,
        };

        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;
        Self::migrate(&conn).await?;

        Ok(Database {
            db,
            conn,
            feed,
            turso_url,
            turso_auth_token,
        })
    }

    pub async fn in_memory(feed: ChangeFeed) -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;
        Self::migrate(&conn).await?;

        Ok(Database {
            db,
            conn,
            feed,
            turso_url: None,
            turso_auth_token: None,
        })
    }

    fn row_to_bookmark(row: &libsql::Row) -> Result<Bookmark, StoreError> {
        let created_at: String = row.get(4)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::MalformedRow(format!("created_at {created_at:?}: {e}")))?
            .with_timezone(&Utc);

        Ok(Bookmark {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            url: row.get(3)?,
            created_at,
        })
    }
}

#[async_trait]
impl BookmarkStore for Database {
    async fn list(&self, user_id: &str) -> Result<Vec<Bookmark>, StoreError> {
        let query = format!(
            r#"
            SELECT {BOOKMARK_COLUMNS}
            FROM bookmarks
            WHERE user_id = ?
            ORDER BY created_at DESC, rowid DESC
        "#
        );

        let mut rows = self.conn.query(&query, libsql::params![user_id]).await?;
        let mut bookmarks = Vec::new();
        while let Some(row) = rows.next().await? {
            bookmarks.push(Self::row_to_bookmark(&row)?);
        }

        Ok(bookmarks)
    }

    async fn insert(&self, new: NewBookmark) -> Result<Bookmark, StoreError> {
        let query = format!(
            r#"
            INSERT INTO bookmarks (id, user_id, title, url)
            VALUES (?, ?, ?, ?)
            RETURNING {BOOKMARK_COLUMNS}
        "#
        );

        let id = uuid::Uuid::new_v4().to_string();
        let mut rows = self
            .conn
            .query(&query, libsql::params![id, new.user_id, new.title, new.url])
            .await?;

        let Some(row) = rows.next().await? else {
            return Err(StoreError::NothingReturned);
        };
        let record = Self::row_to_bookmark(&row)?;

        tracing::info!(user_id = %record.user_id, bookmark_id = %record.id, "bookmark created");
        self.feed.publish(Change::Insert { record: record.clone() });
        Ok(record)
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM bookmarks WHERE id = ? AND user_id = ?",
                libsql::params![id, user_id],
            )
            .await?;

        if removed == 0 {
            return Ok(false);
        }

        tracing::info!(user_id = %user_id, bookmark_id = %id, "bookmark deleted");
        self.feed.publish(Change::Delete {
            id: id.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(true)
    }
}
