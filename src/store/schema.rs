// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};

use crate::error::StoreError;

/// Handle to the SQLite file holding channels and episodes
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// One unit of work against the store.
///
/// Dropping without [`StoreTransaction::commit`] rolls everything back.
pub struct StoreTransaction {
    pub(super) tx: sqlx::Transaction<'static, Sqlite>,
}

impl Database {
    /// Open (or create) the database file and bring the schema up to date
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::CreateDirectoryFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // A single connection queues units of work instead of racing for the write lock
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(60))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        tracing::debug!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Create tables and indexes; every statement is idempotent
    async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS podcast_channel (
                id INTEGER PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                title TEXT,
                description TEXT,
                cover_art TEXT,
                status TEXT NOT NULL DEFAULT 'new',
                error_message TEXT,
                created INTEGER NOT NULL,
                last_fetched INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS podcast_episode (
                id INTEGER PRIMARY KEY,
                channel_id INTEGER NOT NULL REFERENCES podcast_channel(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                stream_url TEXT NOT NULL,
                description TEXT,
                duration TEXT,
                status TEXT NOT NULL DEFAULT 'skipped',
                publish_date INTEGER NOT NULL,
                error_message TEXT,
                created INTEGER NOT NULL,
                size INTEGER,
                content_type TEXT,
                cover_art TEXT,
                genre TEXT,
                year INTEGER,
                UNIQUE(channel_id, title, stream_url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episode_channel_published
             ON podcast_episode(channel_id, publish_date DESC)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_channel_last_fetched ON podcast_channel(last_fetched)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Start a unit of work
    pub async fn begin(&self) -> Result<StoreTransaction, StoreError> {
        Ok(StoreTransaction {
            tx: self.pool.begin().await?,
        })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl StoreTransaction {
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_file_and_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("podsync.db");

        let db = Database::open(&path).await.unwrap();
        assert!(path.exists());
        db.close().await;
    }

    #[tokio::test]
    async fn open_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("podsync.db");

        Database::open(&path).await.unwrap().close().await;
        let db = Database::open(&path).await.unwrap();
        let tx = db.begin().await.unwrap();
        tx.commit().await.unwrap();
    }
}
