// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};

use crate::error::StoreError;
use crate::status::{ChannelStatus, EpisodeStatus};

use super::schema::StoreTransaction;
use super::{Channel, ChannelRepository, Episode, NewChannel, NewEpisode};

const CHANNEL_COLUMNS: &str =
    "id, url, title, description, cover_art, status, error_message, created, last_fetched";

const EPISODE_COLUMNS: &str = "id, channel_id, title, stream_url, description, duration, status, \
     publish_date, error_message, created, size, content_type, cover_art, genre, year";

#[derive(FromRow)]
struct ChannelRow {
    id: i64,
    url: String,
    title: Option<String>,
    description: Option<String>,
    cover_art: Option<String>,
    status: String,
    error_message: Option<String>,
    created: i64,
    last_fetched: Option<i64>,
}

#[derive(FromRow)]
struct EpisodeRow {
    id: i64,
    channel_id: i64,
    title: String,
    stream_url: String,
    description: Option<String>,
    duration: Option<String>,
    status: String,
    publish_date: i64,
    error_message: Option<String>,
    created: i64,
    size: Option<i64>,
    content_type: Option<String>,
    cover_art: Option<String>,
    genre: Option<String>,
    year: Option<i32>,
}

fn from_timestamp(column: &'static str, secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| StoreError::InvalidColumn {
        column,
        value: secs.to_string(),
    })
}

/// Drop sub-second precision so in-memory values match what is stored
fn truncate(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.timestamp(), 0).unwrap_or(dt)
}

impl TryFrom<ChannelRow> for Channel {
    type Error = StoreError;

    fn try_from(row: ChannelRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ChannelStatus>()
            .map_err(|e| StoreError::InvalidColumn {
                column: "podcast_channel.status",
                value: e.0,
            })?;

        Ok(Channel {
            id: row.id,
            url: row.url,
            title: row.title,
            description: row.description,
            cover_art: row.cover_art,
            status,
            error_message: row.error_message,
            created: from_timestamp("podcast_channel.created", row.created)?,
            last_fetched: row
                .last_fetched
                .map(|secs| from_timestamp("podcast_channel.last_fetched", secs))
                .transpose()?,
        })
    }
}

impl TryFrom<EpisodeRow> for Episode {
    type Error = StoreError;

    fn try_from(row: EpisodeRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<EpisodeStatus>()
            .map_err(|e| StoreError::InvalidColumn {
                column: "podcast_episode.status",
                value: e.0,
            })?;

        Ok(Episode {
            id: row.id,
            channel_id: row.channel_id,
            title: row.title,
            description: row.description,
            year: row.year,
            publish_date: from_timestamp("podcast_episode.publish_date", row.publish_date)?,
            stream_url: row.stream_url,
            size: row.size,
            content_type: row.content_type,
            duration: row.duration,
            genre: row.genre,
            cover_art: row.cover_art,
            status,
            error_message: row.error_message,
            created: from_timestamp("podcast_episode.created", row.created)?,
        })
    }
}

fn channels(rows: Vec<ChannelRow>) -> Result<Vec<Channel>, StoreError> {
    rows.into_iter().map(Channel::try_from).collect()
}

fn episodes(rows: Vec<EpisodeRow>) -> Result<Vec<Episode>, StoreError> {
    rows.into_iter().map(Episode::try_from).collect()
}

#[async_trait]
impl ChannelRepository for StoreTransaction {
    async fn find_channel_by_url(&mut self, url: &str) -> Result<Option<Channel>, StoreError> {
        let row: Option<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM podcast_channel WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Channel::try_from).transpose()
    }

    async fn find_channel(&mut self, id: i64) -> Result<Option<Channel>, StoreError> {
        let row: Option<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM podcast_channel WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Channel::try_from).transpose()
    }

    async fn create_channel(&mut self, channel: NewChannel) -> Result<Channel, StoreError> {
        let created = truncate(Utc::now());
        let status = ChannelStatus::New;

        let result = sqlx::query(
            "INSERT INTO podcast_channel (url, title, description, cover_art, status, created)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&channel.url)
        .bind(&channel.title)
        .bind(&channel.description)
        .bind(&channel.cover_art)
        .bind(status.as_str())
        .bind(created.timestamp())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if StoreError::is_unique_violation(&e) {
                StoreError::Conflict {
                    url: channel.url.clone(),
                }
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(Channel {
            id: result.last_insert_rowid(),
            url: channel.url,
            title: channel.title,
            description: channel.description,
            cover_art: channel.cover_art,
            status,
            error_message: None,
            created,
            last_fetched: None,
        })
    }

    async fn update_channel(&mut self, channel: &Channel) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE podcast_channel
             SET title = ?, description = ?, cover_art = ?, status = ?, error_message = ?,
                 last_fetched = ?
             WHERE id = ?",
        )
        .bind(&channel.title)
        .bind(&channel.description)
        .bind(&channel.cover_art)
        .bind(channel.status.as_str())
        .bind(&channel.error_message)
        .bind(channel.last_fetched.map(|dt| dt.timestamp()))
        .bind(channel.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_due_channels(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Channel>, StoreError> {
        let rows: Vec<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM podcast_channel
             WHERE status != ?
               AND (last_fetched IS NULL OR last_fetched <= ? OR status = ?)
             ORDER BY id"
        ))
        .bind(ChannelStatus::Deleted.as_str())
        .bind(cutoff.timestamp())
        .bind(ChannelStatus::Downloading.as_str())
        .fetch_all(&mut *self.tx)
        .await?;

        channels(rows)
    }

    async fn list_channels(&mut self) -> Result<Vec<Channel>, StoreError> {
        let rows: Vec<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM podcast_channel
             WHERE status != ?
             ORDER BY title COLLATE NOCASE, id"
        ))
        .bind(ChannelStatus::Deleted.as_str())
        .fetch_all(&mut *self.tx)
        .await?;

        channels(rows)
    }

    async fn episodes_of(&mut self, channel_id: i64) -> Result<Vec<Episode>, StoreError> {
        let rows: Vec<EpisodeRow> = sqlx::query_as(&format!(
            "SELECT {EPISODE_COLUMNS} FROM podcast_episode
             WHERE channel_id = ?
             ORDER BY publish_date DESC, id DESC"
        ))
        .bind(channel_id)
        .fetch_all(&mut *self.tx)
        .await?;

        episodes(rows)
    }

    async fn visible_episodes_of(&mut self, channel_id: i64) -> Result<Vec<Episode>, StoreError> {
        let rows: Vec<EpisodeRow> = sqlx::query_as(&format!(
            "SELECT {EPISODE_COLUMNS} FROM podcast_episode
             WHERE channel_id = ? AND status != ?
             ORDER BY publish_date DESC, id DESC"
        ))
        .bind(channel_id)
        .bind(EpisodeStatus::Deleted.as_str())
        .fetch_all(&mut *self.tx)
        .await?;

        episodes(rows)
    }

    async fn create_episode(
        &mut self,
        channel_id: i64,
        episode: NewEpisode,
    ) -> Result<Episode, StoreError> {
        let created = truncate(Utc::now());
        let publish_date = truncate(episode.publish_date);

        let result = sqlx::query(
            "INSERT INTO podcast_episode
                (channel_id, title, stream_url, description, duration, status, publish_date,
                 error_message, created, size, content_type, cover_art, genre, year)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(channel_id)
        .bind(&episode.title)
        .bind(&episode.stream_url)
        .bind(&episode.description)
        .bind(&episode.duration)
        .bind(episode.status.as_str())
        .bind(publish_date.timestamp())
        .bind(&episode.error_message)
        .bind(created.timestamp())
        .bind(episode.size)
        .bind(&episode.content_type)
        .bind(&episode.cover_art)
        .bind(&episode.genre)
        .bind(episode.year)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if StoreError::is_unique_violation(&e) {
                StoreError::DuplicateEpisode {
                    channel_id,
                    title: episode.title.clone(),
                }
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(Episode {
            id: result.last_insert_rowid(),
            channel_id,
            title: episode.title,
            description: episode.description,
            year: episode.year,
            publish_date,
            stream_url: episode.stream_url,
            size: episode.size,
            content_type: episode.content_type,
            duration: episode.duration,
            genre: episode.genre,
            cover_art: episode.cover_art,
            status: episode.status,
            error_message: episode.error_message,
            created,
        })
    }

    async fn find_episode(
        &mut self,
        channel_id: i64,
        title: &str,
        stream_url: &str,
    ) -> Result<Option<Episode>, StoreError> {
        let row: Option<EpisodeRow> = sqlx::query_as(&format!(
            "SELECT {EPISODE_COLUMNS} FROM podcast_episode
             WHERE channel_id = ? AND title = ? AND stream_url = ?"
        ))
        .bind(channel_id)
        .bind(title)
        .bind(stream_url)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Episode::try_from).transpose()
    }

    async fn find_episode_by_id(&mut self, id: i64) -> Result<Option<Episode>, StoreError> {
        let row: Option<EpisodeRow> = sqlx::query_as(&format!(
            "SELECT {EPISODE_COLUMNS} FROM podcast_episode WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Episode::try_from).transpose()
    }

    async fn delete_episodes(&mut self, ids: &[i64]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM podcast_episode WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn soft_delete_channel(&mut self, id: i64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE podcast_channel SET status = ?, error_message = NULL WHERE id = ?")
                .bind(ChannelStatus::Deleted.as_str())
                .bind(id)
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE podcast_episode SET status = ? WHERE channel_id = ?")
            .bind(EpisodeStatus::Deleted.as_str())
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(true)
    }

    async fn soft_delete_episode(&mut self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE podcast_episode SET status = ? WHERE id = ?")
            .bind(EpisodeStatus::Deleted.as_str())
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
