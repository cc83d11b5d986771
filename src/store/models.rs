// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::status::{ChannelStatus, EpisodeStatus};

/// Stream url stored for episodes whose feed entry had no media link
pub const MISSING_STREAM_URL: &str = "::missing::";

/// Error message stored alongside [`MISSING_STREAM_URL`]
pub const MISSING_MEDIA_MESSAGE: &str = "Media link not found in episode xml";

/// A subscribed podcast feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub cover_art: Option<String>,
    pub status: ChannelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created: DateTime<Utc>,
    pub last_fetched: Option<DateTime<Utc>>,
}

impl Channel {
    /// Record a failed synchronization attempt
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = ChannelStatus::Error;
        self.error_message = Some(message.into());
    }

    /// Move to a non-error status, dropping any stale error message
    pub fn set_status(&mut self, status: ChannelStatus) {
        self.status = status;
        if status != ChannelStatus::Error {
            self.error_message = None;
        }
    }
}

/// Fields for a channel about to be inserted
#[derive(Debug, Clone, Default)]
pub struct NewChannel {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub cover_art: Option<String>,
}

/// One episode materialized from a feed item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub id: i64,
    pub channel_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub publish_date: DateTime<Utc>,
    pub stream_url: String,
    pub size: Option<i64>,
    pub content_type: Option<String>,
    pub duration: Option<String>,
    pub genre: Option<String>,
    pub cover_art: Option<String>,
    pub status: EpisodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created: DateTime<Utc>,
}

impl Episode {
    pub fn has_media(&self) -> bool {
        self.stream_url != MISSING_STREAM_URL
    }
}

/// Fields for an episode about to be inserted
#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub title: String,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub publish_date: DateTime<Utc>,
    pub stream_url: String,
    pub size: Option<i64>,
    pub content_type: Option<String>,
    pub duration: Option<String>,
    pub genre: Option<String>,
    pub cover_art: Option<String>,
    pub status: EpisodeStatus,
    pub error_message: Option<String>,
}
