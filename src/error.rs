// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when fetching or validating a podcast feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("unexpected url: {0}")]
    InvalidUrl(String),

    /// Network-level failure, passed through as reqwest reported it
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("http:{status} while fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Malformed feed document: {0}")]
    Malformed(#[from] rss::Error),

    #[error("Failed to read feed file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("title missing")]
    MissingTitle,
}

impl FeedError {
    /// True for failures caused by the caller's input rather than the remote side
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidUrl(_) | Self::MissingTitle)
    }
}

impl From<url::ParseError> for FeedError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

/// Errors raised by the channel store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("A channel with url {url} already exists")]
    Conflict { url: String },

    #[error("Episode '{title}' already exists in channel {channel_id}")]
    DuplicateEpisode { channel_id: i64, title: String },

    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {column} value in stored row: {value}")]
    InvalidColumn { column: &'static str, value: String },
}

impl StoreError {
    /// True when sqlx reports a UNIQUE constraint violation
    pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
        matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

/// Errors for a single channel synchronization or a worker run
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Channel {0} disappeared during synchronization")]
    ChannelVanished(i64),

    #[error("A synchronization run is already in progress")]
    RunInProgress,
}

/// Errors returned to the request layer
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Channel {channel_id} was created but its first refresh failed: {message}")]
    RefreshFailed { channel_id: i64, message: String },
}
