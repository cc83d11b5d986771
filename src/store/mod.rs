// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod models;
mod queries;
mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

pub use models::{
    Channel, Episode, MISSING_MEDIA_MESSAGE, MISSING_STREAM_URL, NewChannel, NewEpisode,
};
pub use schema::{Database, StoreTransaction};

/// Storage operations needed by synchronization and the request layer.
///
/// Implementations are expected to be scoped to a single unit of work, so
/// every method takes `&mut self`.
#[async_trait]
pub trait ChannelRepository: Send {
    async fn find_channel_by_url(&mut self, url: &str) -> Result<Option<Channel>, StoreError>;

    async fn find_channel(&mut self, id: i64) -> Result<Option<Channel>, StoreError>;

    /// Insert a channel; an existing url yields [`StoreError::Conflict`]
    async fn create_channel(&mut self, channel: NewChannel) -> Result<Channel, StoreError>;

    /// Persist the mutable fields of a channel (everything but id, url and created)
    async fn update_channel(&mut self, channel: &Channel) -> Result<(), StoreError>;

    /// Non-deleted channels never fetched, fetched at or before `cutoff`,
    /// or left in `downloading` by an interrupted run
    async fn list_due_channels(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Channel>, StoreError>;

    /// Non-deleted channels ordered by title
    async fn list_channels(&mut self) -> Result<Vec<Channel>, StoreError>;

    /// All episodes of a channel, newest publish date first
    async fn episodes_of(&mut self, channel_id: i64) -> Result<Vec<Episode>, StoreError>;

    /// Like [`ChannelRepository::episodes_of`] without soft-deleted episodes
    async fn visible_episodes_of(&mut self, channel_id: i64) -> Result<Vec<Episode>, StoreError>;

    async fn create_episode(
        &mut self,
        channel_id: i64,
        episode: NewEpisode,
    ) -> Result<Episode, StoreError>;

    async fn find_episode(
        &mut self,
        channel_id: i64,
        title: &str,
        stream_url: &str,
    ) -> Result<Option<Episode>, StoreError>;

    async fn find_episode_by_id(&mut self, id: i64) -> Result<Option<Episode>, StoreError>;

    /// Physically remove episodes, returning how many rows went away
    async fn delete_episodes(&mut self, ids: &[i64]) -> Result<u64, StoreError>;

    /// Mark a channel and all of its episodes deleted; false if no such channel
    async fn soft_delete_channel(&mut self, id: i64) -> Result<bool, StoreError>;

    /// Mark one episode deleted; false if no such episode
    async fn soft_delete_episode(&mut self, id: i64) -> Result<bool, StoreError>;
}
