// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use serde::Serialize;

use crate::config::PodcastConfig;
use crate::error::{ServiceError, StoreError};
use crate::feed::fetch_feed;
use crate::http::HttpClient;
use crate::progress::SharedProgressReporter;
use crate::store::{Channel, ChannelRepository, Database, Episode, NewChannel};
use crate::sync::{ChannelSynchronizer, RefreshSummary};
use crate::worker::{RunMode, SyncStats, SyncWorker};

/// A channel as handed to the request layer
#[derive(Debug, Clone, Serialize)]
pub struct ChannelListing {
    #[serde(flatten)]
    pub channel: Channel,
    /// Non-deleted episodes
    pub episode_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episodes: Option<Vec<Episode>>,
}

/// Result of subscribing to a feed url
#[derive(Debug, Clone)]
pub enum CreateChannelOutcome {
    Created {
        channel: Channel,
        summary: RefreshSummary,
    },
    /// The url is already subscribed; nothing was written
    AlreadyExists,
}

/// Operations exposed to the request layer.
///
/// Owns the worker so on-demand refreshes and scheduled runs share one run lock.
#[derive(Clone)]
pub struct PodcastService {
    db: Database,
    client: Arc<dyn HttpClient>,
    synchronizer: ChannelSynchronizer,
    worker: SyncWorker,
}

impl PodcastService {
    pub fn new(db: Database, client: Arc<dyn HttpClient>, config: PodcastConfig) -> Self {
        let worker = SyncWorker::new(db.clone(), client.clone(), config.clone());
        Self {
            db,
            client,
            synchronizer: ChannelSynchronizer::new(config),
            worker,
        }
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.worker = self.worker.with_reporter(reporter);
        self
    }

    pub fn worker(&self) -> &SyncWorker {
        &self.worker
    }

    /// Non-deleted channels, optionally narrowed to one id and with their episodes
    pub async fn list_channels(
        &self,
        include_episodes: bool,
        id: Option<i64>,
    ) -> Result<Vec<ChannelListing>, ServiceError> {
        let mut tx = self.db.begin().await?;

        let channels = match id {
            Some(id) => match tx.find_channel(id).await? {
                Some(channel) if !channel.status.is_deleted() => vec![channel],
                _ => return Err(ServiceError::NotFound { entity: "Channel", id }),
            },
            None => tx.list_channels().await?,
        };

        let mut listings = Vec::with_capacity(channels.len());
        for channel in channels {
            let episodes = tx.visible_episodes_of(channel.id).await?;
            listings.push(ChannelListing {
                episode_count: episodes.len(),
                episodes: include_episodes.then_some(episodes),
                channel,
            });
        }

        tx.commit().await?;
        Ok(listings)
    }

    /// Subscribe to `url` and materialize its current episodes.
    ///
    /// The feed is fetched and validated before anything is written, so an
    /// unreachable or invalid feed leaves the store untouched.
    pub async fn create_channel(&self, url: &str) -> Result<CreateChannelOutcome, ServiceError> {
        let url = url.trim();

        {
            let mut tx = self.db.begin().await?;
            let existing = tx.find_channel_by_url(url).await?;
            tx.commit().await?;
            if existing.is_some() {
                tracing::debug!(%url, "Channel already subscribed");
                return Ok(CreateChannelOutcome::AlreadyExists);
            }
        }

        let feed = fetch_feed(self.client.as_ref(), url).await?;

        let mut tx = self.db.begin().await?;
        let mut channel = match tx
            .create_channel(NewChannel {
                url: url.to_string(),
                title: Some(feed.title.clone()),
                description: feed.description.clone(),
                cover_art: feed.image.as_ref().map(|image| image.url.clone()),
            })
            .await
        {
            Ok(channel) => channel,
            Err(StoreError::Conflict { .. }) => {
                // Lost a race with a concurrent create
                tx.rollback().await?;
                return Ok(CreateChannelOutcome::AlreadyExists);
            }
            Err(e) => return Err(e.into()),
        };

        match self.synchronizer.refresh(&mut tx, &mut channel, &feed).await {
            Ok(summary) => {
                tx.commit().await?;
                tracing::info!(
                    channel_id = channel.id,
                    %url,
                    episodes = summary.created,
                    "Channel created"
                );
                Ok(CreateChannelOutcome::Created { channel, summary })
            }
            Err(e) => {
                let message = e.to_string();
                channel.set_error(message.clone());
                tx.update_channel(&channel).await?;
                tx.commit().await?;
                tracing::warn!(channel_id = channel.id, error = %message, "Initial refresh failed");
                Err(ServiceError::RefreshFailed {
                    channel_id: channel.id,
                    message,
                })
            }
        }
    }

    /// Soft-delete a channel together with its episodes
    pub async fn delete_channel(&self, id: i64) -> Result<(), ServiceError> {
        let mut tx = self.db.begin().await?;
        if !tx.soft_delete_channel(id).await? {
            tx.rollback().await?;
            return Err(ServiceError::NotFound { entity: "Channel", id });
        }
        tx.commit().await?;
        tracing::info!(channel_id = id, "Channel deleted");
        Ok(())
    }

    pub async fn delete_episode(&self, id: i64) -> Result<(), ServiceError> {
        let mut tx = self.db.begin().await?;
        if !tx.soft_delete_episode(id).await? {
            tx.rollback().await?;
            return Err(ServiceError::NotFound { entity: "Episode", id });
        }
        tx.commit().await?;
        tracing::info!(episode_id = id, "Episode deleted");
        Ok(())
    }

    pub fn worker_status(&self) -> SyncStats {
        self.worker.stats()
    }

    /// Run the worker once on the caller's task
    pub async fn refresh(&self, mode: RunMode) -> Result<SyncStats, ServiceError> {
        Ok(self.worker.run(mode).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::{TempDir, tempdir};

    use crate::error::{FeedError, SyncError};
    use crate::http::HttpResponse;
    use crate::status::{ChannelStatus, EpisodeStatus, RunState};

    #[derive(Default)]
    struct MockClient {
        routes: HashMap<String, (u16, String)>,
        requests: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn with(mut self, url: &str, status: u16, body: &str) -> Self {
            self.routes
                .insert(url.to_string(), (status, body.to_string()));
            self
        }
    }

    #[async_trait]
    impl HttpClient for MockClient {
        async fn get(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
            self.requests.lock().unwrap().push(url.to_string());
            let (status, body) = self
                .routes
                .get(url)
                .cloned()
                .unwrap_or((404, String::new()));
            Ok(HttpResponse {
                status,
                body: Bytes::from(body),
            })
        }
    }

    const FEED_URL: &str = "https://example.com/feed.xml";

    const THREE_ITEMS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Three Items</title>
    <description>A feed</description>
    <image>
      <url>https://example.com/cover.png</url>
      <title>Three Items</title>
      <link>https://example.com</link>
    </image>
    <item>
      <title>Oldest</title>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/1.mp3" length="1" type="audio/mpeg"/>
    </item>
    <item>
      <title>Middle</title>
      <pubDate>Tue, 02 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/2.mp3" length="1" type="audio/mpeg"/>
    </item>
    <item>
      <title>Newest</title>
      <pubDate>Wed, 03 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/3.mp3" length="1" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    async fn service_with(client: MockClient, retention: usize) -> (TempDir, PodcastService) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("podsync.db")).await.unwrap();
        let config = PodcastConfig {
            episode_retention_count: retention,
            ..PodcastConfig::default()
        };
        (dir, PodcastService::new(db, Arc::new(client), config))
    }

    #[tokio::test]
    async fn create_keeps_newest_episodes_within_retention() {
        let client = MockClient::default().with(FEED_URL, 200, THREE_ITEMS);
        let (_dir, service) = service_with(client, 2).await;

        let outcome = service.create_channel(FEED_URL).await.unwrap();
        let CreateChannelOutcome::Created { channel, summary } = outcome else {
            panic!("expected a new channel");
        };

        assert_eq!(channel.title.as_deref(), Some("Three Items"));
        assert_eq!(channel.cover_art.as_deref(), Some("https://example.com/cover.png"));
        assert_eq!(channel.status, ChannelStatus::New);
        assert!(channel.last_fetched.is_some());
        assert_eq!(summary.created, 3);
        assert_eq!(summary.pruned, 1);

        let listings = service.list_channels(true, None).await.unwrap();
        assert_eq!(listings.len(), 1);
        let episodes = listings[0].episodes.as_ref().unwrap();
        let titles: Vec<_> = episodes.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Newest", "Middle"]);
        assert!(episodes.iter().all(|e| e.status == EpisodeStatus::Skipped));
    }

    #[tokio::test]
    async fn create_with_http_error_persists_nothing() {
        let (_dir, service) = service_with(MockClient::default(), 10).await;

        let err = service.create_channel(FEED_URL).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Feed(FeedError::HttpStatus { status: 404, .. })
        ));
        assert!(service.list_channels(false, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_invalid_url_without_fetching() {
        let client = MockClient::default();
        let (_dir, service) = service_with(client, 10).await;

        let err = service.create_channel("not a url").await.unwrap_err();
        let ServiceError::Feed(feed_err) = err else {
            panic!("expected a feed error");
        };
        assert!(feed_err.is_validation());
    }

    #[tokio::test]
    async fn create_rejects_feed_without_title() {
        let body = r#"<?xml version="1.0"?><rss version="2.0"><channel><title></title><description>x</description></channel></rss>"#;
        let client = MockClient::default().with(FEED_URL, 200, body);
        let (_dir, service) = service_with(client, 10).await;

        let err = service.create_channel(FEED_URL).await.unwrap_err();
        assert!(matches!(err, ServiceError::Feed(FeedError::MissingTitle)));
        assert!(service.list_channels(false, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_create_for_same_url_already_exists() {
        let client = MockClient::default().with(FEED_URL, 200, THREE_ITEMS);
        let (_dir, service) = service_with(client, 10).await;

        assert!(matches!(
            service.create_channel(FEED_URL).await.unwrap(),
            CreateChannelOutcome::Created { .. }
        ));
        assert!(matches!(
            service.create_channel(FEED_URL).await.unwrap(),
            CreateChannelOutcome::AlreadyExists
        ));

        let listings = service.list_channels(false, None).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].episode_count, 3);
        assert!(listings[0].episodes.is_none());
    }

    #[tokio::test]
    async fn deleted_channel_disappears_from_listings() {
        let client = MockClient::default().with(FEED_URL, 200, THREE_ITEMS);
        let (_dir, service) = service_with(client, 10).await;

        let CreateChannelOutcome::Created { channel, .. } =
            service.create_channel(FEED_URL).await.unwrap()
        else {
            panic!("expected a new channel");
        };

        service.delete_channel(channel.id).await.unwrap();

        assert!(service.list_channels(false, None).await.unwrap().is_empty());
        assert!(matches!(
            service.list_channels(false, Some(channel.id)).await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn deleted_episode_is_hidden_from_listing() {
        let client = MockClient::default().with(FEED_URL, 200, THREE_ITEMS);
        let (_dir, service) = service_with(client, 10).await;
        service.create_channel(FEED_URL).await.unwrap();

        let listing = service.list_channels(true, None).await.unwrap().remove(0);
        let victim = listing.episodes.unwrap()[0].id;

        service.delete_episode(victim).await.unwrap();

        let listing = service
            .list_channels(true, Some(listing.channel.id))
            .await
            .unwrap()
            .remove(0);
        assert_eq!(listing.episode_count, 2);
        assert!(listing.episodes.unwrap().iter().all(|e| e.id != victim));
    }

    #[tokio::test]
    async fn deleting_missing_entities_is_not_found() {
        let (_dir, service) = service_with(MockClient::default(), 10).await;

        assert!(matches!(
            service.delete_channel(42).await,
            Err(ServiceError::NotFound { entity: "Channel", id: 42 })
        ));
        assert!(matches!(
            service.delete_episode(7).await,
            Err(ServiceError::NotFound { entity: "Episode", id: 7 })
        ));
    }

    #[tokio::test]
    async fn refresh_runs_the_worker_and_updates_status() {
        let client = MockClient::default().with(FEED_URL, 200, THREE_ITEMS);
        let (_dir, service) = service_with(client, 10).await;
        service.create_channel(FEED_URL).await.unwrap();

        assert_eq!(service.worker_status().state, RunState::New);

        let stats = service.refresh(RunMode::Forced).await.unwrap();
        assert_eq!(stats.channels, 1);
        assert_eq!(stats.episodes, 0);
        assert_eq!(service.worker_status().state, RunState::Completed);

        let listing = service.list_channels(false, None).await.unwrap().remove(0);
        assert_eq!(listing.channel.status, ChannelStatus::Completed);
    }

    #[tokio::test]
    async fn refresh_while_worker_runs_is_rejected() {
        let (_dir, service) = service_with(MockClient::default(), 10).await;

        let handle = service.worker().spawn(RunMode::Forced).unwrap();
        assert!(matches!(
            service.refresh(RunMode::Forced).await,
            Err(ServiceError::Sync(SyncError::RunInProgress))
        ));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn listing_serializes_channel_fields_flat() {
        let client = MockClient::default().with(FEED_URL, 200, THREE_ITEMS);
        let (_dir, service) = service_with(client, 10).await;
        service.create_channel(FEED_URL).await.unwrap();

        let listings = service.list_channels(false, None).await.unwrap();
        let json = serde_json::to_value(&listings).unwrap();

        assert_eq!(json[0]["url"], FEED_URL);
        assert_eq!(json[0]["status"], "new");
        assert_eq!(json[0]["episode_count"], 3);
        assert!(json[0].get("episodes").is_none());
    }

    #[tokio::test]
    async fn create_with_failing_refresh_keeps_channel_in_error() {
        let client = MockClient::default().with(FEED_URL, 200, THREE_ITEMS);
        let (_dir, service) = service_with(client, 10).await;
        sqlx::query(
            "CREATE TRIGGER reject_episode BEFORE INSERT ON podcast_episode
             WHEN NEW.title = 'Middle'
             BEGIN SELECT RAISE(ABORT, 'episode rejected'); END",
        )
        .execute(service.db.pool())
        .await
        .unwrap();

        let err = service.create_channel(FEED_URL).await.unwrap_err();
        let ServiceError::RefreshFailed { channel_id, message } = err else {
            panic!("expected a failed refresh");
        };
        assert!(message.contains("episode rejected"));

        let listing = service
            .list_channels(true, Some(channel_id))
            .await
            .unwrap()
            .remove(0);
        assert_eq!(listing.channel.status, ChannelStatus::Error);
        assert_eq!(listing.channel.error_message.as_deref(), Some(message.as_str()));
        assert!(listing.channel.last_fetched.is_none());

        let titles: Vec<_> = listing
            .episodes
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["Oldest".to_string()]);
    }
}
