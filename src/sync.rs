// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Datelike, Utc};

use crate::config::PodcastConfig;
use crate::error::StoreError;
use crate::feed::{FeedItem, ParsedFeed};
use crate::status::EpisodeStatus;
use crate::store::{
    Channel, ChannelRepository, MISSING_MEDIA_MESSAGE, MISSING_STREAM_URL, NewEpisode,
};

const UNTITLED_EPISODE: &str = "Untitled Episode";

/// What a single refresh did to a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Episodes inserted
    pub created: usize,
    /// Items at or before the channel's skip boundary
    pub skipped: usize,
    /// Items already stored under the same title and stream url
    pub duplicates: usize,
    /// New items without an audio or video link (stored with error status)
    pub missing_media: usize,
    /// Episodes hard-deleted by the retention limit
    pub pruned: u64,
}

/// Reconciles parsed feeds into stored episodes
#[derive(Debug, Clone)]
pub struct ChannelSynchronizer {
    config: PodcastConfig,
}

impl ChannelSynchronizer {
    pub fn new(config: PodcastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PodcastConfig {
        &self.config
    }

    /// Bring a channel's episodes in line with `feed`.
    ///
    /// Safe to repeat: items at or before `last_fetched` are skipped, and an
    /// item whose (title, stream url) is already stored is not inserted again.
    /// After reconciling, only the newest `episode_retention_count` episodes
    /// are kept and `last_fetched` moves to now. The caller owns the
    /// transaction `repo` runs in.
    pub async fn refresh<R: ChannelRepository + ?Sized>(
        &self,
        repo: &mut R,
        channel: &mut Channel,
        feed: &ParsedFeed,
    ) -> Result<RefreshSummary, StoreError> {
        let started = Utc::now();
        let mut summary = RefreshSummary::default();

        let enrichment = Enrichment {
            cover_art: feed.image.as_ref().map(|image| image.url.clone()),
            genre: (!feed.tags.is_empty()).then(|| feed.tags.join(",")),
        };

        for item in &feed.items {
            let published = item.published_utc();
            let timestamp = published.unwrap_or(started);

            if channel.last_fetched.is_some_and(|boundary| boundary >= timestamp) {
                summary.skipped += 1;
                continue;
            }

            let candidate = build_episode(item, timestamp, published.is_some(), &enrichment);

            if repo
                .find_episode(channel.id, &candidate.title, &candidate.stream_url)
                .await?
                .is_some()
            {
                summary.duplicates += 1;
                continue;
            }

            if candidate.status == EpisodeStatus::Error {
                tracing::debug!(
                    channel_id = channel.id,
                    title = %candidate.title,
                    "Feed item has no media link"
                );
                summary.missing_media += 1;
            }

            repo.create_episode(channel.id, candidate).await?;
            summary.created += 1;
        }

        summary.pruned = self.enforce_retention(repo, channel.id).await?;

        channel.last_fetched = DateTime::from_timestamp(Utc::now().timestamp(), 0);
        repo.update_channel(channel).await?;

        tracing::info!(
            channel_id = channel.id,
            url = %channel.url,
            created = summary.created,
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            missing_media = summary.missing_media,
            pruned = summary.pruned,
            "Channel refreshed"
        );

        Ok(summary)
    }

    /// Hard-delete everything past the newest N episodes, re-ranking from the store each time
    async fn enforce_retention<R: ChannelRepository + ?Sized>(
        &self,
        repo: &mut R,
        channel_id: i64,
    ) -> Result<u64, StoreError> {
        let limit = self.config.episode_retention_count;
        let episodes = repo.episodes_of(channel_id).await?;
        if episodes.len() <= limit {
            return Ok(0);
        }

        let expired: Vec<i64> = episodes[limit..].iter().map(|e| e.id).collect();
        repo.delete_episodes(&expired).await
    }
}

struct Enrichment {
    cover_art: Option<String>,
    genre: Option<String>,
}

fn build_episode(
    item: &FeedItem,
    publish_date: DateTime<Utc>,
    has_date: bool,
    enrichment: &Enrichment,
) -> NewEpisode {
    let mut episode = NewEpisode {
        title: item
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED_EPISODE.to_string()),
        description: item.description.clone(),
        year: has_date.then(|| publish_date.year()),
        publish_date,
        stream_url: MISSING_STREAM_URL.to_string(),
        size: None,
        content_type: None,
        duration: item.duration.clone(),
        genre: enrichment.genre.clone(),
        cover_art: enrichment.cover_art.clone(),
        status: EpisodeStatus::Skipped,
        error_message: None,
    };

    match item.media_link() {
        Some(link) => {
            episode.stream_url = link.href.clone();
            episode.size = link.length;
            episode.content_type = Some(link.mime_type.clone());
        }
        None => {
            episode.status = EpisodeStatus::Error;
            episode.error_message = Some(MISSING_MEDIA_MESSAGE.to_string());
        }
    }

    episode
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use tempfile::{TempDir, tempdir};

    use crate::feed::{FeedImage, FeedLink};
    use crate::store::{Database, NewChannel};

    async fn setup() -> (TempDir, Database, Channel) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let channel = tx
            .create_channel(NewChannel {
                url: "https://example.com/feed.xml".to_string(),
                title: Some("Test Podcast".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        (dir, db, channel)
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 12, 0, 0).unwrap()
    }

    fn item(title: &str, d: u32) -> FeedItem {
        FeedItem {
            title: Some(title.to_string()),
            description: Some(format!("{title} description")),
            published: Some(day(d).fixed_offset()),
            links: vec![
                FeedLink {
                    href: format!("https://example.com/{title}"),
                    mime_type: "text/html".to_string(),
                    length: None,
                },
                FeedLink {
                    href: format!("https://example.com/{title}.mp3"),
                    mime_type: "audio/mpeg".to_string(),
                    length: Some(4096),
                },
            ],
            duration: None,
        }
    }

    fn feed(items: Vec<FeedItem>) -> ParsedFeed {
        ParsedFeed {
            title: "Test Podcast".to_string(),
            description: None,
            image: None,
            tags: Vec::new(),
            items,
        }
    }

    fn synchronizer(retention: usize) -> ChannelSynchronizer {
        ChannelSynchronizer::new(PodcastConfig {
            episode_retention_count: retention,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn refresh_creates_episodes_and_sets_boundary() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();

        let summary = synchronizer(10)
            .refresh(&mut tx, &mut channel, &feed(vec![item("a", 1), item("b", 2)]))
            .await
            .unwrap();

        assert_eq!(summary.created, 2);
        assert!(channel.last_fetched.is_some());

        let stored = tx.find_channel(channel.id).await.unwrap().unwrap();
        assert_eq!(stored.last_fetched, channel.last_fetched);

        let episodes = tx.episodes_of(channel.id).await.unwrap();
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].title, "b");
        assert_eq!(episodes[0].stream_url, "https://example.com/b.mp3");
        assert_eq!(episodes[0].size, Some(4096));
        assert_eq!(episodes[0].content_type.as_deref(), Some("audio/mpeg"));
        assert_eq!(episodes[0].year, Some(2024));
        assert_eq!(episodes[0].status, EpisodeStatus::Skipped);
    }

    #[tokio::test]
    async fn second_refresh_with_same_feed_creates_nothing() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let sync = synchronizer(10);
        let feed = feed(vec![item("a", 1), item("b", 2), item("c", 3)]);

        sync.refresh(&mut tx, &mut channel, &feed).await.unwrap();
        let second = sync.refresh(&mut tx, &mut channel, &feed).await.unwrap();

        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(tx.episodes_of(channel.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn dedup_guards_when_boundary_is_unset() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let sync = synchronizer(10);
        let feed = feed(vec![item("a", 1), item("b", 2)]);

        sync.refresh(&mut tx, &mut channel, &feed).await.unwrap();
        channel.last_fetched = None;
        let second = sync.refresh(&mut tx, &mut channel, &feed).await.unwrap();

        assert_eq!(second.created, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(tx.episodes_of(channel.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn items_at_or_before_boundary_are_ignored() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();
        channel.last_fetched = Some(day(2));

        let summary = synchronizer(10)
            .refresh(
                &mut tx,
                &mut channel,
                &feed(vec![item("old", 1), item("edge", 2), item("new", 3)]),
            )
            .await
            .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 2);
        let episodes = tx.episodes_of(channel.id).await.unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].title, "new");
    }

    #[tokio::test]
    async fn retention_keeps_the_newest_episodes() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();

        let summary = synchronizer(2)
            .refresh(
                &mut tx,
                &mut channel,
                &feed(vec![item("middle", 2), item("newest", 3), item("oldest", 1)]),
            )
            .await
            .unwrap();

        assert_eq!(summary.created, 3);
        assert_eq!(summary.pruned, 1);
        let titles: Vec<String> = tx
            .episodes_of(channel.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["newest", "middle"]);
    }

    #[tokio::test]
    async fn retention_reranks_against_stored_episodes() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let sync = synchronizer(2);

        sync.refresh(&mut tx, &mut channel, &feed(vec![item("d5", 5), item("d6", 6)]))
            .await
            .unwrap();

        // A late item published before everything stored is pruned straight away
        channel.last_fetched = None;
        let summary = sync
            .refresh(&mut tx, &mut channel, &feed(vec![item("d1", 1)]))
            .await
            .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.pruned, 1);
        let titles: Vec<String> = tx
            .episodes_of(channel.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["d6", "d5"]);
    }

    #[tokio::test]
    async fn zero_retention_keeps_nothing() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();

        let summary = synchronizer(0)
            .refresh(&mut tx, &mut channel, &feed(vec![item("a", 1), item("b", 2)]))
            .await
            .unwrap();

        assert_eq!(summary.pruned, 2);
        assert!(tx.episodes_of(channel.id).await.unwrap().is_empty());
        assert!(channel.last_fetched.is_some());
    }

    #[tokio::test]
    async fn item_without_media_is_stored_as_error() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let mut no_media = item("text only", 1);
        no_media.links.retain(|l| !l.is_media());

        let summary = synchronizer(10)
            .refresh(&mut tx, &mut channel, &feed(vec![no_media, item("ok", 2)]))
            .await
            .unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.missing_media, 1);
        assert!(channel.last_fetched.is_some());

        let episode = tx
            .find_episode(channel.id, "text only", MISSING_STREAM_URL)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(episode.status, EpisodeStatus::Error);
        assert_eq!(episode.error_message.as_deref(), Some(MISSING_MEDIA_MESSAGE));
        assert!(!episode.has_media());
    }

    #[tokio::test]
    async fn video_links_count_as_media() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let mut video = item("clip", 1);
        video.links[1].mime_type = "video/mp4".to_string();

        synchronizer(10)
            .refresh(&mut tx, &mut channel, &feed(vec![video]))
            .await
            .unwrap();

        let episodes = tx.episodes_of(channel.id).await.unwrap();
        assert_eq!(episodes[0].content_type.as_deref(), Some("video/mp4"));
        assert_eq!(episodes[0].status, EpisodeStatus::Skipped);
    }

    #[tokio::test]
    async fn feed_level_enrichment_is_applied() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let mut with_duration = item("a", 1);
        with_duration.duration = Some("01:02:03".to_string());
        let mut feed = feed(vec![with_duration]);
        feed.image = Some(FeedImage {
            url: "https://example.com/art.jpg".to_string(),
            title: Some("Art".to_string()),
        });
        feed.tags = vec!["News".to_string(), "Politics".to_string()];

        synchronizer(10)
            .refresh(&mut tx, &mut channel, &feed)
            .await
            .unwrap();

        let episode = &tx.episodes_of(channel.id).await.unwrap()[0];
        assert_eq!(episode.duration.as_deref(), Some("01:02:03"));
        assert_eq!(episode.cover_art.as_deref(), Some("https://example.com/art.jpg"));
        assert_eq!(episode.genre.as_deref(), Some("News,Politics"));
    }

    #[tokio::test]
    async fn undated_and_untitled_items_get_defaults() {
        let (_dir, db, mut channel) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let mut undated = item("x", 1);
        undated.title = None;
        undated.published = None;
        let feed = feed(vec![undated]);
        let sync = synchronizer(10);

        let first = sync.refresh(&mut tx, &mut channel, &feed).await.unwrap();
        let second = sync.refresh(&mut tx, &mut channel, &feed).await.unwrap();

        assert_eq!(first.created, 1);
        assert_eq!(second.created, 0);
        let episodes = tx.episodes_of(channel.id).await.unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].title, UNTITLED_EPISODE);
        assert!(episodes[0].year.is_none());
    }
}
