// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::PodcastConfig;
use crate::error::SyncError;
use crate::feed::fetch_feed;
use crate::http::HttpClient;
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};
use crate::status::{ChannelStatus, RunState};
use crate::store::{Channel, ChannelRepository, Database};
use crate::sync::{ChannelSynchronizer, RefreshSummary};

/// Which channels a run considers due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Channels never fetched, stale past the check interval, or stuck downloading
    Scheduled,
    /// Every channel that is not deleted
    Forced,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => f.write_str("scheduled"),
            Self::Forced => f.write_str("forced"),
        }
    }
}

/// A channel that failed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub channel_id: i64,
    pub url: String,
    pub message: String,
}

/// Aggregate of one worker run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Channels processed, successful or not
    pub channels: usize,
    /// Episodes created
    pub episodes: usize,
    pub errors: Vec<SyncFailure>,
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Background synchronizer for all subscribed channels.
///
/// Cloning is cheap and every clone shares the run lock and statistics, so at
/// most one run is active across all of them.
#[derive(Clone)]
pub struct SyncWorker {
    db: Database,
    client: Arc<dyn HttpClient>,
    synchronizer: ChannelSynchronizer,
    reporter: SharedProgressReporter,
    stats: Arc<RwLock<SyncStats>>,
    run_lock: Arc<Mutex<()>>,
}

impl SyncWorker {
    pub fn new(db: Database, client: Arc<dyn HttpClient>, config: PodcastConfig) -> Self {
        Self {
            db,
            client,
            synchronizer: ChannelSynchronizer::new(config),
            reporter: NoopReporter::shared(),
            stats: Arc::new(RwLock::new(SyncStats::default())),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Snapshot of the current or most recent run
    pub fn stats(&self) -> SyncStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one batch to completion on the current task
    pub async fn run(&self, mode: RunMode) -> Result<SyncStats, SyncError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| SyncError::RunInProgress)?;
        self.execute(mode).await
    }

    /// Start one batch on a background task.
    ///
    /// The run lock is taken before this returns, so a second call fails with
    /// [`SyncError::RunInProgress`] until the spawned run finishes.
    pub fn spawn(&self, mode: RunMode) -> Result<JoinHandle<Result<SyncStats, SyncError>>, SyncError> {
        let guard = self
            .run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| SyncError::RunInProgress)?;
        let worker = self.clone();

        Ok(tokio::spawn(async move {
            let _guard = guard;
            worker.execute(mode).await
        }))
    }

    /// Trigger a scheduled run every `every` until `shutdown` resolves
    pub async fn run_scheduled<F>(&self, every: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(every_secs = every.as_secs(), "Sync scheduler started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Sync scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.run(RunMode::Scheduled).await {
                        Ok(stats) => tracing::info!(
                            channels = stats.channels,
                            episodes = stats.episodes,
                            errors = stats.errors.len(),
                            "Scheduled run finished"
                        ),
                        Err(SyncError::RunInProgress) => {
                            tracing::debug!("Skipping scheduled run, another run is active");
                        }
                        Err(e) => tracing::error!(error = %e, "Scheduled run failed"),
                    }
                }
            }
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut SyncStats)) {
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }

    async fn execute(&self, mode: RunMode) -> Result<SyncStats, SyncError> {
        self.update_stats(|stats| {
            *stats = SyncStats {
                state: RunState::Downloading,
                started_at: Some(Utc::now()),
                ..SyncStats::default()
            };
        });

        let channels = match self.due_channels(mode).await {
            Ok(channels) => channels,
            Err(e) => {
                self.update_stats(|stats| {
                    stats.state = RunState::Completed;
                    stats.finished_at = Some(Utc::now());
                });
                return Err(e);
            }
        };

        let total = channels.len();
        tracing::info!(%mode, due = total, "Sync run started");
        self.reporter.report(ProgressEvent::RunStarted {
            mode,
            due_channels: total,
        });

        for (index, channel) in channels.iter().enumerate() {
            self.reporter.report(ProgressEvent::ChannelStarted {
                channel_id: channel.id,
                url: channel.url.clone(),
                index,
                total,
            });

            match self.sync_channel(channel).await {
                Ok(summary) => {
                    self.reporter.report(ProgressEvent::ChannelCompleted {
                        channel_id: channel.id,
                        url: channel.url.clone(),
                        summary,
                    });
                    self.update_stats(|stats| {
                        stats.channels += 1;
                        stats.episodes += summary.created;
                    });
                }
                Err(SyncError::ChannelVanished(id)) => {
                    tracing::info!(channel_id = id, "Channel deleted during run, skipped");
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(
                        channel_id = channel.id,
                        url = %channel.url,
                        error = %message,
                        "Channel synchronization failed"
                    );
                    self.reporter.report(ProgressEvent::ChannelFailed {
                        channel_id: channel.id,
                        url: channel.url.clone(),
                        error: message.clone(),
                    });
                    self.update_stats(|stats| {
                        stats.channels += 1;
                        stats.errors.push(SyncFailure {
                            channel_id: channel.id,
                            url: channel.url.clone(),
                            message,
                        });
                    });
                }
            }
        }

        self.update_stats(|stats| {
            stats.state = RunState::Completed;
            stats.finished_at = Some(Utc::now());
        });
        let stats = self.stats();

        tracing::info!(
            channels = stats.channels,
            episodes = stats.episodes,
            errors = stats.errors.len(),
            "Sync run completed"
        );
        self.reporter.report(ProgressEvent::RunCompleted {
            channels: stats.channels,
            episodes: stats.episodes,
            failed: stats.errors.len(),
        });

        Ok(stats)
    }

    async fn due_channels(&self, mode: RunMode) -> Result<Vec<Channel>, SyncError> {
        let mut tx = self.db.begin().await?;
        let channels = match mode {
            RunMode::Forced => tx.list_channels().await?,
            RunMode::Scheduled => {
                let cutoff = self
                    .synchronizer
                    .config()
                    .check_interval
                    .stale_before(Utc::now());
                tx.list_due_channels(cutoff).await?
            }
        };
        tx.commit().await?;
        Ok(channels)
    }

    /// Synchronize one channel, leaving it `completed` or `error`.
    ///
    /// A channel deleted since the run selected it yields
    /// [`SyncError::ChannelVanished`] and is left untouched.
    async fn sync_channel(&self, channel: &Channel) -> Result<RefreshSummary, SyncError> {
        if !self
            .update_channel(channel.id, |c| c.set_status(ChannelStatus::Downloading))
            .await?
        {
            return Err(SyncError::ChannelVanished(channel.id));
        }

        let result = self.fetch_and_refresh(channel).await;

        if let Err(e) = &result
            && !matches!(e, SyncError::ChannelVanished(_))
        {
            let message = e.to_string();
            if let Err(store_err) = self
                .update_channel(channel.id, move |c| c.set_error(message))
                .await
            {
                tracing::error!(
                    channel_id = channel.id,
                    error = %store_err,
                    "Failed to record channel error"
                );
            }
        }

        result
    }

    async fn fetch_and_refresh(&self, channel: &Channel) -> Result<RefreshSummary, SyncError> {
        tracing::debug!(channel_id = channel.id, url = %channel.url, "Fetching feed");
        let feed = fetch_feed(self.client.as_ref(), &channel.url).await?;

        let mut tx = self.db.begin().await?;
        let mut current = tx
            .find_channel(channel.id)
            .await?
            .filter(|c| !c.status.is_deleted())
            .ok_or(SyncError::ChannelVanished(channel.id))?;

        match self.synchronizer.refresh(&mut tx, &mut current, &feed).await {
            Ok(summary) => {
                current.set_status(ChannelStatus::Completed);
                tx.update_channel(&current).await?;
                tx.commit().await?;
                Ok(summary)
            }
            Err(e) => {
                // Episodes written before the failure stay
                tx.commit().await?;
                Err(e.into())
            }
        }
    }

    /// Apply `f` to a live channel in its own transaction; false if it is gone or deleted
    async fn update_channel(
        &self,
        id: i64,
        f: impl FnOnce(&mut Channel) + Send,
    ) -> Result<bool, SyncError> {
        let mut tx = self.db.begin().await?;
        let Some(mut channel) = tx.find_channel(id).await?.filter(|c| !c.status.is_deleted())
        else {
            tx.rollback().await?;
            return Ok(false);
        };
        f(&mut channel);
        tx.update_channel(&channel).await?;
        tx.commit().await?;
        Ok(true)
    }
}
