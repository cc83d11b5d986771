pub mod config;
pub mod error;
pub mod feed;
pub mod http;
pub mod progress;
pub mod service;
pub mod status;
pub mod store;
pub mod sync;
pub mod worker;

// Re-export main types for convenience
pub use config::{CheckInterval, PodcastConfig};
pub use error::{FeedError, ServiceError, StoreError, SyncError};
pub use feed::{FeedImage, FeedItem, FeedLink, ParsedFeed, fetch_feed, parse_feed};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use service::{ChannelListing, CreateChannelOutcome, PodcastService};
pub use status::{ChannelStatus, EpisodeStatus, RunState};
pub use store::{Channel, ChannelRepository, Database, Episode};
pub use sync::{ChannelSynchronizer, RefreshSummary};
pub use worker::{RunMode, SyncFailure, SyncStats, SyncWorker};
