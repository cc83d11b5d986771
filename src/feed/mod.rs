mod fetch;
mod parse;

pub use fetch::{fetch_feed, read_feed_file, validate_feed_url};
pub use parse::{FeedImage, FeedItem, FeedLink, ParsedFeed, parse_feed};
