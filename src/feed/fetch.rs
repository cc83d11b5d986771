// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use bytes::Bytes;
use url::Url;

use crate::error::FeedError;
use crate::http::{HttpClient, HttpResponse};

use super::parse::{ParsedFeed, parse_feed};

/// Check that a feed url has a scheme and somewhere to point at
pub fn validate_feed_url(url: &str) -> Result<Url, FeedError> {
    let parsed = Url::parse(url.trim())?;

    let has_location = parsed.host_str().is_some_and(|h| !h.is_empty())
        || !parsed.path().trim_start_matches('/').is_empty();
    if parsed.scheme().is_empty() || !has_location {
        return Err(FeedError::InvalidUrl(
            "missing schema, location or path".to_string(),
        ));
    }

    Ok(parsed)
}

/// Read raw feed bytes from a local file
pub async fn read_feed_file(path: &Path) -> Result<Vec<u8>, FeedError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| FeedError::FileReadFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

async fn load<C: HttpClient + ?Sized>(client: &C, url: &Url) -> Result<HttpResponse, FeedError> {
    if url.scheme() == "file" {
        let path = url
            .to_file_path()
            .map_err(|_| FeedError::InvalidUrl(format!("not a local path: {url}")))?;
        let body = read_feed_file(&path).await?;
        return Ok(HttpResponse {
            status: 200,
            body: Bytes::from(body),
        });
    }

    Ok(client.get(url.as_str()).await?)
}

/// Fetch, parse and validate a podcast feed.
///
/// Nothing is persisted here; a returned feed is safe to hand to the
/// synchronizer. Transport errors are passed through untouched.
pub async fn fetch_feed<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
) -> Result<ParsedFeed, FeedError> {
    let feed_url = validate_feed_url(url)?;

    let response = load(client, &feed_url).await?;
    if response.status != 200 {
        return Err(FeedError::HttpStatus {
            url: feed_url.to_string(),
            status: response.status,
        });
    }

    let feed = parse_feed(&response.body)?;
    if feed.title.is_empty() {
        return Err(FeedError::MissingTitle);
    }

    Ok(feed)
}
