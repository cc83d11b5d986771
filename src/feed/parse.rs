// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

use crate::error::FeedError;

/// A parsed podcast feed, reduced to what synchronization needs
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub description: Option<String>,
    pub image: Option<FeedImage>,
    /// Channel-level tags, de-duplicated in source order
    pub tags: Vec<String>,
    pub items: Vec<FeedItem>,
}

/// Channel artwork
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedImage {
    pub url: String,
    pub title: Option<String>,
}

/// One entry of the feed
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub title: Option<String>,
    pub description: Option<String>,
    pub published: Option<DateTime<FixedOffset>>,
    /// Enclosure first, then the item's web link
    pub links: Vec<FeedLink>,
    pub duration: Option<String>,
}

/// A typed link attached to an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedLink {
    pub href: String,
    pub mime_type: String,
    pub length: Option<i64>,
}

impl FeedLink {
    pub fn is_media(&self) -> bool {
        self.mime_type.starts_with("audio") || self.mime_type.starts_with("video")
    }
}

impl FeedItem {
    /// The first audio or video link, if any
    pub fn media_link(&self) -> Option<&FeedLink> {
        self.links.iter().find(|link| link.is_media())
    }

    pub fn published_utc(&self) -> Option<DateTime<Utc>> {
        self.published.map(|dt| dt.with_timezone(&Utc))
    }
}

/// Parse RSS feed XML bytes into a ParsedFeed
pub fn parse_feed(xml_bytes: &[u8]) -> Result<ParsedFeed, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    let image = channel
        .image()
        .filter(|img| !img.url().is_empty())
        .map(|img| FeedImage {
            url: img.url().to_string(),
            title: Some(img.title().to_string()).filter(|s| !s.is_empty()),
        })
        .or_else(|| {
            channel
                .itunes_ext()
                .and_then(|ext| ext.image())
                .filter(|href| !href.is_empty())
                .map(|href| FeedImage {
                    url: href.to_string(),
                    title: None,
                })
        });

    Ok(ParsedFeed {
        title: channel.title().trim().to_string(),
        description: Some(channel.description().to_string()).filter(|s| !s.is_empty()),
        image,
        tags: collect_tags(&channel),
        items: channel.items().iter().map(parse_item).collect(),
    })
}

fn collect_tags(channel: &rss::Channel) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |term: &str| {
        let term = term.trim();
        if !term.is_empty() && !tags.iter().any(|t| t == term) {
            tags.push(term.to_string());
        }
    };

    for category in channel.categories() {
        push(category.name());
    }

    if let Some(ext) = channel.itunes_ext() {
        for category in ext.categories() {
            push(category.text());
            if let Some(sub) = category.subcategory() {
                push(sub.text());
            }
        }
    }

    tags
}

fn parse_item(item: &rss::Item) -> FeedItem {
    let mut links = Vec::new();

    if let Some(enclosure) = item.enclosure().filter(|e| !e.url().is_empty()) {
        links.push(FeedLink {
            href: enclosure.url().to_string(),
            mime_type: enclosure.mime_type().trim().to_ascii_lowercase(),
            length: enclosure.length().trim().parse().ok(),
        });
    }

    if let Some(link) = item.link().filter(|l| !l.is_empty()) {
        links.push(FeedLink {
            href: link.to_string(),
            mime_type: "text/html".to_string(),
            length: None,
        });
    }

    FeedItem {
        title: item.title().map(|t| t.trim().to_string()),
        description: item.description().map(String::from),
        published: item.pub_date().and_then(parse_date),
        links,
        duration: item
            .itunes_ext()
            .and_then(|ext| ext.duration().map(String::from))
            .filter(|d| !d.is_empty()),
    }
}

/// Parse a publish date, accepting RFC 2822 and a few common deviations
pub(crate) fn parse_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let date_str = date_str.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt);
    }

    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];
    for format in formats {
        if let Ok(dt) = DateTime::parse_from_str(date_str, format) {
            return Some(dt);
        }
    }

    // Zone names like "GMT" or "EST" trip the offset parsers; read them as UTC
    let without_zone = date_str
        .rsplit_once(' ')
        .map_or(date_str, |(head, zone)| {
            if zone.chars().all(|c| c.is_ascii_alphabetic()) {
                head
            } else {
                date_str
            }
        });
    NaiveDateTime::parse_from_str(without_zone, "%a, %d %b %Y %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(without_zone, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc().fixed_offset())
}
