// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

const HOUR: u64 = 60 * 60;

/// How long a channel may go unfetched before a scheduled run picks it up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckInterval {
    hours: u64,
}

impl CheckInterval {
    pub const HOURLY: Self = Self { hours: 1 };
    pub const DAILY: Self = Self { hours: 24 };
    pub const WEEKLY: Self = Self { hours: 24 * 7 };

    pub fn from_hours(hours: u64) -> Self {
        Self { hours }
    }

    pub fn hours(self) -> u64 {
        self.hours
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.hours.saturating_mul(HOUR))
    }

    /// `None` when the interval does not fit chrono's range
    pub fn as_chrono(self) -> Option<chrono::Duration> {
        i64::try_from(self.hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
    }

    /// Latest `last_fetched` that counts as stale at `now`.
    ///
    /// An interval reaching past the representable past yields the earliest
    /// instant, so nothing previously fetched is stale.
    pub fn stale_before(self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.as_chrono()
            .and_then(|interval| now.checked_sub_signed(interval))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for CheckInterval {
    fn default() -> Self {
        Self::DAILY
    }
}

impl fmt::Display for CheckInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h", self.hours)
    }
}

impl FromStr for CheckInterval {
    type Err = String;

    /// Accepts `hourly`, `daily`, `weekly`, or a whole number of hours
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Self::HOURLY),
            "daily" => Ok(Self::DAILY),
            "weekly" => Ok(Self::WEEKLY),
            other => other
                .trim_end_matches('h')
                .parse::<u64>()
                .ok()
                .filter(|hours| *hours > 0)
                .map(Self::from_hours)
                .ok_or_else(|| format!("invalid check interval '{s}'")),
        }
    }
}

impl<'de> Deserialize<'de> for CheckInterval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Hours(u64),
            Named(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Hours(0) => Err(serde::de::Error::custom("check interval must be positive")),
            Raw::Hours(hours) => Ok(Self::from_hours(hours)),
            Raw::Named(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Podcast settings shared by the synchronizer and the worker
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PodcastConfig {
    /// Minimum age of `last_fetched` before a channel is due again
    pub check_interval: CheckInterval,
    /// Maximum episodes kept per channel; older ones are pruned
    pub episode_retention_count: usize,
    /// Reserved for media downloading, not enforced here
    pub episode_download_count: usize,
    /// Reserved for media downloading, not enforced here
    pub episode_folder: Option<PathBuf>,
}

impl Default for PodcastConfig {
    fn default() -> Self {
        Self {
            check_interval: CheckInterval::DAILY,
            episode_retention_count: 10,
            episode_download_count: 1,
            episode_folder: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_intervals_parse() {
        assert_eq!("daily".parse::<CheckInterval>().unwrap().hours(), 24);
        assert_eq!("Weekly".parse::<CheckInterval>().unwrap().hours(), 168);
        assert_eq!("hourly".parse::<CheckInterval>().unwrap().hours(), 1);
    }

    #[test]
    fn numeric_intervals_parse() {
        assert_eq!("6".parse::<CheckInterval>().unwrap().hours(), 6);
        assert_eq!("12h".parse::<CheckInterval>().unwrap().hours(), 12);
        assert!("0".parse::<CheckInterval>().is_err());
        assert!("sometimes".parse::<CheckInterval>().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: PodcastConfig =
            serde_json::from_str(r#"{"check_interval": "weekly", "episode_retention_count": 3}"#)
                .unwrap();

        assert_eq!(config.check_interval, CheckInterval::WEEKLY);
        assert_eq!(config.episode_retention_count, 3);
        assert_eq!(config.episode_download_count, 1);
        assert!(config.episode_folder.is_none());
    }

    #[test]
    fn config_accepts_numeric_interval() {
        let config: PodcastConfig = serde_json::from_str(r#"{"check_interval": 48}"#).unwrap();
        assert_eq!(config.check_interval.as_duration(), Duration::from_secs(48 * 3600));
        assert!(serde_json::from_str::<PodcastConfig>(r#"{"check_interval": 0}"#).is_err());
    }

    #[test]
    fn huge_intervals_do_not_overflow() {
        let interval: CheckInterval = "10000000000".parse().unwrap();
        let now = Utc::now();

        assert_eq!(interval.as_duration(), Duration::from_secs(u64::MAX));
        assert_eq!(interval.stale_before(now), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            CheckInterval::from_hours(u64::MAX).stale_before(now),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[test]
    fn stale_before_subtracts_the_interval() {
        let now = Utc::now();
        assert_eq!(
            CheckInterval::DAILY.stale_before(now),
            now - chrono::Duration::hours(24)
        );
    }
}
