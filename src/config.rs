//! Settings loaded from a TOML file, with environment overrides for the
//! Last.fm credentials.

use std::path::Path;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::calendar::WeekCalendar;
use crate::error::{ChartError, Result};

pub const API_KEY_ENV: &str = "LASTFM_API_KEY";
pub const USER_ENV: &str = "LASTFM_USER";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub lastfm: LastFmSettings,
    pub ingest: IngestSettings,
    pub charts: ChartSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LastFmSettings {
    pub api_key: String,
    pub user: String,
    pub base_url: String,
}

impl Default for LastFmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            user: String::new(),
            base_url: "https://ws.audioscrobbler.com/2.0/".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct IngestSettings {
    /// Upper bound on in-flight weekly page requests.
    pub max_concurrent_requests: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 8,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ChartSettings {
    pub year_end_limit: usize,
    pub all_time_limit: usize,
    /// Only appearances at or above this rank enter the weekly record pool.
    pub record_pool_depth: u32,
    pub leaderboard_size: usize,
    pub week_anchor: String,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            year_end_limit: 100,
            all_time_limit: 200,
            record_pool_depth: 20,
            leaderboard_size: 20,
            week_anchor: "fri".to_string(),
        }
    }
}

impl ChartSettings {
    pub fn calendar(&self) -> Result<WeekCalendar> {
        self.week_anchor
            .parse::<Weekday>()
            .map(WeekCalendar::new)
            .map_err(|_| ChartError::Config(format!("invalid week_anchor `{}`", self.week_anchor)))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Reads `path` when given (defaults otherwise), then applies the
    /// `LASTFM_API_KEY` / `LASTFM_USER` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.lastfm.api_key = key;
        }
        if let Some(user) = lookup(USER_ENV).filter(|v| !v.is_empty()) {
            self.lastfm.user = user;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.max_concurrent_requests == 0 {
            return Err(ChartError::Config("max_concurrent_requests must be at least 1".to_string()));
        }
        if self.charts.record_pool_depth == 0 {
            return Err(ChartError::Config("record_pool_depth must be at least 1".to_string()));
        }
        self.charts.calendar()?;
        Ok(())
    }
}
