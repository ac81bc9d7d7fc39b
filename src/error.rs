//! Error types for chart ingestion and queries.

use std::sync::Arc;

use thiserror::Error;

use crate::models::{ChartKind, WeekRange};

pub type Result<T> = std::result::Result<T, ChartError>;

#[derive(Error, Debug)]
pub enum ChartError {
    /// A query named a week or entry that was never ingested.
    #[error("{kind} chart has no {what}")]
    MissingReference { kind: ChartKind, what: String },

    /// A weekly page from the provider could not be normalized.
    #[error("malformed {kind} chart for week {week}: {reason}")]
    MalformedRecord {
        kind: ChartKind,
        week: WeekRange,
        reason: String,
    },

    #[error("{kind} chart contains week {week} more than once")]
    DuplicateWeek { kind: ChartKind, week: WeekRange },

    #[error("{0} charts were already published for this session")]
    AlreadyPublished(ChartKind),

    /// Ingestion of a kind failed; its queries resolve to this error.
    #[error("{kind} charts failed to ingest: {source}")]
    IngestionFailed {
        kind: ChartKind,
        source: Arc<ChartError>,
    },

    /// Last.fm answered with an error document.
    #[error("Last.fm error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChartError {
    pub(crate) fn missing_week(kind: ChartKind, week: WeekRange) -> Self {
        ChartError::MissingReference {
            kind,
            what: format!("week {week}"),
        }
    }

    pub(crate) fn missing_entry(kind: ChartKind, id: &str, week: Option<WeekRange>) -> Self {
        let what = match week {
            Some(week) => format!("entry `{id}` in week {week}"),
            None => format!("entry `{id}`"),
        };
        ChartError::MissingReference { kind, what }
    }

    pub(crate) fn malformed(kind: ChartKind, week: WeekRange, reason: impl Into<String>) -> Self {
        ChartError::MalformedRecord {
            kind,
            week,
            reason: reason.into(),
        }
    }
}
