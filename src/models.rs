use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};

use crate::error::{ChartError, Result};

/// One chart period, `from` through the last second `to` (epoch seconds).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeekRange {
    pub from: i64,
    pub to: i64,
}

impl WeekRange {
    pub const PERIOD_SECS: i64 = 7 * 24 * 60 * 60;

    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    /// The week that starts at `from` and lasts one full period.
    pub fn starting_at(from: i64) -> Self {
        Self {
            from,
            to: from + Self::PERIOD_SECS - 1,
        }
    }

    pub fn next(&self) -> Self {
        Self::starting_at(self.to + 1)
    }

    pub fn is_immediately_before(&self, week: &WeekRange) -> bool {
        week.from - self.to == 1
    }

    /// Calendar year (UTC) of the week's last second.
    pub fn year(&self) -> Option<i32> {
        DateTime::from_timestamp(self.to, 0).map(|dt| dt.year())
    }

    pub fn is_in_year(&self, year: i32) -> bool {
        self.year() == Some(year)
    }
}

impl fmt::Display for WeekRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (
            DateTime::from_timestamp(self.from, 0),
            DateTime::from_timestamp(self.to, 0),
        ) {
            (Some(from), Some(to)) => write!(f, "{}..{}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d")),
            _ => write!(f, "{}..{}", self.from, self.to),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Track,
    Album,
    Artist,
}

impl ChartKind {
    pub const ALL: [ChartKind; 3] = [ChartKind::Track, ChartKind::Album, ChartKind::Artist];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Track => "track",
            ChartKind::Album => "album",
            ChartKind::Artist => "artist",
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "track" | "tracks" => Ok(ChartKind::Track),
            "album" | "albums" => Ok(ChartKind::Album),
            "artist" | "artists" => Ok(ChartKind::Artist),
            other => Err(format!("unknown chart kind `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChartMetric {
    TotalUnits,
    Streams,
    Sales,
}

impl ChartMetric {
    /// Secondary and tertiary sort keys used to break ties on this metric.
    pub fn tie_breakers(&self) -> [ChartMetric; 2] {
        match self {
            ChartMetric::Streams => [ChartMetric::TotalUnits, ChartMetric::Sales],
            ChartMetric::Sales => [ChartMetric::TotalUnits, ChartMetric::Streams],
            ChartMetric::TotalUnits => [ChartMetric::Sales, ChartMetric::Streams],
        }
    }
}

impl fmt::Display for ChartMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChartMetric::TotalUnits => "total-units",
            ChartMetric::Streams => "streams",
            ChartMetric::Sales => "sales",
        })
    }
}

impl FromStr for ChartMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "total-units" | "units" | "total" => Ok(ChartMetric::TotalUnits),
            "streams" => Ok(ChartMetric::Streams),
            "sales" => Ok(ChartMetric::Sales),
            other => Err(format!("unknown chart metric `{other}`")),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Artist {
    pub id: Option<String>,
    pub name: String,
}

/// One entity's appearance in one weekly chart. Identity is `id` only.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChartEntry {
    pub id: String,
    pub kind: ChartKind,
    pub name: String,
    pub artist: Option<Artist>,
    pub play_count: u64,
    pub rank: u32,
    pub week: WeekRange,
}

impl ChartEntry {
    pub fn artist_name(&self) -> Option<&str> {
        self.artist.as_ref().map(|a| a.name.as_str())
    }

    /// "Artist - Name" for tracks and albums, the bare name for artists.
    pub fn display_name(&self) -> String {
        match self.artist_name() {
            Some(artist) => format!("{} - {}", artist, self.name),
            None => self.name.clone(),
        }
    }

    /// Key used when limiting how many entries one artist may hold in a chart.
    pub(crate) fn artist_key(&self) -> String {
        match self.artist_name() {
            Some(artist) => artist.to_lowercase(),
            None => self.id.clone(),
        }
    }
}

impl PartialEq for ChartEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChartEntry {}

impl Hash for ChartEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One week's top-N chart for one kind, rank ascending.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChartSnapshot {
    pub kind: ChartKind,
    pub week: WeekRange,
    pub entries: Vec<ChartEntry>,
}

impl ChartSnapshot {
    /// Normalizes a provider page. The page is accepted whole or not at all.
    pub fn from_raw(kind: ChartKind, raw: RawSnapshot) -> Result<Self> {
        let week = raw.week;
        if week.to <= week.from {
            return Err(ChartError::malformed(kind, week, "week ends before it starts"));
        }

        let limit = kind.profile().chart_limit;
        let mut entries = Vec::with_capacity(raw.entries.len());

        for record in raw.entries {
            let name = record.name.trim().to_string();
            if name.is_empty() {
                return Err(ChartError::malformed(kind, week, "entry without a name"));
            }
            if record.rank == 0 {
                return Err(ChartError::malformed(kind, week, format!("`{name}` has rank 0")));
            }
            if record.rank > limit {
                continue;
            }

            let artist = match kind {
                ChartKind::Artist => None,
                ChartKind::Track | ChartKind::Album => {
                    let artist_name = record
                        .artist_name
                        .map(|n| n.trim().to_string())
                        .filter(|n| !n.is_empty())
                        .ok_or_else(|| {
                            ChartError::malformed(kind, week, format!("`{name}` has no artist"))
                        })?;
                    Some(Artist {
                        id: record.artist_id.filter(|id| !id.is_empty()),
                        name: artist_name,
                    })
                }
            };

            // Track mbids are unstable across weeks, so tracks are keyed by name.
            let provider_id = record.id.filter(|id| !id.trim().is_empty());
            let id = match (kind, provider_id, &artist) {
                (ChartKind::Album | ChartKind::Artist, Some(id), _) => id,
                (_, _, Some(artist)) => format!("{} - {}", artist.name, name),
                (_, _, None) => name.clone(),
            };

            entries.push(ChartEntry {
                id,
                kind,
                name,
                artist,
                play_count: record.play_count,
                rank: record.rank,
                week,
            });
        }

        // Repeats keep their best-ranked occurrence.
        entries.sort_by_key(|e| e.rank);
        let mut seen = HashSet::new();
        entries.retain(|entry| {
            let first = seen.insert(entry.id.clone());
            if !first {
                tracing::warn!(%kind, %week, id = %entry.id, "dropping repeated chart entry");
            }
            first
        });
        Ok(Self { kind, week, entries })
    }

    pub fn top_entry(&self) -> Option<&ChartEntry> {
        self.entries.first()
    }
}

/// A weekly page as handed over by the ingestion collaborator.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RawSnapshot {
    pub week: WeekRange,
    pub entries: Vec<RawChartEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RawChartEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artist_id: Option<String>,
    #[serde(default)]
    pub artist_name: Option<String>,
    pub play_count: u64,
    pub rank: u32,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Units {
    pub streams: u64,
    pub streams_equivalent: u64,
    pub sales: u64,
    pub total: u64,
}

impl Units {
    pub fn value(&self, metric: ChartMetric) -> u64 {
        match metric {
            ChartMetric::TotalUnits => self.total,
            ChartMetric::Streams => self.streams,
            ChartMetric::Sales => self.sales,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(tag = "tier", content = "count", rename_all = "lowercase")]
pub enum Certification {
    Gold(u64),
    Platinum(u64),
    Diamond(u64),
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Movement {
    New,
    Reappear,
    Stay,
    Upward(u32),
    Downward(u32),
}

impl Movement {
    /// Movement between two ranks of the same entity; `None` means no prior rank.
    pub fn between(previous: Option<u32>, current: u32) -> Self {
        match previous {
            None => Movement::New,
            Some(previous) if previous > current => Movement::Upward(previous - current),
            Some(previous) if previous < current => Movement::Downward(current - previous),
            Some(_) => Movement::Stay,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SnapshotHistory {
    pub movement: Movement,
    pub peak_rank: u32,
    pub weeks_at_peak: u32,
    pub weeks_on_chart: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ChartPosition {
    pub rank: u32,
    pub units: Units,
    pub running: Units,
    pub week: WeekRange,
    pub week_number: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChartRunSnapshot {
    Charted(ChartPosition),
    OutOfChart { weeks: u32, estimated: Units },
}

impl ChartRunSnapshot {
    pub fn position(&self) -> Option<&ChartPosition> {
        match self {
            ChartRunSnapshot::Charted(position) => Some(position),
            ChartRunSnapshot::OutOfChart { .. } => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Aggregate {
    pub entry: ChartEntry,
    pub rank: usize,
    pub peak_rank: u32,
    pub weeks_at_peak: u32,
    pub weeks_on_chart: u32,
    pub units: Units,
    pub certifications: Option<Vec<Certification>>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ChildEntries {
    pub kind: ChartKind,
    pub entries: Vec<Aggregate>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct OverallHistory {
    pub entry: ChartEntry,
    pub year: Option<i32>,
    pub peak_rank: u32,
    pub weeks_at_peak: u32,
    pub weeks_on_chart: u32,
    pub units: Units,
    pub certifications: Option<Vec<Certification>>,
    pub chart_run: Vec<ChartRunSnapshot>,
    pub child_entries: Option<Vec<ChildEntries>>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct YearEndChartEntry {
    pub movement: Movement,
    pub aggregate: Aggregate,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct WeeklyRecord {
    pub id: String,
    pub name: String,
    pub rank: usize,
    pub units: Units,
    pub position: u32,
    pub week: WeekRange,
    pub week_number: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FastestRecord {
    pub id: String,
    pub name: String,
    pub rank: usize,
    pub units: Units,
    pub running: u64,
    pub week: WeekRange,
    pub week_count: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct AlbumKey {
    pub name: String,
    pub artist: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AlbumInfo {
    pub name: String,
    pub artist: String,
    pub tracks: Vec<String>,
}

impl AlbumInfo {
    pub fn key(&self) -> AlbumKey {
        AlbumKey {
            name: self.name.clone(),
            artist: self.artist.clone(),
        }
    }

    pub fn contains_track(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.tracks.iter().any(|t| t.to_lowercase() == name)
    }
}

/// A tracklist and the chart key it was requested under. The provider may
/// spell the album differently from the chart.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CatalogedAlbum {
    pub key: AlbumKey,
    pub info: AlbumInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, artist: Option<&str>, rank: u32) -> RawChartEntry {
        RawChartEntry {
            id: None,
            name: name.to_string(),
            artist_id: None,
            artist_name: artist.map(str::to_string),
            play_count: 10,
            rank,
        }
    }

    #[test]
    fn weeks_chain_contiguously() {
        let week = WeekRange::starting_at(1_704_412_800);
        let next = week.next();
        assert!(week.is_immediately_before(&next));
        assert!(!next.is_immediately_before(&week));
        assert!(!week.is_immediately_before(&next.next()));
    }

    #[test]
    fn week_year_follows_its_end() {
        // 2023-12-29 (Fri) through 2024-01-04
        let week = WeekRange::starting_at(1_703_808_000);
        assert_eq!(week.year(), Some(2024));
        assert!(week.is_in_year(2024));
        assert!(!week.is_in_year(2023));
    }

    #[test]
    fn movement_between_ranks() {
        assert_eq!(Movement::between(Some(8), 5), Movement::Upward(3));
        assert_eq!(Movement::between(Some(5), 8), Movement::Downward(3));
        assert_eq!(Movement::between(Some(5), 5), Movement::Stay);
        assert_eq!(Movement::between(None, 1), Movement::New);
    }

    #[test]
    fn snapshot_ids_fall_back_to_names() {
        let week = WeekRange::starting_at(0);
        let page = RawSnapshot {
            week,
            entries: vec![
                raw("Heroes", Some("David Bowie"), 2),
                RawChartEntry {
                    id: Some("mbid-1".to_string()),
                    ..raw("Low", Some("David Bowie"), 1)
                },
            ],
        };
        let snapshot = ChartSnapshot::from_raw(ChartKind::Album, page).unwrap();
        assert_eq!(snapshot.entries[0].id, "mbid-1");
        assert_eq!(snapshot.entries[1].id, "David Bowie - Heroes");

        let artists = RawSnapshot {
            week,
            entries: vec![raw("David Bowie", None, 1)],
        };
        let snapshot = ChartSnapshot::from_raw(ChartKind::Artist, artists).unwrap();
        assert_eq!(snapshot.entries[0].id, "David Bowie");
        assert!(snapshot.entries[0].artist.is_none());
    }

    #[test]
    fn track_ids_ignore_provider_ids() {
        let week = WeekRange::starting_at(0);
        let page = RawSnapshot {
            week,
            entries: vec![RawChartEntry {
                id: Some("mbid-1".to_string()),
                ..raw("Heroes", Some("David Bowie"), 1)
            }],
        };
        let snapshot = ChartSnapshot::from_raw(ChartKind::Track, page).unwrap();
        assert_eq!(snapshot.entries[0].id, "David Bowie - Heroes");
    }

    #[test]
    fn repeated_ids_keep_the_best_rank() {
        let page = RawSnapshot {
            week: WeekRange::starting_at(0),
            entries: vec![
                raw("Heroes", Some("David Bowie"), 7),
                raw("Low", Some("David Bowie"), 3),
                raw("Heroes", Some("David Bowie"), 2),
            ],
        };
        let snapshot = ChartSnapshot::from_raw(ChartKind::Track, page).unwrap();
        let ranks: Vec<_> = snapshot.entries.iter().map(|e| (e.name.as_str(), e.rank)).collect();
        assert_eq!(ranks, vec![("Heroes", 2), ("Low", 3)]);
    }

    #[test]
    fn malformed_pages_are_rejected_whole() {
        let week = WeekRange::starting_at(0);
        let page = RawSnapshot {
            week,
            entries: vec![raw("Heroes", Some("David Bowie"), 1), raw("Low", None, 2)],
        };
        let err = ChartSnapshot::from_raw(ChartKind::Track, page).unwrap_err();
        assert!(matches!(err, ChartError::MalformedRecord { .. }));

        let zero = RawSnapshot {
            week,
            entries: vec![raw("Heroes", Some("David Bowie"), 0)],
        };
        assert!(ChartSnapshot::from_raw(ChartKind::Track, zero).is_err());
    }

    #[test]
    fn entries_beyond_the_chart_limit_are_dropped() {
        let page = RawSnapshot {
            week: WeekRange::starting_at(0),
            entries: vec![raw("Low", Some("David Bowie"), 51), raw("Heroes", Some("David Bowie"), 50)],
        };
        let snapshot = ChartSnapshot::from_raw(ChartKind::Album, page).unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].rank, 50);
    }

    #[test]
    fn metrics_parse_from_cli_spelling() {
        assert_eq!("total-units".parse::<ChartMetric>(), Ok(ChartMetric::TotalUnits));
        assert_eq!("total_units".parse::<ChartMetric>(), Ok(ChartMetric::TotalUnits));
        assert_eq!("Sales".parse::<ChartMetric>(), Ok(ChartMetric::Sales));
        assert!("plays".parse::<ChartMetric>().is_err());
        assert_eq!("albums".parse::<ChartKind>(), Ok(ChartKind::Album));
    }
}
