//! Fixtures shared by unit tests.

use crate::config::ChartSettings;
use crate::models::{ChartKind, ChartSnapshot, RawChartEntry, RawSnapshot, WeekRange};
use crate::repository::{ChartRepository, ChartStore};

/// 2024-01-05, a Friday.
pub const FIRST_WEEK: i64 = 1_704_412_800;

pub fn week(n: usize) -> WeekRange {
    WeekRange::starting_at(FIRST_WEEK + n as i64 * WeekRange::PERIOD_SECS)
}

pub fn track(name: &str, artist: &str, rank: u32) -> RawChartEntry {
    RawChartEntry {
        id: None,
        name: name.to_string(),
        artist_id: None,
        artist_name: Some(artist.to_string()),
        play_count: 10,
        rank,
    }
}

pub fn artist(name: &str, rank: u32) -> RawChartEntry {
    RawChartEntry {
        artist_name: None,
        ..track(name, "", rank)
    }
}

pub fn snapshot(kind: ChartKind, week: WeekRange, entries: Vec<RawChartEntry>) -> ChartSnapshot {
    ChartSnapshot::from_raw(kind, RawSnapshot { week, entries }).unwrap()
}

/// A repository with one snapshot per element of `weeks`, in week order.
pub fn repository(kind: ChartKind, weeks: Vec<Vec<RawChartEntry>>) -> ChartRepository {
    repository_with(kind, weeks, ChartSettings::default())
}

pub fn repository_with(kind: ChartKind, weeks: Vec<Vec<RawChartEntry>>, settings: ChartSettings) -> ChartRepository {
    let snapshots = weeks
        .into_iter()
        .enumerate()
        .map(|(n, entries)| snapshot(kind, week(n), entries))
        .collect();
    ChartRepository::new(ChartStore::new(kind, snapshots).unwrap(), settings)
}
