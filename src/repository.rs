//! In-memory chart stores and the per-kind repositories that answer queries
//! over them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::Memo;
use crate::config::ChartSettings;
use crate::error::{ChartError, Result};
use crate::ingest::AlbumInfoSource;
use crate::models::{
    Aggregate, AlbumInfo, AlbumKey, CatalogedAlbum, ChartEntry, ChartKind, ChartMetric, ChartSnapshot, FastestRecord,
    OverallHistory, SnapshotHistory, WeekRange, WeeklyRecord, YearEndChartEntry,
};
use crate::history::ChartRun;
use crate::records::WeeklyRecordKind;
use crate::units::RawUnits;

/// All weekly snapshots of one kind, oldest first. Immutable once built.
#[derive(Debug)]
pub struct ChartStore {
    kind: ChartKind,
    snapshots: Vec<ChartSnapshot>,
    weeks: HashMap<WeekRange, usize>,
    // id -> (snapshot index, entry index), chronological
    appearances: HashMap<String, Vec<(usize, usize)>>,
}

impl ChartStore {
    /// Builds a store from snapshots in any order.
    pub fn new(kind: ChartKind, mut snapshots: Vec<ChartSnapshot>) -> Result<Self> {
        snapshots.sort_by_key(|s| s.week);

        let mut weeks = HashMap::with_capacity(snapshots.len());
        let mut appearances: HashMap<String, Vec<(usize, usize)>> = HashMap::new();

        for (index, snapshot) in snapshots.iter().enumerate() {
            if snapshot.kind != kind {
                return Err(ChartError::malformed(
                    kind,
                    snapshot.week,
                    format!("found a {} chart", snapshot.kind),
                ));
            }
            if weeks.insert(snapshot.week, index).is_some() {
                return Err(ChartError::DuplicateWeek {
                    kind,
                    week: snapshot.week,
                });
            }
            for (position, entry) in snapshot.entries.iter().enumerate() {
                appearances
                    .entry(entry.id.clone())
                    .or_default()
                    .push((index, position));
            }
        }

        Ok(Self {
            kind,
            snapshots,
            weeks,
            appearances,
        })
    }

    pub fn kind(&self) -> ChartKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshots oldest first.
    pub fn snapshots(&self) -> &[ChartSnapshot] {
        &self.snapshots
    }

    pub fn newest_first(&self) -> impl Iterator<Item = &ChartSnapshot> {
        self.snapshots.iter().rev()
    }

    pub fn weeks(&self) -> Vec<WeekRange> {
        self.snapshots.iter().map(|s| s.week).collect()
    }

    /// Distinct calendar years covered by the store, ascending.
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.snapshots.iter().filter_map(|s| s.week.year()).collect();
        years.dedup();
        years
    }

    pub fn index_of(&self, week: &WeekRange) -> Option<usize> {
        self.weeks.get(week).copied()
    }

    /// 1-based chronological number of the snapshot at `index`.
    pub fn week_number(&self, index: usize) -> usize {
        index + 1
    }

    pub fn snapshot(&self, week: &WeekRange) -> Result<&ChartSnapshot> {
        self.index_of(week)
            .map(|index| &self.snapshots[index])
            .ok_or_else(|| ChartError::missing_week(self.kind, *week))
    }

    /// The stored week whose range contains `timestamp`.
    pub fn week_containing(&self, timestamp: i64) -> Option<WeekRange> {
        let index = self.snapshots.partition_point(|s| s.week.to < timestamp);
        self.snapshots
            .get(index)
            .map(|s| s.week)
            .filter(|week| week.from <= timestamp)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.appearances.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.appearances.keys().map(String::as_str)
    }

    /// Every appearance of `id` with its snapshot index, oldest first.
    pub fn appearances(&self, id: &str) -> Vec<(usize, &ChartEntry)> {
        self.appearances
            .get(id)
            .map(|slots| {
                slots
                    .iter()
                    .map(|&(index, position)| (index, &self.snapshots[index].entries[position]))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn appearances_in(&self, id: &str, year: Option<i32>) -> Vec<(usize, &ChartEntry)> {
        let mut appearances = self.appearances(id);
        if let Some(year) = year {
            appearances.retain(|(_, entry)| entry.week.is_in_year(year));
        }
        appearances
    }

    /// Number of weeks `id` has charted up to and including snapshot `index`.
    pub fn weeks_on_chart_through(&self, id: &str, index: usize) -> u32 {
        self.appearances
            .get(id)
            .map_or(0, |slots| slots.partition_point(|&(i, _)| i <= index) as u32)
    }

    pub fn entry_at(&self, id: &str, week: &WeekRange) -> Result<&ChartEntry> {
        let snapshot = self.snapshot(week)?;
        snapshot
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| ChartError::missing_entry(self.kind, id, Some(*week)))
    }

    /// Most recent appearance of `id`.
    pub fn find_entry(&self, id: &str) -> Result<&ChartEntry> {
        self.appearances(id)
            .last()
            .map(|(_, entry)| *entry)
            .ok_or_else(|| ChartError::missing_entry(self.kind, id, None))
    }

    /// All entries of the window, oldest week first.
    pub fn entries_in(&self, year: Option<i32>) -> impl Iterator<Item = &ChartEntry> {
        self.snapshots
            .iter()
            .filter(move |s| year.map_or(true, |year| s.week.is_in_year(year)))
            .flat_map(|s| s.entries.iter())
    }
}

/// Query surface for one chart kind. Every derived result is memoized for
/// the lifetime of the repository.
#[derive(Debug)]
pub struct ChartRepository {
    store: ChartStore,
    settings: ChartSettings,
    pub(crate) units_cache: Memo<(String, WeekRange, u32), RawUnits>,
    pub(crate) snapshot_cache: Memo<(String, WeekRange), SnapshotHistory>,
    pub(crate) run_cache: Memo<(String, Option<i32>), Arc<ChartRun>>,
    pub(crate) year_end_cache: Memo<(i32, ChartMetric), Arc<Vec<YearEndChartEntry>>>,
    pub(crate) all_time_cache: Memo<(ChartMetric, Option<usize>), Arc<Vec<Aggregate>>>,
    pub(crate) weekly_record_cache: Memo<(WeeklyRecordKind, ChartMetric), Arc<Vec<WeeklyRecord>>>,
    pub(crate) fastest_cache: Memo<(ChartMetric, u64), Arc<Vec<FastestRecord>>>,
}

impl ChartRepository {
    pub fn new(store: ChartStore, settings: ChartSettings) -> Self {
        Self {
            store,
            settings,
            units_cache: Memo::new(),
            snapshot_cache: Memo::new(),
            run_cache: Memo::new(),
            year_end_cache: Memo::new(),
            all_time_cache: Memo::new(),
            weekly_record_cache: Memo::new(),
            fastest_cache: Memo::new(),
        }
    }

    pub fn kind(&self) -> ChartKind {
        self.store.kind()
    }

    pub fn store(&self) -> &ChartStore {
        &self.store
    }

    pub fn settings(&self) -> &ChartSettings {
        &self.settings
    }
}

/// Tracklists for albums, fetched at most once per album.
#[derive(Debug, Default)]
pub struct AlbumCatalog {
    albums: Memo<AlbumKey, Arc<AlbumInfo>>,
}

impl AlbumCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &AlbumKey) -> Option<Arc<AlbumInfo>> {
        self.albums.get(key)
    }

    pub fn insert(&self, info: AlbumInfo) -> Arc<AlbumInfo> {
        self.insert_as(info.key(), info)
    }

    /// Stores `info` under `key`, which may differ from the provider's spelling.
    pub fn insert_as(&self, key: AlbumKey, info: AlbumInfo) -> Arc<AlbumInfo> {
        self.albums.insert(key, Arc::new(info))
    }

    /// Every tracklist with the key it is stored under.
    pub fn albums(&self) -> Vec<CatalogedAlbum> {
        self.albums
            .entries()
            .into_iter()
            .map(|(key, info)| CatalogedAlbum {
                key,
                info: info.as_ref().clone(),
            })
            .collect()
    }

    pub async fn get_or_fetch(&self, key: &AlbumKey, source: &dyn AlbumInfoSource) -> Result<Arc<AlbumInfo>> {
        if let Some(info) = self.get(key) {
            return Ok(info);
        }
        tracing::debug!(album = %key.name, artist = %key.artist, "fetching album tracklist");
        let info = source.fetch_album(key).await?;
        // Stored under the requested key; providers may normalize the spelling.
        Ok(self.insert_as(key.clone(), info))
    }

    /// Loads the tracklist for an album chart entry. Other kinds are ignored.
    pub async fn load_for(&self, entry: &ChartEntry, source: &dyn AlbumInfoSource) -> Result<()> {
        if entry.kind != ChartKind::Album {
            return Ok(());
        }
        if let Some(artist) = entry.artist_name() {
            let key = AlbumKey {
                name: entry.name.clone(),
                artist: artist.to_string(),
            };
            self.get_or_fetch(&key, source).await?;
        }
        Ok(())
    }
}

/// The three kind repositories plus the album catalog, for queries that
/// cross kinds (child entries of artists and albums).
#[derive(Debug)]
pub struct ChartLibrary {
    tracks: Arc<ChartRepository>,
    albums: Arc<ChartRepository>,
    artists: Arc<ChartRepository>,
    catalog: Arc<AlbumCatalog>,
    pub(crate) overall_cache: Memo<(ChartKind, String, Option<i32>), Arc<OverallHistory>>,
}

impl ChartLibrary {
    pub fn new(
        tracks: Arc<ChartRepository>,
        albums: Arc<ChartRepository>,
        artists: Arc<ChartRepository>,
        catalog: Arc<AlbumCatalog>,
    ) -> Self {
        Self {
            tracks,
            albums,
            artists,
            catalog,
            overall_cache: Memo::new(),
        }
    }

    pub fn repository(&self, kind: ChartKind) -> &ChartRepository {
        match kind {
            ChartKind::Track => &self.tracks,
            ChartKind::Album => &self.albums,
            ChartKind::Artist => &self.artists,
        }
    }

    pub fn catalog(&self) -> &AlbumCatalog {
        &self.catalog
    }

    pub fn snapshot_history(&self, entry: &ChartEntry) -> Result<SnapshotHistory> {
        self.repository(entry.kind).snapshot_history(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{snapshot, track};

    #[test]
    fn store_orders_snapshots_and_indexes_appearances() {
        let week1 = WeekRange::starting_at(0);
        let week2 = week1.next();
        let store = ChartStore::new(
            ChartKind::Track,
            vec![
                snapshot(ChartKind::Track, week2, vec![track("A", "X", 2), track("B", "X", 1)]),
                snapshot(ChartKind::Track, week1, vec![track("A", "X", 1)]),
            ],
        )
        .unwrap();

        assert_eq!(store.weeks(), vec![week1, week2]);
        let appearances = store.appearances("X - A");
        assert_eq!(appearances.len(), 2);
        assert_eq!(appearances[0].0, 0);
        assert_eq!(appearances[1].1.rank, 2);
        assert_eq!(store.weeks_on_chart_through("X - A", 0), 1);
        assert_eq!(store.weeks_on_chart_through("X - A", 1), 2);
        assert_eq!(store.weeks_on_chart_through("X - B", 0), 0);
        assert_eq!(store.find_entry("X - A").unwrap().week, week2);
        assert_eq!(store.newest_first().next().unwrap().week, week2);
        assert_eq!(store.week_containing(week2.from + 60), Some(week2));
        assert_eq!(store.week_containing(week1.to), Some(week1));
        assert_eq!(store.week_containing(week2.to + 1), None);
    }

    #[test]
    fn duplicate_weeks_are_rejected() {
        let week = WeekRange::starting_at(0);
        let err = ChartStore::new(
            ChartKind::Track,
            vec![
                snapshot(ChartKind::Track, week, vec![track("A", "X", 1)]),
                snapshot(ChartKind::Track, week, vec![track("B", "X", 1)]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ChartError::DuplicateWeek { .. }));
    }

    #[test]
    fn unknown_references_fail_fast() {
        let week = WeekRange::starting_at(0);
        let store = ChartStore::new(
            ChartKind::Track,
            vec![snapshot(ChartKind::Track, week, vec![track("A", "X", 1)])],
        )
        .unwrap();
        assert!(matches!(
            store.snapshot(&week.next()),
            Err(ChartError::MissingReference { .. })
        ));
        assert!(matches!(
            store.entry_at("X - Z", &week),
            Err(ChartError::MissingReference { .. })
        ));
        assert!(store.find_entry("nobody").is_err());
    }

    struct FixedAlbums;

    #[async_trait::async_trait]
    impl AlbumInfoSource for FixedAlbums {
        async fn fetch_album(&self, key: &AlbumKey) -> Result<AlbumInfo> {
            Ok(AlbumInfo {
                name: key.name.to_uppercase(),
                artist: key.artist.clone(),
                tracks: vec!["One".to_string()],
            })
        }
    }

    #[tokio::test]
    async fn catalog_fetches_once_and_keeps_requested_key() {
        let catalog = AlbumCatalog::new();
        let key = AlbumKey {
            name: "Low".to_string(),
            artist: "David Bowie".to_string(),
        };
        let first = catalog.get_or_fetch(&key, &FixedAlbums).await.unwrap();
        let second = catalog.get_or_fetch(&key, &FixedAlbums).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(catalog.get(&key).unwrap().name, "LOW");

        let albums = catalog.albums();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].key, key);
        assert_eq!(albums[0].info.name, "LOW");
    }
}
