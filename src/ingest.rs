//! Fetching weekly pages from a chart provider and turning them into
//! published stores.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{ChartError, Result};
use crate::models::{AlbumInfo, AlbumKey, CatalogedAlbum, ChartKind, ChartSnapshot, RawSnapshot, WeekRange};
use crate::repository::{AlbumCatalog, ChartStore};
use crate::session::ChartSession;

/// A provider of weekly chart pages.
#[async_trait]
pub trait ChartSource: Send + Sync {
    /// The page for `kind` in `week`. A week without listening data is an
    /// empty page, not an error.
    async fn fetch_week(&self, kind: ChartKind, week: WeekRange) -> Result<RawSnapshot>;
}

/// A provider of album tracklists.
#[async_trait]
pub trait AlbumInfoSource: Send + Sync {
    async fn fetch_album(&self, key: &AlbumKey) -> Result<AlbumInfo>;
}

/// Every page of a listening history, as written by `fetch` and read back
/// by the query commands.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ChartDump {
    #[serde(default)]
    pub tracks: Vec<RawSnapshot>,
    #[serde(default)]
    pub albums: Vec<RawSnapshot>,
    #[serde(default)]
    pub artists: Vec<RawSnapshot>,
    #[serde(default)]
    pub albums_info: Vec<CatalogedAlbum>,
}

impl ChartDump {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn pages(&self, kind: ChartKind) -> &[RawSnapshot] {
        match kind {
            ChartKind::Track => &self.tracks,
            ChartKind::Album => &self.albums,
            ChartKind::Artist => &self.artists,
        }
    }

    pub fn pages_mut(&mut self, kind: ChartKind) -> &mut Vec<RawSnapshot> {
        match kind {
            ChartKind::Track => &mut self.tracks,
            ChartKind::Album => &mut self.albums,
            ChartKind::Artist => &mut self.artists,
        }
    }

    /// Every week present in any kind, oldest first.
    pub fn weeks(&self) -> Vec<WeekRange> {
        ChartKind::ALL
            .iter()
            .flat_map(|kind| self.pages(*kind).iter().map(|page| page.week))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Fills `catalog` with every stored tracklist.
    pub fn fill_catalog(&self, catalog: &AlbumCatalog) {
        for album in &self.albums_info {
            catalog.insert_as(album.key.clone(), album.info.clone());
        }
    }
}

#[async_trait]
impl ChartSource for ChartDump {
    async fn fetch_week(&self, kind: ChartKind, week: WeekRange) -> Result<RawSnapshot> {
        Ok(self
            .pages(kind)
            .iter()
            .find(|page| page.week == week)
            .cloned()
            .unwrap_or(RawSnapshot {
                week,
                entries: Vec::new(),
            }))
    }
}

#[async_trait]
impl AlbumInfoSource for ChartDump {
    async fn fetch_album(&self, key: &AlbumKey) -> Result<AlbumInfo> {
        self.albums_info
            .iter()
            .find(|album| {
                album.key.name.to_lowercase() == key.name.to_lowercase()
                    && album.key.artist.to_lowercase() == key.artist.to_lowercase()
            })
            .map(|album| album.info.clone())
            .ok_or_else(|| ChartError::MissingReference {
                kind: ChartKind::Album,
                what: format!("tracklist for `{} - {}`", key.artist, key.name),
            })
    }
}

/// Fetches the raw pages of `kind` for `weeks`, at most `concurrency`
/// requests at a time. Empty pages are dropped; the rest come back oldest
/// first.
pub async fn fetch_pages(
    source: &dyn ChartSource,
    kind: ChartKind,
    weeks: &[WeekRange],
    concurrency: usize,
) -> Result<Vec<RawSnapshot>> {
    tracing::info!(%kind, weeks = weeks.len(), concurrency, "fetching weekly charts");

    let mut pages: Vec<RawSnapshot> = stream::iter(weeks.iter().copied())
        .map(|week| source.fetch_week(kind, week))
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;

    pages.retain(|page| {
        if page.entries.is_empty() {
            tracing::warn!(%kind, week = %page.week, "skipping empty chart");
        }
        !page.entries.is_empty()
    });
    pages.sort_by_key(|page| page.week);
    Ok(pages)
}

/// Fetches and normalizes every page of `kind` into a store.
///
/// A malformed page fails the whole kind and nothing is returned for it.
pub async fn ingest_kind(
    source: &dyn ChartSource,
    kind: ChartKind,
    weeks: &[WeekRange],
    concurrency: usize,
) -> Result<ChartStore> {
    let pages = fetch_pages(source, kind, weeks, concurrency).await?;
    let snapshots = pages
        .into_iter()
        .map(|page| ChartSnapshot::from_raw(kind, page))
        .filter(|snapshot| snapshot.as_ref().map_or(true, |s| !s.entries.is_empty()))
        .collect::<Result<Vec<_>>>()?;

    let store = ChartStore::new(kind, snapshots)?;
    tracing::info!(%kind, snapshots = store.len(), "charts ingested");
    Ok(store)
}

/// Ingests all three kinds concurrently and publishes each store to
/// `session` as soon as it is complete.
///
/// Every kind runs to completion. A kind that fails settles its gate to
/// the failure, so waiters on it are released; the first failure, in kind
/// order, is returned.
pub async fn ingest_all(
    session: &ChartSession,
    source: &dyn ChartSource,
    weeks: &[WeekRange],
    concurrency: usize,
) -> Result<()> {
    let publish = |kind: ChartKind| async move {
        match ingest_kind(source, kind, weeks, concurrency).await {
            Ok(store) => session.publish(store).map(|_| ()),
            Err(err) => Err(session.fail(kind, err)),
        }
    };

    let (tracks, albums, artists) = futures::join!(
        publish(ChartKind::Track),
        publish(ChartKind::Album),
        publish(ChartKind::Artist)
    );
    tracks.and(albums).and(artists)
}

/// Loads tracklists for every album in `albums` that the catalog does not
/// have yet. Albums the source cannot describe are logged and skipped.
pub async fn load_tracklists(
    catalog: &AlbumCatalog,
    albums: &ChartStore,
    source: &dyn AlbumInfoSource,
    concurrency: usize,
) -> usize {
    let keys: BTreeSet<(String, String)> = albums
        .entries_in(None)
        .filter_map(|entry| Some((entry.name.clone(), entry.artist_name()?.to_string())))
        .collect();

    stream::iter(keys)
        .map(|(name, artist)| async move {
            let key = AlbumKey { name, artist };
            match catalog.get_or_fetch(&key, source).await {
                Ok(_) => 1,
                Err(err) => {
                    tracing::warn!(album = %key.name, artist = %key.artist, error = %err, "no tracklist");
                    0
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .fold(0, |loaded, n| async move { loaded + n })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChartSettings;
    use crate::models::RawChartEntry;
    use crate::test_support::{artist, snapshot, track, week};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn page(n: usize, entries: Vec<RawChartEntry>) -> RawSnapshot {
        RawSnapshot { week: week(n), entries }
    }

    fn dump() -> ChartDump {
        ChartDump {
            tracks: vec![page(1, vec![track("B", "X", 1)]), page(0, vec![track("A", "X", 1)])],
            albums: vec![page(0, vec![track("Low", "X", 1)])],
            artists: vec![page(0, vec![artist("X", 1)])],
            albums_info: vec![CatalogedAlbum {
                key: AlbumKey {
                    name: "Low".to_string(),
                    artist: "X".to_string(),
                },
                info: AlbumInfo {
                    name: "Low".to_string(),
                    artist: "X".to_string(),
                    tracks: vec!["A".to_string()],
                },
            }],
        }
    }

    #[tokio::test]
    async fn dump_pages_become_a_store() {
        let dump = dump();
        let weeks = dump.weeks();
        assert_eq!(weeks, vec![week(0), week(1)]);

        let tracks = ingest_kind(&dump, ChartKind::Track, &weeks, 4).await.unwrap();
        assert_eq!(tracks.weeks(), weeks);

        // albums have no page for week 1, which is skipped
        let albums = ingest_kind(&dump, ChartKind::Album, &weeks, 1).await.unwrap();
        assert_eq!(albums.len(), 1);
    }

    #[tokio::test]
    async fn malformed_page_fails_the_kind() {
        let mut dump = dump();
        dump.tracks.push(page(2, vec![track("C", "X", 0)]));
        let err = ingest_kind(&dump, ChartKind::Track, &[week(0), week(2)], 2).await.unwrap_err();
        assert!(matches!(err, ChartError::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn ingest_all_publishes_every_kind() {
        let dump = dump();
        let session = ChartSession::new(ChartSettings::default());
        ingest_all(&session, &dump, &dump.weeks(), 2).await.unwrap();
        for kind in ChartKind::ALL {
            assert!(session.is_ready(kind));
        }
        let library = session.library().await.unwrap();
        assert_eq!(library.repository(ChartKind::Artist).store().len(), 1);
    }

    #[tokio::test]
    async fn failed_kinds_release_their_waiters() {
        let mut dump = dump();
        dump.tracks.push(page(2, vec![track("C", "X", 0)]));
        let session = ChartSession::new(ChartSettings::default());

        let weeks = dump.weeks();
        let (ingested, library) = tokio::join!(ingest_all(&session, &dump, &weeks, 2), session.library());

        match ingested.unwrap_err() {
            ChartError::IngestionFailed { kind, source } => {
                assert_eq!(kind, ChartKind::Track);
                assert!(matches!(*source, ChartError::MalformedRecord { .. }));
            }
            other => panic!("expected an ingestion failure, got {other:?}"),
        }
        assert!(matches!(
            library.unwrap_err(),
            ChartError::IngestionFailed { kind: ChartKind::Track, .. }
        ));
        // the other kinds still publish
        assert!(session.is_ready(ChartKind::Album));
        assert!(session.is_ready(ChartKind::Artist));
    }

    struct CountingAlbums {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AlbumInfoSource for CountingAlbums {
        async fn fetch_album(&self, key: &AlbumKey) -> Result<AlbumInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key.name == "Unknown" {
                return Err(ChartError::Config("no such album".to_string()));
            }
            Ok(AlbumInfo {
                name: key.name.clone(),
                artist: key.artist.clone(),
                tracks: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn tracklists_are_fetched_once_and_failures_skipped() {
        let store = ChartStore::new(
            ChartKind::Album,
            vec![
                snapshot(
                    ChartKind::Album,
                    week(0),
                    vec![track("Low", "X", 1), track("Unknown", "X", 2)],
                ),
                snapshot(ChartKind::Album, week(1), vec![track("Low", "X", 1)]),
            ],
        )
        .unwrap();
        let catalog = AlbumCatalog::new();
        let source = CountingAlbums {
            calls: AtomicUsize::new(0),
        };

        assert_eq!(load_tracklists(&catalog, &store, &source, 2).await, 1);
        assert_eq!(load_tracklists(&catalog, &store, &source, 2).await, 1);
        // Low is cached after the first pass; Unknown is retried
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    struct RemasteredAlbums;

    #[async_trait]
    impl AlbumInfoSource for RemasteredAlbums {
        async fn fetch_album(&self, key: &AlbumKey) -> Result<AlbumInfo> {
            Ok(AlbumInfo {
                name: format!("{} (Remastered)", key.name.to_uppercase()),
                artist: key.artist.clone(),
                tracks: vec!["A".to_string()],
            })
        }
    }

    #[tokio::test]
    async fn saved_tracklists_keep_the_chart_spelling() {
        let store = ChartStore::new(
            ChartKind::Album,
            vec![snapshot(ChartKind::Album, week(0), vec![track("Low", "X", 1)])],
        )
        .unwrap();
        let fetched = AlbumCatalog::new();
        assert_eq!(load_tracklists(&fetched, &store, &RemasteredAlbums, 1).await, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charts.json");
        let dump = ChartDump {
            albums_info: fetched.albums(),
            ..ChartDump::default()
        };
        dump.save(&path).unwrap();

        let loaded = AlbumCatalog::new();
        ChartDump::load(&path).unwrap().fill_catalog(&loaded);
        let key = AlbumKey {
            name: "Low".to_string(),
            artist: "X".to_string(),
        };
        let info = loaded.get(&key).unwrap();
        assert_eq!(info.name, "LOW (Remastered)");
        assert!(info.contains_track("a"));
    }

    #[tokio::test]
    async fn dump_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charts.json");
        dump().save(&path).unwrap();
        let loaded = ChartDump::load(&path).unwrap();
        assert_eq!(loaded.weeks(), dump().weeks());

        let info = loaded
            .fetch_album(&AlbumKey {
                name: "low".to_string(),
                artist: "x".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(info.tracks, vec!["A".to_string()]);
    }
}
