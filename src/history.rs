//! Per-entity history: week-by-week movement and the full chart run with
//! accrued units.

use std::sync::Arc;

use crate::certification::grade;
use crate::error::{ChartError, Result};
use crate::models::{
    AlbumKey, ChartEntry, ChartKind, ChartMetric, ChartPosition, ChartRunSnapshot, ChildEntries, Movement,
    OverallHistory, SnapshotHistory,
};
use crate::repository::{ChartLibrary, ChartRepository};
use crate::units::{compute_raw_units, estimate_off_chart, RawUnits};

/// An entity's run inside one window, first to last appearance.
#[derive(Clone, Debug)]
pub struct ChartRun {
    /// First appearance in the window.
    pub entry: ChartEntry,
    pub steps: Vec<ChartRunSnapshot>,
    pub total: RawUnits,
    pub peak_rank: u32,
    pub weeks_at_peak: u32,
    pub weeks_on_chart: u32,
}

/// Peak and longevity over a set of appearances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Peak {
    pub rank: u32,
    pub weeks_at_peak: u32,
    pub weeks_on_chart: u32,
}

impl Peak {
    pub fn observe(&mut self, rank: u32) {
        self.weeks_on_chart += 1;
        if self.rank == 0 || rank < self.rank {
            self.rank = rank;
            self.weeks_at_peak = 1;
        } else if rank == self.rank {
            self.weeks_at_peak += 1;
        }
    }
}

impl ChartRepository {
    /// Raw units of one appearance, memoized by (id, week, weeks on chart).
    pub(crate) fn raw_units(&self, entry: &ChartEntry, weeks_on_chart: u32) -> RawUnits {
        self.units_cache
            .get_or_insert_with((entry.id.clone(), entry.week, weeks_on_chart), || {
                compute_raw_units(entry.kind, entry.rank, entry.play_count, weeks_on_chart)
            })
    }

    /// Movement, peak and longevity of `entry` as of its own week.
    pub fn snapshot_history(&self, entry: &ChartEntry) -> Result<SnapshotHistory> {
        let kind = self.kind();
        let key = (entry.id.clone(), entry.week);
        self.snapshot_cache.try_get_or_insert_with(key, || {
            let index = self
                .store()
                .index_of(&entry.week)
                .ok_or_else(|| ChartError::missing_week(kind, entry.week))?;

            let appearances: Vec<_> = self
                .store()
                .appearances(&entry.id)
                .into_iter()
                .take_while(|(i, _)| *i <= index)
                .map(|(_, e)| e)
                .collect();

            let current = match appearances.last() {
                Some(current) if current.week == entry.week => *current,
                _ => return Err(ChartError::missing_entry(kind, &entry.id, Some(entry.week))),
            };

            let movement = match appearances.len().checked_sub(2).map(|i| appearances[i]) {
                None => Movement::New,
                Some(previous) if previous.week.is_immediately_before(&current.week) => {
                    Movement::between(Some(previous.rank), current.rank)
                }
                Some(_) => Movement::Reappear,
            };

            let mut peak = Peak::default();
            for appearance in &appearances {
                peak.observe(appearance.rank);
            }

            Ok(SnapshotHistory {
                movement,
                peak_rank: peak.rank,
                weeks_at_peak: peak.weeks_at_peak,
                weeks_on_chart: peak.weeks_on_chart,
            })
        })
    }

    /// The run of `id` within `year` (all time when `None`).
    pub fn chart_run(&self, id: &str, year: Option<i32>) -> Result<Arc<ChartRun>> {
        self.run_cache.try_get_or_insert_with((id.to_string(), year), || {
            let appearances = self.store().appearances_in(id, year);
            let first = appearances
                .first()
                .map(|(_, entry)| (*entry).clone())
                .ok_or_else(|| ChartError::missing_entry(self.kind(), id, None))?;

            let (steps, total) = self.walk(&appearances);
            let mut peak = Peak::default();
            for (_, entry) in &appearances {
                peak.observe(entry.rank);
            }

            Ok(Arc::new(ChartRun {
                entry: first,
                steps,
                total,
                peak_rank: peak.rank,
                weeks_at_peak: peak.weeks_at_peak,
                weeks_on_chart: peak.weeks_on_chart,
            }))
        })
    }

    /// Total raw units of a chronological set of appearances, with
    /// off-chart gaps imputed.
    pub(crate) fn accumulate_units(&self, appearances: &[(usize, &ChartEntry)]) -> RawUnits {
        self.walk(appearances).1
    }

    // Gaps are measured in snapshot indices. The longevity count includes
    // the re-entry week when estimating the weeks before it.
    fn walk(&self, appearances: &[(usize, &ChartEntry)]) -> (Vec<ChartRunSnapshot>, RawUnits) {
        let kind = self.kind();
        let mut steps = Vec::with_capacity(appearances.len());
        let mut running = RawUnits::default();
        let mut previous: Option<(usize, RawUnits)> = None;

        for (weeks_on_chart, &(index, entry)) in (1u32..).zip(appearances) {
            if let Some((last_index, last_units)) = previous {
                let gap = index.saturating_sub(last_index + 1) as u32;
                if gap > 0 {
                    let estimated = estimate_off_chart(kind, gap, weeks_on_chart, last_units);
                    running += estimated;
                    steps.push(ChartRunSnapshot::OutOfChart {
                        weeks: gap,
                        estimated: estimated.truncate(kind),
                    });
                }
            }

            let units = self.raw_units(entry, weeks_on_chart);
            running += units;
            steps.push(ChartRunSnapshot::Charted(ChartPosition {
                rank: entry.rank,
                units: units.truncate(kind),
                running: running.truncate(kind),
                week: entry.week,
                week_number: self.store().week_number(index),
            }));
            previous = Some((index, units));
        }

        (steps, running)
    }
}

impl ChartLibrary {
    /// Peak, longevity, units, certifications and chart run of `entry`
    /// within `year` (all time when `None`), plus child listings for
    /// artists and albums.
    ///
    /// An album whose tracklist has not been loaded yet gets no child
    /// listing, and the result is not memoized so a later call can fill it.
    pub fn overall_history(&self, entry: &ChartEntry, year: Option<i32>) -> Result<Arc<OverallHistory>> {
        let key = (entry.kind, entry.id.clone(), year);
        if let Some(history) = self.overall_cache.get(&key) {
            return Ok(history);
        }

        let run = self.repository(entry.kind).chart_run(&entry.id, year)?;
        let units = run.total.truncate(entry.kind);
        let child_entries = self.child_entries(entry, year);
        let cacheable = entry.kind != ChartKind::Album || child_entries.is_some();

        let history = Arc::new(OverallHistory {
            entry: entry.clone(),
            year,
            peak_rank: run.peak_rank,
            weeks_at_peak: run.weeks_at_peak,
            weeks_on_chart: run.weeks_on_chart,
            units,
            certifications: grade(entry.kind, units.total),
            chart_run: run.steps.clone(),
            child_entries,
        });

        if !cacheable {
            tracing::debug!(album = %entry.display_name(), "tracklist not loaded, skipping cache");
            return Ok(history);
        }
        Ok(self.overall_cache.insert(key, history))
    }

    fn child_entries(&self, entry: &ChartEntry, year: Option<i32>) -> Option<Vec<ChildEntries>> {
        match entry.kind {
            ChartKind::Track => None,
            ChartKind::Artist => {
                let artist = entry.name.to_lowercase();
                let children = [ChartKind::Album, ChartKind::Track]
                    .into_iter()
                    .map(|kind| {
                        self.children_of(kind, year, |child| {
                            child.artist_name().map(str::to_lowercase).as_deref() == Some(artist.as_str())
                        })
                    })
                    .collect();
                Some(children)
            }
            ChartKind::Album => {
                let artist = entry.artist_name()?;
                let info = self.catalog().get(&AlbumKey {
                    name: entry.name.clone(),
                    artist: artist.to_string(),
                })?;
                let artist = artist.to_lowercase();
                let tracks = self.children_of(ChartKind::Track, year, |child| {
                    child.artist_name().map(str::to_lowercase).as_deref() == Some(artist.as_str())
                        && info.contains_track(&child.name)
                });
                Some(vec![tracks])
            }
        }
    }

    fn children_of(&self, kind: ChartKind, year: Option<i32>, matches: impl Fn(&ChartEntry) -> bool) -> ChildEntries {
        let repository = self.repository(kind);
        let entries: Vec<&ChartEntry> = repository.store().entries_in(year).filter(|e| matches(e)).collect();
        ChildEntries {
            kind,
            entries: repository.aggregate(entries, ChartMetric::TotalUnits, year, None, None),
        }
    }
}
