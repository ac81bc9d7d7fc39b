//! Ranked aggregates over a window: year-end charts, the all-time chart and
//! child listings.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::certification::grade;
use crate::history::Peak;
use crate::models::{Aggregate, ChartEntry, ChartMetric, Movement, YearEndChartEntry};
use crate::repository::ChartRepository;

struct Group<'a> {
    first: &'a ChartEntry,
    peak: Peak,
    appearances: Vec<&'a ChartEntry>,
}

/// Orders aggregates by `metric` descending, then its tie-breakers, then name.
pub fn compare_aggregates(metric: ChartMetric, a: &Aggregate, b: &Aggregate) -> Ordering {
    std::iter::once(metric)
        .chain(metric.tie_breakers())
        .map(|m| b.units.value(m).cmp(&a.units.value(m)))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.entry.name.cmp(&b.entry.name))
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}

impl ChartRepository {
    /// Groups `entries` by entity and ranks the groups by `metric`.
    ///
    /// `year` only labels the window; callers pass the entries that belong
    /// to it. With `artist_limit`, at most that many aggregates per artist
    /// survive, earliest in sorted order first.
    pub fn aggregate<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a ChartEntry>,
        metric: ChartMetric,
        year: Option<i32>,
        limit: Option<usize>,
        artist_limit: Option<usize>,
    ) -> Vec<Aggregate> {
        let kind = self.kind();
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<Group<'a>> = Vec::new();

        for entry in entries {
            let slot = *index.entry(entry.id.as_str()).or_insert_with(|| {
                groups.push(Group {
                    first: entry,
                    peak: Peak::default(),
                    appearances: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].appearances.push(entry);
        }

        let mut aggregates: Vec<Aggregate> = groups
            .into_iter()
            .map(|mut group| {
                group.appearances.sort_by_key(|e| e.week);
                if let Some(first) = group.appearances.first().copied() {
                    group.first = first;
                }
                for appearance in &group.appearances {
                    group.peak.observe(appearance.rank);
                }

                // Entries come from this store, so every week resolves.
                let indexed: Vec<(usize, &ChartEntry)> = group
                    .appearances
                    .iter()
                    .filter_map(|e| self.store().index_of(&e.week).map(|i| (i, *e)))
                    .collect();
                let units = self.accumulate_units(&indexed).truncate(kind);

                Aggregate {
                    entry: group.first.clone(),
                    rank: 0,
                    peak_rank: group.peak.rank,
                    weeks_at_peak: group.peak.weeks_at_peak,
                    weeks_on_chart: group.peak.weeks_on_chart,
                    units,
                    certifications: None,
                }
            })
            .collect();

        aggregates.sort_by(|a, b| compare_aggregates(metric, a, b));

        if let Some(per_artist) = artist_limit {
            let mut counts: HashMap<String, usize> = HashMap::new();
            aggregates.retain(|aggregate| {
                let count = counts.entry(aggregate.entry.artist_key()).or_insert(0);
                *count += 1;
                *count <= per_artist
            });
        }

        if let Some(limit) = limit {
            aggregates.truncate(limit);
        }

        for (rank, aggregate) in aggregates.iter_mut().enumerate() {
            aggregate.rank = rank + 1;
            aggregate.certifications = grade(kind, aggregate.units.total);
        }

        tracing::debug!(%kind, %metric, ?year, count = aggregates.len(), "aggregated chart");
        aggregates
    }

    /// Year-end chart for `year`, with movement against the previous year's
    /// chart for the same metric.
    pub fn year_end_chart(&self, year: i32, metric: ChartMetric) -> Arc<Vec<YearEndChartEntry>> {
        if let Some(chart) = self.year_end_cache.get(&(year, metric)) {
            return chart;
        }

        let entries: Vec<&ChartEntry> = self.store().entries_in(Some(year)).collect();
        if entries.is_empty() {
            return self.year_end_cache.insert((year, metric), Arc::new(Vec::new()));
        }

        let previous = self.year_end_chart(year - 1, metric);
        let previous_ranks: HashMap<&str, usize> = previous
            .iter()
            .map(|e| (e.aggregate.entry.id.as_str(), e.aggregate.rank))
            .collect();

        let chart: Vec<YearEndChartEntry> = self
            .aggregate(entries, metric, Some(year), Some(self.settings().year_end_limit), None)
            .into_iter()
            .map(|aggregate| {
                let before = previous_ranks.get(aggregate.entry.id.as_str()).map(|r| *r as u32);
                YearEndChartEntry {
                    movement: Movement::between(before, aggregate.rank as u32),
                    aggregate,
                }
            })
            .collect();

        tracing::info!(kind = %self.kind(), year, %metric, entries = chart.len(), "year-end chart ready");
        self.year_end_cache.insert((year, metric), Arc::new(chart))
    }

    /// All-time chart, optionally keeping at most `artist_limit` entries per artist.
    pub fn all_time_chart(&self, metric: ChartMetric, artist_limit: Option<usize>) -> Arc<Vec<Aggregate>> {
        self.all_time_cache.get_or_insert_with((metric, artist_limit), || {
            let chart = self.aggregate(
                self.store().entries_in(None),
                metric,
                None,
                Some(self.settings().all_time_limit),
                artist_limit,
            );
            tracing::info!(kind = %self.kind(), %metric, entries = chart.len(), "all-time chart ready");
            Arc::new(chart)
        })
    }
}
