//! Weekly leaderboards and fastest-to-milestone rankings.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::{ChartEntry, ChartMetric, ChartRunSnapshot, FastestRecord, Units, WeeklyRecord};
use crate::repository::ChartRepository;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WeeklyRecordKind {
    MostWeeklyUnits,
    BiggestDebuts,
    BiggestPeaks,
}

struct PoolEntry<'a> {
    entry: &'a ChartEntry,
    index: usize,
    weeks_so_far: u32,
    units: Units,
}

impl ChartRepository {
    // Every appearance within the pool depth of its week, oldest week first.
    fn record_pool(&self) -> Vec<PoolEntry<'_>> {
        let depth = self.settings().record_pool_depth;
        let kind = self.kind();
        let store = self.store();

        store
            .snapshots()
            .iter()
            .enumerate()
            .flat_map(|(index, snapshot)| {
                snapshot
                    .entries
                    .iter()
                    .filter(move |entry| entry.rank <= depth)
                    .map(move |entry| (index, entry))
            })
            .map(|(index, entry)| {
                let weeks_so_far = store.weeks_on_chart_through(&entry.id, index);
                PoolEntry {
                    entry,
                    index,
                    weeks_so_far,
                    units: self.raw_units(entry, weeks_so_far).truncate(kind),
                }
            })
            .collect()
    }

    /// One weekly leaderboard, memoized per record kind and metric.
    pub fn weekly_record(&self, record: WeeklyRecordKind, metric: ChartMetric) -> Arc<Vec<WeeklyRecord>> {
        self.weekly_record_cache.get_or_insert_with((record, metric), || {
            let mut pool = self.record_pool();
            if record == WeeklyRecordKind::BiggestDebuts {
                pool.retain(|p| p.weeks_so_far == 1);
            }

            // Higher value first; ties go to the older week, then the better rank.
            pool.sort_by(|a, b| {
                b.units
                    .value(metric)
                    .cmp(&a.units.value(metric))
                    .then(a.index.cmp(&b.index))
                    .then(a.entry.rank.cmp(&b.entry.rank))
            });

            if record == WeeklyRecordKind::BiggestPeaks {
                let mut seen = HashSet::new();
                pool.retain(|p| seen.insert(p.entry.id.as_str()));
            }

            let records: Vec<WeeklyRecord> = pool
                .into_iter()
                .take(self.settings().leaderboard_size)
                .enumerate()
                .map(|(rank, p)| WeeklyRecord {
                    id: p.entry.id.clone(),
                    name: p.entry.display_name(),
                    rank: rank + 1,
                    units: p.units,
                    position: p.entry.rank,
                    week: p.entry.week,
                    week_number: self.store().week_number(p.index),
                })
                .collect();

            tracing::debug!(kind = %self.kind(), ?record, %metric, entries = records.len(), "weekly records ready");
            Arc::new(records)
        })
    }

    pub fn most_weekly_units(&self, metric: ChartMetric) -> Arc<Vec<WeeklyRecord>> {
        self.weekly_record(WeeklyRecordKind::MostWeeklyUnits, metric)
    }

    pub fn biggest_debuts(&self, metric: ChartMetric) -> Arc<Vec<WeeklyRecord>> {
        self.weekly_record(WeeklyRecordKind::BiggestDebuts, metric)
    }

    pub fn biggest_peaks(&self, metric: ChartMetric) -> Arc<Vec<WeeklyRecord>> {
        self.weekly_record(WeeklyRecordKind::BiggestPeaks, metric)
    }

    /// Entities ranked by how many weeks after their debut the running
    /// `metric` first reached `value`. Off-chart weeks count toward the
    /// elapsed time.
    pub fn fastest_to_milestone(&self, metric: ChartMetric, value: u64) -> Arc<Vec<FastestRecord>> {
        self.fastest_cache.get_or_insert_with((metric, value), || {
            let mut records: Vec<FastestRecord> = self
                .store()
                .ids()
                .filter_map(|id| self.chart_run(id, None).ok())
                .filter_map(|run| {
                    let mut elapsed: u32 = 0;
                    for step in &run.steps {
                        match step {
                            ChartRunSnapshot::OutOfChart { weeks, .. } => elapsed += *weeks,
                            ChartRunSnapshot::Charted(position) => {
                                elapsed += 1;
                                let running = position.running.value(metric);
                                if running >= value {
                                    return Some(FastestRecord {
                                        id: run.entry.id.clone(),
                                        name: run.entry.display_name(),
                                        rank: 0,
                                        units: position.units,
                                        running,
                                        week: position.week,
                                        week_count: elapsed,
                                    });
                                }
                            }
                        }
                    }
                    None
                })
                .collect();

            records.sort_by(|a, b| {
                a.week_count
                    .cmp(&b.week_count)
                    .then(b.running.cmp(&a.running))
                    .then_with(|| a.name.cmp(&b.name))
                    .then_with(|| a.id.cmp(&b.id))
            });
            records.truncate(self.settings().leaderboard_size);
            for (rank, record) in records.iter_mut().enumerate() {
                record.rank = rank + 1;
            }

            tracing::debug!(kind = %self.kind(), %metric, value, entries = records.len(), "milestone ranking ready");
            Arc::new(records)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChartSettings;
    use crate::models::ChartKind;
    use crate::test_support::{repository, repository_with, track, week};

    fn three_weeks() -> ChartRepository {
        repository(
            ChartKind::Track,
            vec![
                vec![track("A", "X", 1), track("B", "Y", 2), track("Deep", "Z", 21)],
                vec![track("A", "X", 1), track("C", "Y", 1)],
                vec![track("A", "X", 2), track("C", "Y", 1)],
            ],
        )
    }

    #[test]
    fn weekly_units_reward_longevity_and_skip_deep_entries() {
        let repo = three_weeks();
        let records = repo.most_weekly_units(ChartMetric::TotalUnits);

        assert!(records.iter().all(|r| r.id != "Z - Deep"));
        assert_eq!(records.len(), 6);
        // rank 1 in its second week beats rank 1 on debut
        assert_eq!(records[0].id, "X - A");
        assert_eq!(records[0].week, week(1));
        assert_eq!(records[0].week_number, 2);
        assert_eq!(records[0].name, "X - A");
        assert_eq!(records[0].rank, 1);
        assert!(records.windows(2).all(|w| w[0].units.total >= w[1].units.total));
    }

    #[test]
    fn debuts_only_count_first_weeks_and_prefer_older_weeks_on_ties() {
        let repo = three_weeks();
        let debuts = repo.biggest_debuts(ChartMetric::TotalUnits);
        let ids: Vec<_> = debuts.iter().map(|r| (r.id.as_str(), r.week)).collect();
        // A and C both debut at #1 with equal units; A's week is older
        assert_eq!(ids, vec![("X - A", week(0)), ("Y - C", week(1)), ("Y - B", week(0))]);
    }

    #[test]
    fn peaks_keep_each_entity_once() {
        let repo = three_weeks();
        let peaks = repo.biggest_peaks(ChartMetric::Sales);
        let mut ids: Vec<_> = peaks.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(peaks.len(), 3);
        ids.sort();
        assert_eq!(ids, vec!["X - A", "Y - B", "Y - C"]);
        assert_eq!(peaks[0].id, "X - A");
        assert_eq!(peaks[0].week, week(1));
    }

    #[test]
    fn leaderboards_respect_configured_size() {
        let settings = ChartSettings {
            leaderboard_size: 2,
            ..ChartSettings::default()
        };
        let repo = repository_with(
            ChartKind::Track,
            vec![vec![track("A", "X", 1), track("B", "Y", 2), track("C", "Z", 3)]],
            settings,
        );
        assert_eq!(repo.most_weekly_units(ChartMetric::Streams).len(), 2);
    }

    #[test]
    fn fastest_to_milestone_orders_by_elapsed_weeks() {
        let repo = repository(
            ChartKind::Track,
            vec![
                vec![track("Fast", "X", 1), track("Slow", "Y", 90), track("Gap", "Z", 1)],
                vec![track("Fast", "X", 1), track("Slow", "Y", 90)],
                vec![track("Slow", "Y", 90), track("Gap", "Z", 1)],
            ],
        );
        let fast_run = repo.chart_run("X - Fast", None).unwrap();
        let target = fast_run.steps[1].position().unwrap().running.total;

        let records = repo.fastest_to_milestone(ChartMetric::TotalUnits, target);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert!(!ids.contains(&"Y - Slow"));
        assert_eq!(records[0].id, "X - Fast");
        assert_eq!(records[0].week_count, 2);
        assert_eq!(records[0].running, target);
        assert_eq!(records[0].rank, 1);

        // Gap charts in weeks 1 and 3 and the missing week counts toward elapsed time
        let gap = records.iter().find(|r| r.id == "Z - Gap").unwrap();
        assert_eq!(gap.week_count, 3);
        assert_eq!(gap.week, week(2));
        assert!(records.windows(2).all(|w| w[0].week_count <= w[1].week_count));
    }

    #[test]
    fn unreachable_milestones_are_empty() {
        let repo = three_weeks();
        assert!(repo.fastest_to_milestone(ChartMetric::Sales, u64::MAX).is_empty());
    }
}
