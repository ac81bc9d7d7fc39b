//! Synthetic units model: converts a chart position and play count into
//! estimated streams and sales, and imputes accrual for off-chart weeks.
//!
//! Everything here works on [`RawUnits`] (floating point). Values are only
//! truncated to integers when a result leaves the estimator as [`Units`].

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::models::{ChartKind, Units};

const OFF_CHART_DECAY: f64 = 0.7;
const OFF_CHART_CEILING: f64 = 0.3;
const OFF_CHART_STREAMS_FLOOR: f64 = 4_000.0;
const OFF_CHART_SALES_FLOOR: f64 = 2_000.0;

/// Per-kind constants of the units formula.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KindProfile {
    pub chart_limit: u32,
    pub base_stream: f64,
    pub range_stream: f64,
    pub base_sale: f64,
    pub range_sale: f64,
    pub play_exponent_stream: f64,
    pub play_exponent_sale: f64,
    pub play_multiplier_stream: f64,
    pub play_multiplier_sale: f64,
    pub stream_conversion_rate: f64,
    pub certified: bool,
}

static PROFILES: [KindProfile; 3] = [
    KindProfile {
        chart_limit: 100,
        base_stream: 14.0,
        range_stream: 49.0,
        base_sale: 50.0,
        range_sale: 150.0,
        play_exponent_stream: 1.4,
        play_exponent_sale: 1.2,
        play_multiplier_stream: 1_000_000.0,
        play_multiplier_sale: 3_000.0,
        stream_conversion_rate: 500.0,
        certified: true,
    },
    KindProfile {
        chart_limit: 50,
        base_stream: 28.0,
        range_stream: 98.0,
        base_sale: 75.0,
        range_sale: 200.0,
        play_exponent_stream: 1.4,
        play_exponent_sale: 1.2,
        play_multiplier_stream: 1_000_000.0,
        play_multiplier_sale: 3_000.0,
        stream_conversion_rate: 1_500.0,
        certified: true,
    },
    KindProfile {
        chart_limit: 50,
        base_stream: 56.0,
        range_stream: 196.0,
        base_sale: 150.0,
        range_sale: 350.0,
        play_exponent_stream: 1.4,
        play_exponent_sale: 1.2,
        play_multiplier_stream: 1_000_000.0,
        play_multiplier_sale: 3_000.0,
        stream_conversion_rate: 1_500.0,
        certified: false,
    },
];

impl ChartKind {
    pub fn profile(&self) -> &'static KindProfile {
        match self {
            ChartKind::Track => &PROFILES[0],
            ChartKind::Album => &PROFILES[1],
            ChartKind::Artist => &PROFILES[2],
        }
    }
}

/// Untruncated units. `streams` is already divided by the conversion rate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawUnits {
    pub streams: f64,
    pub sales: f64,
}

impl RawUnits {
    pub fn new(streams: f64, sales: f64) -> Self {
        Self { streams, sales }
    }

    pub fn truncate(&self, kind: ChartKind) -> Units {
        let rate = kind.profile().stream_conversion_rate;
        Units {
            streams: self.streams as u64,
            streams_equivalent: (self.streams * rate) as u64,
            sales: self.sales as u64,
            total: (self.streams + self.sales) as u64,
        }
    }
}

impl Add for RawUnits {
    type Output = RawUnits;

    fn add(self, rhs: RawUnits) -> RawUnits {
        RawUnits::new(self.streams + rhs.streams, self.sales + rhs.sales)
    }
}

impl AddAssign for RawUnits {
    fn add_assign(&mut self, rhs: RawUnits) {
        self.streams += rhs.streams;
        self.sales += rhs.sales;
    }
}

impl Sum for RawUnits {
    fn sum<I: Iterator<Item = RawUnits>>(iter: I) -> Self {
        iter.fold(RawUnits::default(), Add::add)
    }
}

pub fn longevity_bonus(weeks_on_chart: u32) -> f64 {
    1.0 + 0.05 * (f64::from(weeks_on_chart) + 1.0).ln()
}

pub fn compute_raw_units(kind: ChartKind, rank: u32, play_count: u64, weeks_on_chart: u32) -> RawUnits {
    let p = kind.profile();
    let log_rank = (f64::from(rank) + 0.01).ln();
    let log_max = f64::from(p.chart_limit).ln();
    let rank_factor = 1.0 - log_rank / log_max;
    let bonus = longevity_bonus(weeks_on_chart);
    let plays = play_count as f64;

    let mut streams = (p.base_stream + p.range_stream * rank_factor) * 1_000_000.0;
    streams += plays.powf(p.play_exponent_stream) * p.play_multiplier_stream;
    streams = streams * bonus / p.stream_conversion_rate;

    let mut sales = (p.base_sale + p.range_sale * rank_factor) * 1_000.0;
    sales += plays.powf(p.play_exponent_sale) * p.play_multiplier_sale;
    sales *= bonus;

    RawUnits::new(streams, sales)
}

pub fn compute_units(kind: ChartKind, rank: u32, play_count: u64, weeks_on_chart: u32) -> Units {
    compute_raw_units(kind, rank, play_count, weeks_on_chart).truncate(kind)
}

/// Units of the weakest entry that still makes the chart.
pub fn min_chart_units(kind: ChartKind) -> RawUnits {
    compute_raw_units(kind, kind.profile().chart_limit, 1, 1)
}

/// Imputed units for `weeks_off_chart` consecutive missing weeks.
///
/// `weeks_on_chart` counts on-chart appearances up to and including the week
/// the entry re-entered; `last` is the raw units of its previous appearance.
///
/// # Panics
///
/// When `weeks_off_chart` is zero; callers only estimate real gaps.
pub fn estimate_off_chart(kind: ChartKind, weeks_off_chart: u32, weeks_on_chart: u32, last: RawUnits) -> RawUnits {
    assert!(weeks_off_chart > 0, "off-chart estimation requires a gap of at least one week");

    let floor = min_chart_units(kind);
    let max_streams = floor.streams * OFF_CHART_CEILING;
    let max_sales = floor.sales * OFF_CHART_CEILING;

    (1..=weeks_off_chart)
        .map(|week| {
            let decay = OFF_CHART_DECAY.powi(week as i32 - 1);
            let bonus = longevity_bonus(weeks_on_chart + week);

            // Floor wins over the ceiling when the two cross.
            let streams = (last.streams * decay).min(max_streams).max(OFF_CHART_STREAMS_FLOOR);
            let sales = (last.sales * decay).min(max_sales).max(OFF_CHART_SALES_FLOOR);

            RawUnits::new(streams * bonus, sales * bonus)
        })
        .sum()
}
