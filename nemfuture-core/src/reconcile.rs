//! Forecast vs settled price reconciliation.
//!
//! Forecasts target 30-minute trading intervals; settlement is published per
//! 5-minute dispatch interval. Each forecast is spread over the dispatch marks
//! of its interval, actuals are replicated into every issue-time frame, and the
//! two are outer-joined on `(issued_at, interval5, region, market)`.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{ActualPoint, ForecastPoint, Market};
use crate::time;

/// Dispatch marks in one trading interval: every 5-minute mark in
/// `(T - 30min, T]` has `interval30 == T`.
pub const FORECAST_MARKS: i64 = 6;

/// Which slice of the data to reconcile and how strictly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Region to keep (`NSW`, `AVG`, ...); `None` keeps every region.
    pub region: Option<String>,
    /// Market to keep; `None` keeps every market.
    pub market: Option<Market>,
    /// When false, rows whose interval precedes their issue time are dropped.
    pub keep_all: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            region: None,
            market: None,
            keep_all: true,
        }
    }
}

impl ReconcileOptions {
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    pub fn with_market(mut self, market: Market) -> Self {
        self.market = Some(market);
        self
    }

    pub fn strict(mut self) -> Self {
        self.keep_all = false;
        self
    }

    fn wants(&self, region: &str, market: Market) -> bool {
        self.region
            .as_deref()
            .map_or(true, |r| r.eq_ignore_ascii_case(region))
            && self.market.map_or(true, |m| m == market)
    }
}

/// One joined row of a reconciled series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledRow {
    pub issued_at: NaiveDateTime,
    pub interval5: NaiveDateTime,
    pub interval30: NaiveDateTime,
    pub region: String,
    pub market: Market,
    pub forecast_price: Option<f64>,
    pub settled_5min: Option<f64>,
    pub settled_30min: Option<f64>,
}

impl ReconciledRow {
    fn empty(issued_at: NaiveDateTime, interval5: NaiveDateTime, interval30: NaiveDateTime, region: &str, market: Market) -> Self {
        Self {
            issued_at,
            interval5,
            interval30,
            region: region.to_string(),
            market,
            forecast_price: None,
            settled_5min: None,
            settled_30min: None,
        }
    }

    pub fn has_settlement(&self) -> bool {
        self.settled_5min.is_some() || self.settled_30min.is_some()
    }

    /// Frame key of this row's issue time (`YYYYMMDD HH:MM`).
    pub fn frame_label(&self) -> String {
        time::frame_label(self.issued_at)
    }
}

/// Reconciled rows sorted by `(interval5, interval30, issued_at)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciledSeries {
    rows: Vec<ReconciledRow>,
}

impl ReconciledSeries {
    pub fn rows(&self) -> &[ReconciledRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<ReconciledRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct issue times, ascending.
    pub fn issue_times(&self) -> Vec<NaiveDateTime> {
        self.rows
            .iter()
            .map(|r| r.issued_at)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rows of one issue-time frame, in series order.
    pub fn frame(&self, issued_at: NaiveDateTime) -> Vec<&ReconciledRow> {
        self.rows.iter().filter(|r| r.issued_at == issued_at).collect()
    }

    /// Every frame keyed by issue time.
    pub fn frames(&self) -> BTreeMap<NaiveDateTime, Vec<&ReconciledRow>> {
        let mut frames: BTreeMap<NaiveDateTime, Vec<&ReconciledRow>> = BTreeMap::new();
        for row in &self.rows {
            frames.entry(row.issued_at).or_default().push(row);
        }
        frames
    }

    /// Frame labels in issue-time order.
    pub fn frame_labels(&self) -> Vec<String> {
        self.issue_times().into_iter().map(time::frame_label).collect()
    }

    /// Latest settled interval within a frame.
    pub fn settlement_frontier(&self, issued_at: NaiveDateTime) -> Option<NaiveDateTime> {
        self.rows
            .iter()
            .filter(|r| r.issued_at == issued_at && r.has_settlement())
            .map(|r| r.interval5)
            .max()
    }
}

/// Dispatch marks covered by a forecast for `target`, ascending.
pub fn forecast_marks(target: NaiveDateTime) -> impl Iterator<Item = NaiveDateTime> {
    (0..FORECAST_MARKS)
        .rev()
        .map(move |k| target - Duration::minutes(k * time::DISPATCH_MINUTES))
}

/// Whether a joined row is worth presenting.
///
/// Rows carrying any value are kept. A row with neither a forecast nor a
/// settled price is kept only at or after its frame's settlement frontier,
/// or anywhere in a frame with no settlement yet.
fn retained(row: &ReconciledRow, frontier: Option<NaiveDateTime>) -> bool {
    row.forecast_price.is_some()
        || row.has_settlement()
        || frontier.map_or(true, |f| row.interval5 >= f)
}

type JoinKey = (NaiveDateTime, NaiveDateTime, String, Market);

/// Join forecasts and actuals into an issue-time-sliceable series.
///
/// Forecasts whose target is not after their issue time are discarded; when
/// several forecasts share a key the last one wins. Without any forecast
/// the frames are the settled intervals themselves.
pub fn reconcile(forecasts: &[ForecastPoint], actuals: &[ActualPoint], options: &ReconcileOptions) -> ReconciledSeries {
    let mut joined: BTreeMap<JoinKey, ReconciledRow> = BTreeMap::new();
    let mut discarded = 0usize;

    for point in forecasts.iter().filter(|p| options.wants(&p.region, p.market)) {
        if !point.is_future() {
            discarded += 1;
            continue;
        }
        for interval5 in forecast_marks(point.target_interval) {
            let row = joined
                .entry((point.issued_at, interval5, point.region.clone(), point.market))
                .or_insert_with(|| {
                    ReconciledRow::empty(point.issued_at, interval5, point.target_interval, &point.region, point.market)
                });
            row.forecast_price = point.price;
        }
    }

    let actuals: Vec<&ActualPoint> = actuals
        .iter()
        .filter(|a| options.wants(&a.region, a.market))
        .collect();

    let mut frames: BTreeSet<NaiveDateTime> = joined.keys().map(|k| k.0).collect();
    if frames.is_empty() {
        frames = actuals.iter().map(|a| a.interval5).collect();
    }

    for &issued_at in &frames {
        for actual in &actuals {
            let row = joined
                .entry((issued_at, actual.interval5, actual.region.clone(), actual.market))
                .or_insert_with(|| {
                    ReconciledRow::empty(issued_at, actual.interval5, actual.interval30, &actual.region, actual.market)
                });
            row.settled_5min = Some(actual.settled_5min);
            row.settled_30min = Some(actual.settled_30min);
        }
    }

    let mut frontiers: BTreeMap<NaiveDateTime, NaiveDateTime> = BTreeMap::new();
    for row in joined.values().filter(|r| r.has_settlement()) {
        let frontier = frontiers.entry(row.issued_at).or_insert(row.interval5);
        *frontier = (*frontier).max(row.interval5);
    }

    let mut rows: Vec<ReconciledRow> = joined
        .into_values()
        .filter(|row| retained(row, frontiers.get(&row.issued_at).copied()))
        .filter(|row| options.keep_all || row.interval5 >= row.issued_at)
        .collect();

    rows.sort_by(|a, b| {
        (a.interval5, a.interval30, a.issued_at, &a.region, a.market)
            .cmp(&(b.interval5, b.interval30, b.issued_at, &b.region, b.market))
    });

    tracing::debug!(
        frames = frames.len(),
        rows = rows.len(),
        discarded,
        "reconciled series"
    );
    ReconciledSeries { rows }
}
