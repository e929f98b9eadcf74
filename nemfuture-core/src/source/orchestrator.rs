//! Multi-tier fetch orchestration.
//!
//! Three entry points share one document fetcher:
//! - [`FetchOrchestrator::fetch_table`] answers an as-of / range / latest query;
//! - [`FetchOrchestrator::fetch_settlement`] runs the tier cascade for settled
//!   prices, falling back to fresher tiers while data is incomplete;
//! - [`FetchOrchestrator::fetch_forecasts`] unions every document overlapping
//!   a window.
//!
//! Documents of one plan are fetched on a private rayon pool and merged in
//! plan order, so results never depend on completion order.

use chrono::{Duration, NaiveDateTime};
use rayon::prelude::*;
use std::sync::Arc;

use super::cancel::CancelToken;
use super::locate::{self, SourceQuery};
use super::provider::{FetchProgress, FetchRequest, SilentProgress, SourceError, TableFetcher};
use crate::domain::tier::distinct_urls;
use crate::domain::{RawTable, SourceCatalog, SourceRecord, TableDescriptor, Tier};
use crate::time;

/// Column used as the secondary sort key of merged tables.
const REGION_COLUMN: &str = "REGIONID";

/// Date slack when matching documents to a window.
fn slack() -> Duration {
    Duration::days(1)
}

/// Outcome of fetching every document in a plan.
#[derive(Debug, Default)]
pub struct Batch {
    /// Successful documents concatenated in plan order.
    pub table: RawTable,
    pub failures: Vec<(String, SourceError)>,
    pub documents: usize,
}

impl Batch {
    pub fn succeeded(&self) -> usize {
        self.documents - self.failures.len()
    }

    /// The table, or the first failure if any document failed.
    pub fn into_result(self) -> Result<RawTable, SourceError> {
        match self.failures.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(self.table),
        }
    }
}

/// States of the settlement cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    TryHistoricalArchive,
    TryDailyPublished,
    TryRecentFeed,
    Done,
    Failed,
}

impl CascadeState {
    /// Tier consulted in this state.
    pub fn tier(self) -> Option<Tier> {
        match self {
            CascadeState::TryHistoricalArchive => Some(Tier::HistoricalArchive),
            CascadeState::TryDailyPublished => Some(Tier::RollingArchive),
            CascadeState::TryRecentFeed => Some(Tier::Current),
            CascadeState::Done | CascadeState::Failed => None,
        }
    }

    /// State after an unsuccessful attempt.
    fn fallback(self) -> Self {
        match self {
            CascadeState::TryHistoricalArchive => CascadeState::TryDailyPublished,
            CascadeState::TryDailyPublished => CascadeState::TryRecentFeed,
            _ => CascadeState::Failed,
        }
    }
}

/// Result of one cascade attempt.
#[derive(Debug)]
pub enum Attempt {
    /// Rows that, together with earlier tiers, cover the window.
    Complete(RawTable),
    /// Usable rows that still leave part of the window uncovered.
    Incomplete { rows: RawTable, error: SourceError },
    Failed(SourceError),
}

/// Fetches documents for catalog queries with tier fallback.
pub struct FetchOrchestrator {
    fetcher: Arc<dyn TableFetcher>,
    pool: Option<rayon::ThreadPool>,
    progress: Arc<dyn FetchProgress>,
}

impl FetchOrchestrator {
    /// Orchestrator fetching up to `workers` documents at a time.
    pub fn new(fetcher: Arc<dyn TableFetcher>, workers: usize) -> Self {
        let pool = if workers > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("nemfuture-fetch-{i}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::warn!(error = %e, "fetch pool unavailable; fetching sequentially");
                    None
                }
            }
        } else {
            None
        };

        Self {
            fetcher,
            pool,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn FetchProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Fetch every record's document for one table.
    ///
    /// Fails only on cancellation; per-document errors are collected in the batch.
    pub fn fetch_documents(
        &self,
        table: &TableDescriptor,
        records: &[&SourceRecord],
        as_of: Option<NaiveDateTime>,
        cancel: &CancelToken,
    ) -> Result<Batch, SourceError> {
        cancel.check()?;
        let total = records.len();

        let fetch_one = |(index, record): (usize, &&SourceRecord)| {
            let url = record.url.clone();
            self.progress.on_start(&url, index, total);
            let result = cancel.check().and_then(|()| {
                let request = FetchRequest::new(url.as_str(), table.filter_token).with_as_of(as_of);
                self.fetcher.fetch(&request, cancel)
            });
            let summary = match &result {
                Ok(t) => Ok(t.len()),
                Err(e) => Err(e.clone()),
            };
            self.progress.on_complete(&url, index, total, &summary);
            (url, result)
        };

        let results: Vec<(String, Result<RawTable, SourceError>)> = match &self.pool {
            Some(pool) => pool.install(|| records.par_iter().enumerate().map(fetch_one).collect()),
            None => records.iter().enumerate().map(fetch_one).collect(),
        };

        let mut batch = Batch {
            documents: total,
            ..Batch::default()
        };
        for (url, result) in results {
            match result {
                Ok(part) => batch.table.append(part),
                Err(SourceError::Canceled) => return Err(SourceError::Canceled),
                Err(e) => batch.failures.push((url, e)),
            }
        }

        self.progress
            .on_batch_complete(batch.succeeded(), batch.failures.len(), total);
        Ok(batch)
    }

    /// Answer a catalog query for one table.
    ///
    /// `AsOf` keeps the revision nearest-preceding the moment, `Range` keeps
    /// rows inside the window, `Latest` keeps the newest revision. A range
    /// that selects no document is answered as of its end.
    pub fn fetch_table(
        &self,
        table: &TableDescriptor,
        catalog: &SourceCatalog,
        query: SourceQuery,
        cancel: &CancelToken,
    ) -> Result<RawTable, SourceError> {
        let (effective, records) = locate::select(catalog, table.name, query)?;
        let records = distinct_urls(records);
        let as_of = match effective {
            SourceQuery::AsOf(t) => Some(t),
            _ => None,
        };

        if let Some(tier) = records.first().map(|r| r.tier) {
            self.progress.on_plan(tier, records.len());
        }
        let mut rows = self.fetch_documents(table, &records, as_of, cancel)?.into_result()?;
        if rows.is_empty() {
            return Ok(rows);
        }

        let column = table.slice_column;
        match effective {
            SourceQuery::AsOf(t) => locate::select_revision(&mut rows, column, t)?,
            SourceQuery::Range { start, end } => {
                rows.retain_by_timestamp(column, |t| t >= start && t <= end)?
            }
            SourceQuery::Latest => locate::select_latest(&mut rows, column)?,
        }
        rows.dedup_rows();

        tracing::info!(table = table.name, query = ?effective, rows = rows.len(), "table fetched");
        Ok(rows)
    }

    /// Settled rows covering `(start, end]`, cascading across tiers.
    pub fn fetch_settlement(
        &self,
        table: &TableDescriptor,
        catalog: &SourceCatalog,
        start: NaiveDateTime,
        end: NaiveDateTime,
        cancel: &CancelToken,
    ) -> Result<RawTable, SourceError> {
        let column = table.slice_column;
        let mut collected = RawTable::default();
        // Documents are matched to the window with a day of slack either side:
        // document dates sit on market days, rows on dispatch intervals.
        let mut window = (start - slack(), end + slack());
        let mut last_error: Option<SourceError> = None;
        let mut state = CascadeState::TryHistoricalArchive;

        loop {
            let tier = match state {
                CascadeState::Done => break,
                CascadeState::Failed => {
                    return Err(SourceError::SourceExhausted {
                        table: table.name.to_string(),
                        last: last_error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "no tier attempted".into()),
                    })
                }
                s => match s.tier() {
                    Some(tier) => tier,
                    None => break,
                },
            };
            cancel.check()?;

            let attempt =
                self.attempt_tier(table, catalog, tier, window, &collected, (start, end), cancel)?;
            state = match attempt {
                Attempt::Complete(rows) => {
                    tracing::info!(%tier, rows = rows.len(), "settlement window covered");
                    collected.append(rows);
                    CascadeState::Done
                }
                Attempt::Incomplete { rows, error } => {
                    tracing::info!(%tier, rows = rows.len(), reason = %error, "falling back to fresher tier");
                    collected.append(rows);
                    last_error = Some(error);
                    state.fallback()
                }
                Attempt::Failed(error) if !error.is_recoverable() => return Err(error),
                Attempt::Failed(error) => {
                    tracing::warn!(%tier, error = %error, "tier attempt failed");
                    last_error = Some(error);
                    state.fallback()
                }
            };

            if let Some((_, max)) = collected.timestamp_bounds(column) {
                window = (max - slack(), end + slack());
            }
        }

        collected.retain_by_timestamp(column, |t| t > start && t <= end)?;
        collected.sort_by_timestamp(column, Some(REGION_COLUMN))?;
        collected.dedup_rows();
        Ok(collected)
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt_tier(
        &self,
        table: &TableDescriptor,
        catalog: &SourceCatalog,
        tier: Tier,
        window: (NaiveDateTime, NaiveDateTime),
        collected: &RawTable,
        needed: (NaiveDateTime, NaiveDateTime),
        cancel: &CancelToken,
    ) -> Result<Attempt, SourceError> {
        let column = table.slice_column;
        let needed_text = describe(Some(needed));
        let (lo, hi) = window;
        let records = distinct_urls(
            catalog
                .tier_records(tier)
                .filter(|r| r.covered >= lo && r.covered <= hi),
        );
        if records.is_empty() {
            return Ok(Attempt::Failed(SourceError::IncompleteData {
                tier,
                covered: "no documents".into(),
                needed: needed_text,
            }));
        }

        self.progress.on_plan(tier, records.len());
        let batch = self.fetch_documents(table, &records, None, cancel)?;
        for (url, e) in &batch.failures {
            tracing::warn!(%tier, url, error = %e, "document failed");
        }
        let Batch {
            table: mut rows,
            failures,
            ..
        } = batch;

        if rows.is_empty() {
            let error = failures
                .into_iter()
                .next()
                .map(|(_, e)| e)
                .unwrap_or_else(|| SourceError::IncompleteData {
                    tier,
                    covered: "no rows".into(),
                    needed: needed_text.clone(),
                });
            return Ok(Attempt::Failed(error));
        }

        if let Err(e) = coerce(&mut rows, column) {
            return Ok(Attempt::Failed(e));
        }
        if tier == Tier::Current {
            return Ok(Attempt::Complete(rows));
        }

        let bounds = merge_bounds(
            collected.timestamp_bounds(column),
            rows.timestamp_bounds(column),
        );
        if covers(bounds, needed) {
            Ok(Attempt::Complete(rows))
        } else {
            Ok(Attempt::Incomplete {
                rows,
                error: SourceError::IncompleteData {
                    tier,
                    covered: describe(bounds),
                    needed: needed_text,
                },
            })
        }
    }

    /// Forecast rows issued and targeted within `[start, end]`, from every
    /// document overlapping the window.
    pub fn fetch_forecasts(
        &self,
        table: &TableDescriptor,
        catalog: &SourceCatalog,
        start: NaiveDateTime,
        end: NaiveDateTime,
        cancel: &CancelToken,
    ) -> Result<RawTable, SourceError> {
        let (lo, hi) = (start - slack(), end + slack());
        let records = distinct_urls(
            catalog
                .records()
                .iter()
                .filter(|r| r.covered >= lo && r.covered <= hi),
        );
        if records.is_empty() {
            tracing::warn!(table = table.name, %start, %end, "no forecast documents overlap window");
            return Ok(RawTable::default());
        }

        for tier in Tier::ALL {
            let n = records.iter().filter(|r| r.tier == tier).count();
            if n > 0 {
                self.progress.on_plan(tier, n);
            }
        }

        let batch = self.fetch_documents(table, &records, None, cancel)?;
        if batch.succeeded() == 0 {
            return batch.into_result();
        }
        for (url, e) in &batch.failures {
            tracing::warn!(url, error = %e, "forecast document skipped");
        }

        let mut rows = batch.table;
        rows.retain_by_timestamp(table.slice_column, |t| t >= start && t <= end)?;
        rows.retain_by_timestamp("DATETIME", |t| t >= start && t <= end)?;
        rows.sort_by_timestamp(table.slice_column, Some(REGION_COLUMN))?;
        rows.dedup_rows();
        Ok(rows)
    }
}

/// Drop rows whose timestamp doesn't parse, then duplicates.
fn coerce(rows: &mut RawTable, column: &str) -> Result<(), SourceError> {
    rows.retain_by_timestamp(column, |_| true)?;
    rows.dedup_rows();
    Ok(())
}

fn merge_bounds(
    a: Option<(NaiveDateTime, NaiveDateTime)>,
    b: Option<(NaiveDateTime, NaiveDateTime)>,
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    match (a, b) {
        (Some((a0, a1)), Some((b0, b1))) => Some((a0.min(b0), a1.max(b1))),
        (x, None) | (None, x) => x,
    }
}

/// Data reaches `end` and starts within one dispatch interval of `start`.
fn covers(bounds: Option<(NaiveDateTime, NaiveDateTime)>, (start, end): (NaiveDateTime, NaiveDateTime)) -> bool {
    bounds.is_some_and(|(min, max)| {
        max >= end && min <= start + Duration::minutes(time::DISPATCH_MINUTES)
    })
}

fn describe(bounds: Option<(NaiveDateTime, NaiveDateTime)>) -> String {
    match bounds {
        Some((a, b)) => format!("{} .. {}", time::format_field(a), time::format_field(b)),
        None => "nothing".into(),
    }
}
