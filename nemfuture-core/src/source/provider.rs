//! Collaborator traits and structured error types.
//!
//! `DirectoryLister` and `TableFetcher` abstract over NemWeb so the resolver and
//! orchestrator can be driven by in-memory fakes in tests. The cache layer wraps
//! a fetcher; fetchers don't know about the cache.

use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;

use super::cancel::CancelToken;
use super::listing;
use crate::domain::{RawTable, Tier};

/// Structured errors for source resolution and fetching.
///
/// Displayable as-is in CLI output.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("no source documents exist for table '{table}'")]
    EmptyCatalog { table: String },

    #[error("no snapshot at or before {as_of} (earliest available is {earliest})")]
    NoPriorSnapshot {
        as_of: NaiveDateTime,
        earliest: String,
    },

    #[error("{tier} data incomplete: covers {covered}, needed {needed}")]
    IncompleteData {
        tier: Tier,
        covered: String,
        needed: String,
    },

    #[error("every source tier failed for '{table}': {last}")]
    SourceExhausted { table: String, last: String },

    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("canceled")]
    Canceled,

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("table has no column '{column}'")]
    MissingColumn { column: String },
}

impl SourceError {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        SourceError::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the cascade may recover from this error by trying another tier.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SourceError::IncompleteData { .. }
                | SourceError::Fetch { .. }
                | SourceError::MissingColumn { .. }
        )
    }
}

/// One dated link from a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub date: NaiveDateTime,
    pub link: String,
}

/// Directory index access (NemWeb `Reports/...` pages, the MMSDM index).
pub trait DirectoryLister: Send + Sync {
    /// Every link on the index page, absolutised.
    fn links(&self, directory_url: &str, cancel: &CancelToken) -> Result<Vec<String>, SourceError>;

    /// Dated archive documents on the index page, ordered by date, one per date.
    fn list(&self, directory_url: &str, cancel: &CancelToken) -> Result<Vec<ListingEntry>, SourceError> {
        Ok(listing::dated_entries(self.links(directory_url, cancel)?))
    }
}

/// A single document fetch: the table rows of one archive, optionally at a revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub url: String,
    /// Index of the column holding the report name (2 in NEM CSV files).
    pub filter_column: usize,
    /// Report name whose rows are wanted, e.g. `REGION_PRICES`.
    pub filter_value: String,
    /// Pick the embedded file nearest-preceding this moment.
    pub as_of: Option<NaiveDateTime>,
}

impl FetchRequest {
    pub const NEM_FILTER_COLUMN: usize = 2;

    pub fn new(url: impl Into<String>, filter_value: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filter_column: Self::NEM_FILTER_COLUMN,
            filter_value: filter_value.into(),
            as_of: None,
        }
    }

    pub fn with_as_of(mut self, as_of: Option<NaiveDateTime>) -> Self {
        self.as_of = as_of;
        self
    }
}

/// Downloads a document and extracts one table from it.
///
/// Implementations must be pure functions of the request: the same request
/// always yields the same table, which is what makes memoization safe.
pub trait TableFetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest, cancel: &CancelToken) -> Result<RawTable, SourceError>;
}

impl<T: TableFetcher + ?Sized> TableFetcher for Arc<T> {
    fn fetch(&self, request: &FetchRequest, cancel: &CancelToken) -> Result<RawTable, SourceError> {
        (**self).fetch(request, cancel)
    }
}

/// Progress callbacks for multi-document fetches.
///
/// `total` is the planned document count at the time of the call; a fallback
/// can change the plan, so totals are not monotonic.
pub trait FetchProgress: Send + Sync {
    fn on_plan(&self, tier: Tier, total: usize);

    fn on_start(&self, url: &str, index: usize, total: usize);

    fn on_complete(&self, url: &str, index: usize, total: usize, result: &Result<usize, SourceError>);

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that logs through `tracing`.
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_plan(&self, tier: Tier, total: usize) {
        tracing::info!(%tier, documents = total, "fetch plan");
    }

    fn on_start(&self, url: &str, index: usize, total: usize) {
        tracing::debug!(url, "[{}/{}] fetching", index + 1, total);
    }

    fn on_complete(
        &self,
        url: &str,
        _index: usize,
        _total: usize,
        result: &Result<usize, SourceError>,
    ) {
        match result {
            Ok(rows) => tracing::debug!(url, rows, "fetched"),
            Err(e) => tracing::warn!(url, error = %e, "fetch failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(succeeded, failed, total, "documents fetched");
    }
}

/// Progress reporter that discards everything.
pub struct SilentProgress;

impl FetchProgress for SilentProgress {
    fn on_plan(&self, _tier: Tier, _total: usize) {}

    fn on_start(&self, _url: &str, _index: usize, _total: usize) {}

    fn on_complete(
        &self,
        _url: &str,
        _index: usize,
        _total: usize,
        _result: &Result<usize, SourceError>,
    ) {
    }

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}
