//! nemfuture core: NEM price source resolution, tiered fetching and
//! forecast/settlement reconciliation.
//!
//! - Domain types (tables, tiers, catalogs, raw tables, price points)
//! - Catalog resolution across the historical archive, rolling archive and
//!   current feed with strict tier handoff
//! - As-of / range / latest selection over catalogs and document revisions
//! - Concurrent, cached, cancellable document fetching with a settlement cascade
//! - Transforms from raw NEM rows to forecast and settled price points
//! - Reconciliation of forecasts against settlement into issue-time frames

pub mod config;
pub mod domain;
pub mod engine;
pub mod export;
pub mod reconcile;
pub mod source;
pub mod time;
pub mod transform;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineError};
pub use reconcile::{reconcile, ReconcileOptions, ReconciledRow, ReconciledSeries};
pub use source::{CancelToken, SourceError, SourceQuery};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything handed across fetch worker threads is
    /// Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::RawTable>();
        require_sync::<domain::RawTable>();
        require_send::<domain::SourceCatalog>();
        require_sync::<domain::SourceCatalog>();
        require_send::<domain::SettlementSet>();
        require_sync::<domain::SettlementSet>();
        require_send::<domain::ForecastPoint>();
        require_sync::<domain::ForecastPoint>();

        // Source machinery
        require_send::<SourceError>();
        require_sync::<SourceError>();
        require_send::<CancelToken>();
        require_sync::<CancelToken>();
        require_send::<source::FetchCache>();
        require_sync::<source::FetchCache>();
        require_send::<source::CatalogResolver>();
        require_sync::<source::CatalogResolver>();
        require_send::<source::FetchOrchestrator>();
        require_sync::<source::FetchOrchestrator>();
        require_send::<source::NemwebClient>();
        require_sync::<source::NemwebClient>();

        // Engine
        require_send::<Engine>();
        require_sync::<Engine>();
        require_send::<ReconciledSeries>();
        require_sync::<ReconciledSeries>();
    }

    /// Fetchers only see requests and a cancel token; they cannot reach the
    /// cache or the catalog.
    #[test]
    fn table_fetcher_is_object_safe() {
        fn _check(
            fetcher: &dyn source::TableFetcher,
            request: &source::FetchRequest,
            cancel: &CancelToken,
        ) -> Result<domain::RawTable, SourceError> {
            fetcher.fetch(request, cancel)
        }
    }
}
