//! High-level entry point wiring resolution, fetching, transforms and
//! reconciliation together.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, EngineConfig};
use crate::domain::table::{PREDISPATCHPRICE, TRADINGPRICE};
use crate::domain::{ForecastPoint, RawTable, SettlementSet, SourceCatalog, TableDescriptor};
use crate::reconcile::{reconcile, ReconcileOptions, ReconciledSeries};
use crate::source::{
    CacheStats, CachedFetcher, CancelToken, CatalogResolver, DirectoryLister, FetchCache,
    FetchOrchestrator, FetchProgress, NemwebClient, ResolverSettings, SourceError, SourceQuery,
    TableFetcher,
};
use crate::transform;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Resolves, fetches and reconciles NEM price tables.
pub struct Engine {
    config: EngineConfig,
    resolver: CatalogResolver,
    fetcher: Arc<CachedFetcher<Arc<dyn TableFetcher>>>,
    orchestrator: FetchOrchestrator,
}

impl Engine {
    /// Engine backed by NemWeb over HTTP.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let client = Arc::new(NemwebClient::new(&config.nemweb)?);
        Self::with_sources(config, client.clone(), client)
    }

    /// Engine backed by arbitrary listers and fetchers (fakes in tests).
    pub fn with_sources(
        config: EngineConfig,
        lister: Arc<dyn DirectoryLister>,
        fetcher: Arc<dyn TableFetcher>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let settings = ResolverSettings::from_config(&config)?;
        let cache = FetchCache::new(config.cache.capacity, config.cache.ttl());
        let fetcher = Arc::new(CachedFetcher::new(fetcher, cache));
        let orchestrator = FetchOrchestrator::new(fetcher.clone(), config.fetch.workers);

        tracing::debug!(
            workers = config.fetch.workers,
            cache_capacity = config.cache.capacity,
            tie_break = ?config.catalog.tie_break,
            "engine ready"
        );
        Ok(Self {
            resolver: CatalogResolver::new(lister, settings),
            fetcher,
            orchestrator,
            config,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn FetchProgress>) -> Self {
        self.orchestrator = self.orchestrator.with_progress(progress);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.fetcher.cache().stats()
    }

    /// A fresh token carrying the configured deadline, if any.
    pub fn cancel_token(&self) -> CancelToken {
        match self.config.fetch.deadline() {
            Some(budget) => CancelToken::with_timeout(budget),
            None => CancelToken::new(),
        }
    }

    /// Unified catalog for a logical table name.
    pub fn catalog(&self, table: &str, cancel: &CancelToken) -> Result<SourceCatalog, SourceError> {
        self.resolver.resolve(TableDescriptor::lookup(table)?, cancel)
    }

    /// Raw rows of a logical table answering `query`.
    pub fn table(&self, table: &str, query: SourceQuery, cancel: &CancelToken) -> Result<RawTable, SourceError> {
        let descriptor = TableDescriptor::lookup(table)?;
        let catalog = self.resolver.resolve(descriptor, cancel)?;
        self.orchestrator.fetch_table(descriptor, &catalog, query, cancel)
    }

    /// Settled prices in `(start, end]`, including the mainland FCAS mean.
    pub fn settlement_prices(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        cancel: &CancelToken,
    ) -> Result<SettlementSet, SourceError> {
        let catalog = self.resolver.resolve(&TRADINGPRICE, cancel)?;
        let rows = self
            .orchestrator
            .fetch_settlement(&TRADINGPRICE, &catalog, start, end, cancel)?;
        transform::settlement_set(&rows, true)
    }

    /// Forecasts issued and targeted within `[start, end]`, including the
    /// all-region average.
    pub fn forecast_prices(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        cancel: &CancelToken,
    ) -> Result<Vec<ForecastPoint>, SourceError> {
        let catalog = self.resolver.resolve(&PREDISPATCHPRICE, cancel)?;
        let rows = self
            .orchestrator
            .fetch_forecasts(&PREDISPATCHPRICE, &catalog, start, end, cancel)?;
        transform::forecast_points(&rows, true)
    }

    /// Forecast vs settled comparison for one calendar day.
    ///
    /// Forecasts cover `[day, day + 1d]`; settlement covers
    /// `(day − 30min, day + 2d]` so every forecast interval can be settled.
    pub fn compare_day(
        &self,
        date: NaiveDate,
        options: &ReconcileOptions,
        cancel: &CancelToken,
    ) -> Result<ReconciledSeries, SourceError> {
        let day = date.and_time(NaiveTime::MIN);
        let forecasts = self.forecast_prices(day, day + Duration::days(1), cancel)?;
        let settlement = self.settlement_prices(
            day - Duration::minutes(30),
            day + Duration::days(2),
            cancel,
        )?;

        let series = reconcile(&forecasts, settlement.points(), options);
        tracing::info!(
            %date,
            region = options.region.as_deref().unwrap_or("all"),
            forecasts = forecasts.len(),
            settled = settlement.len(),
            rows = series.len(),
            "day compared"
        );
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FetchRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoListings;

    impl DirectoryLister for NoListings {
        fn links(&self, url: &str, _cancel: &CancelToken) -> Result<Vec<String>, SourceError> {
            Err(SourceError::fetch(url, "offline"))
        }
    }

    struct Counting(AtomicUsize);

    impl TableFetcher for Counting {
        fn fetch(&self, _request: &FetchRequest, _cancel: &CancelToken) -> Result<RawTable, SourceError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(RawTable::new(
                vec!["SETTLEMENTDATE".into(), "REGIONID".into(), "RRP".into()],
                vec![vec!["2020/01/10 12:00:00".into(), "NSW1".into(), "42".into()]],
            ))
        }
    }

    fn pinned() -> EngineConfig {
        EngineConfig::from_toml("[archive]\nearliest_month = \"2020-01\"\nlatest_month = \"2020-01\"\n").unwrap()
    }

    #[test]
    fn unknown_table_is_reported() {
        let engine = Engine::with_sources(pinned(), Arc::new(NoListings), Arc::new(Counting(AtomicUsize::new(0)))).unwrap();
        assert!(matches!(
            engine.catalog("NOPE", &engine.cancel_token()),
            Err(SourceError::UnknownTable(_))
        ));
    }

    #[test]
    fn repeated_queries_hit_the_cache() {
        let engine = Engine::with_sources(pinned(), Arc::new(NoListings), Arc::new(Counting(AtomicUsize::new(0)))).unwrap();
        let at = crate::time::parse_field("2020/01/10 12:30:00").unwrap();
        let cancel = engine.cancel_token();

        let first = engine.table("TRADINGPRICE", SourceQuery::AsOf(at), &cancel).unwrap();
        let second = engine.table("TRADINGPRICE", SourceQuery::AsOf(at), &cancel).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(engine.cache_stats().downloads, 1);
        assert!(engine.cache_stats().hits >= 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.fetch.workers = 0;
        assert!(matches!(
            Engine::with_sources(config, Arc::new(NoListings), Arc::new(Counting(AtomicUsize::new(0)))),
            Err(EngineError::Config(_))
        ));
    }
}
