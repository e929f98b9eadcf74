//! Unified source catalog across the three publication tiers.
//!
//! Tiers are consulted most mature first. Each later tier only contributes
//! dates strictly after everything already accepted, so the merged catalog is
//! time-disjoint per tier.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use std::sync::{Arc, Mutex, PoisonError};

use super::cancel::CancelToken;
use super::listing;
use super::provider::{DirectoryLister, SourceError};
use crate::config::EngineConfig;
use crate::domain::{SourceCatalog, SourceRecord, TableDescriptor, TieBreak, Tier};
use crate::time;

/// First and last published months of the historical archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveBounds {
    /// First day of the earliest month.
    pub earliest: NaiveDate,
    /// First day of the latest month.
    pub latest: NaiveDate,
}

impl ArchiveBounds {
    /// Last calendar day covered by the latest month.
    pub fn last_day(&self) -> NaiveDate {
        next_month(self.latest).pred_opt().unwrap_or(self.latest)
    }
}

fn next_month(first: NaiveDate) -> NaiveDate {
    let (y, m) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(first)
}

/// Where each tier lives and how ties are broken.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub base_url: String,
    pub archive_root: String,
    pub earliest_month: Option<NaiveDate>,
    pub latest_month: Option<NaiveDate>,
    pub tie_break: TieBreak,
}

impl ResolverSettings {
    pub fn from_config(config: &EngineConfig) -> Result<Self, crate::config::ConfigError> {
        Ok(Self {
            base_url: config.nemweb.base_url.trim_end_matches('/').to_string(),
            archive_root: config.nemweb.archive_root.trim_end_matches('/').to_string(),
            earliest_month: config.archive.earliest()?,
            latest_month: config.archive.latest()?,
            tie_break: config.catalog.tie_break,
        })
    }

    pub fn rolling_url(&self, table: &TableDescriptor) -> String {
        format!("{}/Reports/Archive/{}/", self.base_url, table.rolling_folder)
    }

    pub fn current_url(&self, table: &TableDescriptor) -> String {
        format!("{}/Reports/Current/{}/", self.base_url, table.current_folder)
    }

    /// Monthly historical-archive document for a table.
    pub fn historical_url(&self, table_id: &str, folder: &str, month: NaiveDate) -> String {
        let (y, m) = (month.year(), month.month());
        format!(
            "{root}/{y}/MMSDM_{y}_{m:02}/MMSDM_Historical_Data_SQLLoader/{folder}/PUBLIC_DVD_{table_id}_{y}{m:02}010000.zip",
            root = self.archive_root,
        )
    }
}

/// Builds a [`SourceCatalog`] for a logical table.
pub struct CatalogResolver {
    lister: Arc<dyn DirectoryLister>,
    settings: ResolverSettings,
    discovered: Mutex<Option<ArchiveBounds>>,
}

impl CatalogResolver {
    pub fn new(lister: Arc<dyn DirectoryLister>, settings: ResolverSettings) -> Self {
        Self {
            lister,
            settings,
            discovered: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve every tier into one deduplicated, ascending catalog.
    ///
    /// A failed tier listing counts as empty; cancellation aborts the whole
    /// resolution.
    pub fn resolve(&self, table: &TableDescriptor, cancel: &CancelToken) -> Result<SourceCatalog, SourceError> {
        let mut tiers = Vec::with_capacity(Tier::ALL.len());
        for tier in Tier::ALL {
            cancel.check()?;
            match self.candidates(table, tier, cancel) {
                Ok(records) => {
                    tracing::debug!(table = table.name, %tier, candidates = records.len(), "tier listed");
                    tiers.push((tier, records));
                }
                Err(SourceError::Canceled) => return Err(SourceError::Canceled),
                Err(e) => {
                    tracing::warn!(table = table.name, %tier, error = %e, "tier listing failed; treating as empty");
                }
            }
        }

        let catalog = merge_tiers(tiers, self.settings.tie_break);
        if catalog.is_empty() {
            return Err(SourceError::EmptyCatalog {
                table: table.name.to_string(),
            });
        }

        tracing::info!(
            table = table.name,
            records = catalog.len(),
            first = %catalog.first().map(|r| r.covered).unwrap_or_default(),
            last = %catalog.last().map(|r| r.covered).unwrap_or_default(),
            "resolved catalog"
        );
        Ok(catalog)
    }

    /// Candidate records published by one tier, before handoff.
    pub fn candidates(
        &self,
        table: &TableDescriptor,
        tier: Tier,
        cancel: &CancelToken,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        match tier {
            Tier::HistoricalArchive => self.historical_records(table, cancel),
            Tier::RollingArchive => self.listed_records(&self.settings.rolling_url(table), tier, cancel),
            Tier::Current => self.listed_records(&self.settings.current_url(table), tier, cancel),
        }
    }

    fn listed_records(&self, url: &str, tier: Tier, cancel: &CancelToken) -> Result<Vec<SourceRecord>, SourceError> {
        Ok(self
            .lister
            .list(url, cancel)?
            .into_iter()
            .map(|entry| SourceRecord::new(entry.date, tier, entry.link))
            .collect())
    }

    /// One record per calendar day of the archive, pointing at its month's file.
    fn historical_records(&self, table: &TableDescriptor, cancel: &CancelToken) -> Result<Vec<SourceRecord>, SourceError> {
        let Some(table_id) = table.archive_table_id else {
            return Ok(Vec::new());
        };
        let bounds = self.archive_bounds(cancel)?;
        let folder = table.time_frame.archive_folder();

        let mut records = Vec::new();
        let mut month = bounds.earliest;
        while month <= bounds.latest {
            let url = self.settings.historical_url(table_id, folder, month);
            let end = next_month(month);
            if end == month {
                break;
            }
            let mut day = month;
            while day < end {
                records.push(SourceRecord::new(
                    time::market_day_start(day),
                    Tier::HistoricalArchive,
                    url.clone(),
                ));
                day += Duration::days(1);
            }
            month = end;
        }
        Ok(records)
    }

    /// Archive month range: configured pins, else discovered from the index.
    ///
    /// Successful discoveries are remembered for the resolver's lifetime.
    pub fn archive_bounds(&self, cancel: &CancelToken) -> Result<ArchiveBounds, SourceError> {
        if let (Some(earliest), Some(latest)) = (self.settings.earliest_month, self.settings.latest_month) {
            return Ok(ArchiveBounds { earliest, latest });
        }

        let mut cached = self.discovered.lock().unwrap_or_else(PoisonError::into_inner);
        let discovered = match *cached {
            Some(bounds) => bounds,
            None => {
                let bounds = self.discover_bounds(cancel)?;
                tracing::info!(earliest = %bounds.earliest, latest = %bounds.latest, "archive bounds discovered");
                *cached = Some(bounds);
                bounds
            }
        };

        Ok(ArchiveBounds {
            earliest: self.settings.earliest_month.unwrap_or(discovered.earliest),
            latest: self.settings.latest_month.unwrap_or(discovered.latest),
        })
    }

    fn discover_bounds(&self, cancel: &CancelToken) -> Result<ArchiveBounds, SourceError> {
        let root = format!("{}/", self.settings.archive_root);
        let years = listing::archive_years(&self.lister.links(&root, cancel)?);
        let (Some(&first_year), Some(&last_year)) = (years.first(), years.last()) else {
            return Err(SourceError::fetch(root, "no archive years published"));
        };

        let month_of = |year: i32, pick_last: bool| -> Result<NaiveDate, SourceError> {
            let url = format!("{}/{}/", self.settings.archive_root, year);
            let months = listing::archive_months(&self.lister.links(&url, cancel)?, year);
            let month = if pick_last { months.last() } else { months.first() };
            month
                .and_then(|&m| NaiveDate::from_ymd_opt(year, m, 1))
                .ok_or_else(|| SourceError::fetch(url, "no archive months published"))
        };

        Ok(ArchiveBounds {
            earliest: month_of(first_year, false)?,
            latest: month_of(last_year, true)?,
        })
    }
}

/// Merge per-tier candidates with strict monotonic handoff.
///
/// `tiers` must be ordered most mature first. A candidate survives only if its
/// covered date is after every date accepted from earlier tiers.
pub fn merge_tiers(tiers: Vec<(Tier, Vec<SourceRecord>)>, tie_break: TieBreak) -> SourceCatalog {
    let mut accepted = Vec::new();
    let mut frontier: Option<NaiveDateTime> = None;

    for (tier, candidates) in tiers {
        let before = candidates.len();
        let kept: Vec<SourceRecord> = candidates
            .into_iter()
            .filter(|r| frontier.map_or(true, |f| r.covered > f))
            .collect();
        if kept.len() < before {
            tracing::debug!(%tier, dropped = before - kept.len(), "handoff dropped covered dates");
        }
        if let Some(max) = kept.iter().map(|r| r.covered).max() {
            frontier = Some(frontier.map_or(max, |f| f.max(max)));
        }
        accepted.extend(kept);
    }

    SourceCatalog::from_records(accepted, tie_break)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::table::{PREDISPATCHPRICE, TRADINGPRICE};
    use crate::domain::TABLES;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLister {
        pages: HashMap<String, Vec<String>>,
    }

    impl DirectoryLister for FakeLister {
        fn links(&self, url: &str, _cancel: &CancelToken) -> Result<Vec<String>, SourceError> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| SourceError::fetch(url, "404"))
        }
    }

    /// Lister whose first request runs past the caller's deadline.
    #[derive(Default)]
    struct StallingLister {
        calls: AtomicUsize,
    }

    impl DirectoryLister for StallingLister {
        fn links(&self, _url: &str, cancel: &CancelToken) -> Result<Vec<String>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            cancel.cancel();
            cancel.check().map(|()| Vec::new())
        }
    }

    fn settings(pinned: bool) -> ResolverSettings {
        ResolverSettings {
            base_url: "https://h".into(),
            archive_root: "https://h/MMSDM".into(),
            earliest_month: pinned.then(|| NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
            latest_month: pinned.then(|| NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
            tie_break: TieBreak::PreferMature,
        }
    }

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn historical_url_template() {
        let url = settings(true).historical_url(
            "PREDISPATCHPRICE",
            "PREDISP_ALL_DATA",
            NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
        );
        assert_eq!(
            url,
            "https://h/MMSDM/2020/MMSDM_2020_03/MMSDM_Historical_Data_SQLLoader/PREDISP_ALL_DATA/PUBLIC_DVD_PREDISPATCHPRICE_202003010000.zip"
        );
    }

    #[test]
    fn resolve_with_pinned_archive_and_listed_tiers() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://h/Reports/Archive/TradingIS_Reports/".to_string(),
            vec![
                "https://h/Reports/Archive/TradingIS_Reports/PUBLIC_TRADINGIS_20200125_20200131.zip".into(),
                "https://h/Reports/Archive/TradingIS_Reports/PUBLIC_TRADINGIS_20200201_20200207.zip".into(),
            ],
        );
        pages.insert(
            "https://h/Reports/Current/TradingIS_Reports/".to_string(),
            vec![
                "https://h/Reports/Current/TradingIS_Reports/PUBLIC_TRADINGIS_202002071200_0000000312345678.zip".into(),
                "https://h/Reports/Current/TradingIS_Reports/PUBLIC_TRADINGIS_202002081200_0000000312345679.zip".into(),
            ],
        );
        let resolver = CatalogResolver::new(Arc::new(FakeLister { pages }), settings(true));

        let catalog = resolver.resolve(&TRADINGPRICE, &CancelToken::new()).unwrap();
        assert_eq!(catalog.tier_records(Tier::HistoricalArchive).count(), 31);
        assert_eq!(catalog.first().unwrap().covered, ts(2020, 1, 1) + Duration::hours(4));

        // Jan 25-31 is behind the archive's Jan 31 04:00 record; the current
        // feed's Feb 7 12:00 still follows the rolling Feb 7 00:00.
        let rolling: Vec<_> = catalog.tier_records(Tier::RollingArchive).map(|r| r.covered).collect();
        assert_eq!(rolling.first(), Some(&ts(2020, 2, 1)));
        assert_eq!(rolling.len(), 7);

        let current: Vec<_> = catalog.tier_records(Tier::Current).map(|r| r.covered).collect();
        assert_eq!(
            current,
            vec![ts(2020, 2, 7) + Duration::hours(12), ts(2020, 2, 8) + Duration::hours(12)]
        );
    }

    #[test]
    fn failed_tier_is_treated_as_empty() {
        let resolver = CatalogResolver::new(
            Arc::new(FakeLister {
                pages: HashMap::new(),
            }),
            settings(true),
        );
        let catalog = resolver.resolve(&PREDISPATCHPRICE, &CancelToken::new()).unwrap();
        assert_eq!(catalog.len(), 31);
        assert!(catalog.records().iter().all(|r| r.tier == Tier::HistoricalArchive));
    }

    #[test]
    fn total_failure_is_empty_catalog() {
        let resolver = CatalogResolver::new(
            Arc::new(FakeLister {
                pages: HashMap::new(),
            }),
            settings(false),
        );
        assert!(matches!(
            resolver.resolve(&TRADINGPRICE, &CancelToken::new()),
            Err(SourceError::EmptyCatalog { .. })
        ));
    }

    #[test]
    fn expired_deadline_cancels_resolution() {
        let resolver = CatalogResolver::new(Arc::new(FakeLister { pages: HashMap::new() }), settings(true));
        let err = resolver
            .resolve(&TRADINGPRICE, &CancelToken::with_timeout(std::time::Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, SourceError::Canceled), "{err:?}");
    }

    #[test]
    fn cancellation_during_listing_is_not_an_empty_tier() {
        let lister = Arc::new(StallingLister::default());
        let resolver = CatalogResolver::new(lister.clone(), settings(false));

        let err = resolver.resolve(&TRADINGPRICE, &CancelToken::new()).unwrap_err();

        assert!(matches!(err, SourceError::Canceled), "{err:?}");
        // Archive discovery was cut short; no later tier was listed.
        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tables_without_archive_id_skip_the_archive() {
        let sensitivities = TABLES
            .iter()
            .find(|t| t.archive_table_id.is_none())
            .unwrap();
        let resolver = CatalogResolver::new(
            Arc::new(FakeLister {
                pages: HashMap::new(),
            }),
            settings(true),
        );
        assert!(resolver
            .candidates(sensitivities, Tier::HistoricalArchive, &CancelToken::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn archive_bounds_discovered_from_index() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://h/MMSDM/".to_string(),
            vec![
                "https://h/MMSDM/2009/".into(),
                "https://h/MMSDM/2010/".into(),
                "https://h/MTPASA_MMSDM/2031/".into(),
            ],
        );
        pages.insert(
            "https://h/MMSDM/2009/".to_string(),
            vec!["https://h/MMSDM/2009/MMSDM_2009_07/".into(), "https://h/MMSDM/2009/MMSDM_2009_12/".into()],
        );
        pages.insert(
            "https://h/MMSDM/2010/".to_string(),
            vec!["https://h/MMSDM/2010/MMSDM_2010_01/".into(), "https://h/MMSDM/2010/MMSDM_2010_02/".into()],
        );
        let resolver = CatalogResolver::new(Arc::new(FakeLister { pages }), settings(false));

        let bounds = resolver.archive_bounds(&CancelToken::new()).unwrap();
        assert_eq!(bounds.earliest, NaiveDate::from_ymd_opt(2009, 7, 1).unwrap());
        assert_eq!(bounds.latest, NaiveDate::from_ymd_opt(2010, 2, 1).unwrap());
        assert_eq!(bounds.last_day(), NaiveDate::from_ymd_opt(2010, 2, 28).unwrap());
    }

    #[test]
    fn overlap_keeps_mature_record() {
        // Archive covers January plus an injected 2020-02-15; rolling covers Feb-Mar.
        let mut historical: Vec<_> = (1..=31)
            .map(|d| SourceRecord::new(ts(2020, 1, d), Tier::HistoricalArchive, "h-jan"))
            .collect();
        historical.push(SourceRecord::new(ts(2020, 2, 15), Tier::HistoricalArchive, "h-feb15"));
        let mut rolling = Vec::new();
        let mut day = ts(2020, 2, 1);
        while day <= ts(2020, 3, 31) {
            rolling.push(SourceRecord::new(day, Tier::RollingArchive, format!("r-{day}")));
            day += Duration::days(1);
        }

        let catalog = merge_tiers(
            vec![
                (Tier::HistoricalArchive, historical),
                (Tier::RollingArchive, rolling),
            ],
            TieBreak::PreferMature,
        );

        let feb15: Vec<_> = catalog
            .records()
            .iter()
            .filter(|r| r.covered == ts(2020, 2, 15))
            .collect();
        assert_eq!(feb15.len(), 1);
        assert_eq!(feb15[0].tier, Tier::HistoricalArchive);

        let max_hist = catalog.max_covered_by(Tier::HistoricalArchive).unwrap();
        assert!(catalog
            .tier_records(Tier::RollingArchive)
            .all(|r| r.covered > max_hist));
    }
}
