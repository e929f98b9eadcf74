//! Engine configuration (TOML).
//!
//! Every section is optional; an empty file yields the defaults.
//!
//! ```toml
//! [nemweb]
//! base_url = "https://nemweb.com.au"
//!
//! [archive]
//! earliest_month = "2009-07"
//! latest_month = "2024-06"
//!
//! [fetch]
//! workers = 8
//! deadline_secs = 600
//!
//! [cache]
//! capacity = 256
//! ttl_secs = 3600
//!
//! [catalog]
//! tie_break = "PREFER_MATURE"
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::domain::TieBreak;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub nemweb: NemwebSettings,
    pub archive: ArchiveSettings,
    pub fetch: FetchSettings,
    pub cache: CacheSettings,
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NemwebSettings {
    pub base_url: String,
    /// Root of the monthly MMSDM archive.
    pub archive_root: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for NemwebSettings {
    fn default() -> Self {
        Self {
            base_url: "https://nemweb.com.au".into(),
            archive_root: "https://nemweb.com.au/Data_Archive/Wholesale_Electricity/MMSDM".into(),
            request_timeout_secs: 60,
            user_agent: concat!("nemfuture/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// Optional pins for the historical archive's month range (`YYYY-MM`).
///
/// Unpinned bounds are discovered from the archive index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    pub earliest_month: Option<String>,
    pub latest_month: Option<String>,
}

impl ArchiveSettings {
    pub fn earliest(&self) -> Result<Option<NaiveDate>, ConfigError> {
        self.earliest_month.as_deref().map(parse_month).transpose()
    }

    pub fn latest(&self) -> Result<Option<NaiveDate>, ConfigError> {
        self.latest_month.as_deref().map(parse_month).transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Concurrent document downloads per plan.
    pub workers: usize,
    /// Overall budget for one engine call.
    pub deadline_secs: Option<u64>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            deadline_secs: None,
        }
    }
}

impl FetchSettings {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: usize,
    pub ttl_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 128,
            ttl_secs: Some(3600),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub tie_break: TieBreak,
}

/// First day of a `YYYY-MM` month.
pub fn parse_month(raw: &str) -> Result<NaiveDate, ConfigError> {
    let bad = || ConfigError::Invalid(format!("month '{raw}' is not YYYY-MM"));
    let (year, month) = raw.trim().split_once('-').ok_or_else(bad)?;
    if year.len() != 4 || month.len() != 2 {
        return Err(bad());
    }
    let year: i32 = year.parse().map_err(|_| bad())?;
    let month: u32 = month.parse().map_err(|_| bad())?;
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(bad)
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.workers == 0 {
            return Err(ConfigError::Invalid("fetch.workers must be at least 1".into()));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be at least 1".into()));
        }
        if self.nemweb.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "nemweb.request_timeout_secs must be at least 1".into(),
            ));
        }
        if let (Some(earliest), Some(latest)) = (self.archive.earliest()?, self.archive.latest()?) {
            if earliest > latest {
                return Err(ConfigError::Invalid(format!(
                    "archive.earliest_month {earliest} is after archive.latest_month {latest}"
                )));
            }
        }
        Ok(())
    }
}
