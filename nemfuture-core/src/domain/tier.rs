//! Publication tiers, source records and the unified source catalog.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;

/// One of the independently published data tiers.
///
/// Variants are declared in order of maturity: the historical archive is the
/// most finalised, the current feed the most provisional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    HistoricalArchive,
    RollingArchive,
    Current,
}

impl Tier {
    /// All tiers, most mature first.
    pub const ALL: [Tier; 3] = [Tier::HistoricalArchive, Tier::RollingArchive, Tier::Current];

    /// Default priority: lower wins on a date collision.
    pub fn default_priority(self) -> u8 {
        match self {
            Tier::HistoricalArchive => 0,
            Tier::RollingArchive => 1,
            Tier::Current => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::HistoricalArchive => "historical_archive",
            Tier::RollingArchive => "rolling_archive",
            Tier::Current => "current",
        };
        f.write_str(s)
    }
}

/// Policy for a date claimed by more than one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TieBreak {
    /// Lowest tier priority wins (finalised data supersedes provisional feeds).
    #[default]
    PreferMature,
    /// Highest tier priority wins.
    PreferRecent,
}

/// A candidate document covering one date on one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub covered: NaiveDateTime,
    pub tier: Tier,
    pub tier_priority: u8,
    pub url: String,
}

impl SourceRecord {
    pub fn new(covered: NaiveDateTime, tier: Tier, url: impl Into<String>) -> Self {
        Self {
            covered,
            tier,
            tier_priority: tier.default_priority(),
            url: url.into(),
        }
    }
}

/// Chronologically ordered source records, unique by covered date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceCatalog {
    records: Vec<SourceRecord>,
}

impl SourceCatalog {
    /// Merge records from any tiers into a catalog.
    ///
    /// Records are ordered by `(tier_priority, covered)`, deduplicated by
    /// covered date keeping the first occurrence under `tie_break`, then
    /// re-ordered by covered date.
    pub fn from_records(mut records: Vec<SourceRecord>, tie_break: TieBreak) -> Self {
        match tie_break {
            TieBreak::PreferMature => records.sort_by_key(|r| (r.tier_priority, r.covered)),
            TieBreak::PreferRecent => {
                records.sort_by_key(|r| (Reverse(r.tier_priority), r.covered))
            }
        }

        let mut seen = HashSet::with_capacity(records.len());
        records.retain(|r| seen.insert(r.covered));
        records.sort_by_key(|r| r.covered);

        Self { records }
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first(&self) -> Option<&SourceRecord> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&SourceRecord> {
        self.records.last()
    }

    /// Covered dates in catalog order.
    pub fn covered_dates(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        self.records.iter().map(|r| r.covered)
    }

    /// Records published by one tier, in date order.
    pub fn tier_records(&self, tier: Tier) -> impl Iterator<Item = &SourceRecord> + '_ {
        self.records.iter().filter(move |r| r.tier == tier)
    }

    /// Latest covered date contributed by a tier.
    pub fn max_covered_by(&self, tier: Tier) -> Option<NaiveDateTime> {
        self.tier_records(tier).map(|r| r.covered).max()
    }

    /// Document URLs in catalog order, each once.
    pub fn urls(&self) -> Vec<&str> {
        distinct_urls(&self.records)
            .into_iter()
            .map(|r| r.url.as_str())
            .collect()
    }
}

/// Distinct document URLs of a set of records, first occurrence order.
///
/// Historical-archive months appear once per covered day; they are fetched once.
pub fn distinct_urls<'a, I>(records: I) -> Vec<&'a SourceRecord>
where
    I: IntoIterator<Item = &'a SourceRecord>,
{
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.url.as_str()))
        .collect()
}
