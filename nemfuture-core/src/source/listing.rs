//! Directory-listing post-processing: which dates a document link covers.
//!
//! NemWeb file names end in date tokens:
//! - rolling archive: `PUBLIC_PREDISPATCHIS_20240115.zip`, or a range
//!   `PUBLIC_X_20240101_20240107.zip`
//! - current feed: `PUBLIC_PREDISPATCHIS_202401151230_20240115120232.zip`

use chrono::{Duration, NaiveDateTime};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::provider::ListingEntry;
use crate::time;

/// Dates covered by a document link.
///
/// Two trailing 8-digit dates form an inclusive daily range. Otherwise the
/// last date-like token wins, falling back to the one before it.
pub fn covered_dates(link: &str) -> Vec<NaiveDateTime> {
    let name = link.rsplit('/').next().unwrap_or(link);
    let stem = name.split('.').next().unwrap_or(name);
    let tokens: Vec<&str> = stem.split('_').collect();

    let last = tokens.last().copied().unwrap_or_default();
    let before = tokens
        .len()
        .checked_sub(2)
        .and_then(|i| tokens.get(i))
        .copied()
        .unwrap_or_default();

    if last.len() == 8 && before.len() == 8 {
        if let (Some(start), Some(end)) = (time::parse_compact(before), time::parse_compact(last)) {
            if start <= end {
                let days = (end - start).num_days();
                return (0..=days).map(|d| start + Duration::days(d)).collect();
            }
        }
    }

    time::parse_compact(last)
        .or_else(|| time::parse_compact(before))
        .into_iter()
        .collect()
}

/// Keep archive documents, one per covered date, ordered by date.
///
/// When several links cover the same date the lexicographically first wins.
pub fn dated_entries(links: Vec<String>) -> Vec<ListingEntry> {
    let mut zips: Vec<String> = links
        .into_iter()
        .filter(|l| l.to_ascii_lowercase().ends_with(".zip"))
        .collect();
    zips.sort();

    let mut by_date: BTreeMap<NaiveDateTime, String> = BTreeMap::new();
    for link in zips {
        for date in covered_dates(&link) {
            by_date.entry(date).or_insert_with(|| link.clone());
        }
    }

    by_date
        .into_iter()
        .map(|(date, link)| ListingEntry { date, link })
        .collect()
}

/// Resolve an `href` against the page it was found on.
pub fn absolutize(page_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(path) = href.strip_prefix('/') {
        return format!("{}/{}", origin(page_url), path);
    }
    let dir = match page_url.rfind('/') {
        Some(i) => &page_url[..=i],
        None => page_url,
    };
    format!("{dir}{href}")
}

/// `scheme://host` of a URL.
fn origin(url: &str) -> &str {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(i) => &url[..after_scheme + i],
        None => url,
    }
}

fn year_folder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(\d{4})/?$").expect("valid regex"))
}

fn month_folder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"MMSDM_(\d{4})_(\d{2})/?$").expect("valid regex"))
}

/// Years published in the MMSDM index (`.../MMSDM/2024/`), excluding MTPASA.
pub fn archive_years(links: &[String]) -> Vec<i32> {
    let mut years: Vec<i32> = links
        .iter()
        .filter(|l| l.contains("MMSDM") && !l.contains("MTPASA"))
        .filter_map(|l| year_folder_re().captures(l))
        .filter_map(|c| c[1].parse().ok())
        .collect();
    years.sort_unstable();
    years.dedup();
    years
}

/// Months published under one MMSDM year folder (`MMSDM_2024_06/`).
pub fn archive_months(links: &[String], year: i32) -> Vec<u32> {
    let mut months: Vec<u32> = links
        .iter()
        .filter(|l| !l.to_ascii_lowercase().ends_with(".zip"))
        .filter_map(|l| month_folder_re().captures(l))
        .filter(|c| c[1].parse::<i32>().ok() == Some(year))
        .filter_map(|c| c[2].parse().ok())
        .filter(|m| (1..=12).contains(m))
        .collect();
    months.sort_unstable();
    months.dedup();
    months
}
