//! Raw tables as published: a header row plus string fields.
//!
//! Column sets differ per table and per tier (`DATETIME` vs `SETTLEMENTDATE`),
//! so concatenation aligns columns by header name.

use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};

use crate::source::provider::SourceError;
use crate::time;

/// Header row plus string rows, every row padded to the header width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.eq_ignore_ascii_case(name))
    }

    pub fn require_column(&self, name: &str) -> Result<usize, SourceError> {
        self.column_index(name)
            .ok_or_else(|| SourceError::MissingColumn {
                column: name.to_string(),
            })
    }

    /// Append another table, aligning columns by header name.
    ///
    /// Columns unknown to `self` are added; missing fields become empty strings.
    pub fn append(&mut self, other: RawTable) {
        if self.headers.is_empty() {
            *self = other;
            return;
        }
        if other.headers.is_empty() {
            return;
        }

        let mut mapping = Vec::with_capacity(other.headers.len());
        for header in &other.headers {
            let idx = match self.column_index(header) {
                Some(i) => i,
                None => {
                    self.headers.push(header.clone());
                    for row in &mut self.rows {
                        row.push(String::new());
                    }
                    self.headers.len() - 1
                }
            };
            mapping.push(idx);
        }

        let width = self.headers.len();
        for row in other.rows {
            let mut aligned = vec![String::new(); width];
            for (value, &idx) in row.into_iter().zip(&mapping) {
                aligned[idx] = value;
            }
            self.rows.push(aligned);
        }
    }

    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[String]) -> bool,
    {
        self.rows.retain(|row| keep(row));
    }

    /// Drop exact duplicate rows, keeping the first occurrence.
    pub fn dedup_rows(&mut self) {
        let mut seen = HashSet::with_capacity(self.rows.len());
        self.rows.retain(|row| seen.insert(row.clone()));
    }

    /// Parse a timestamp column; unparseable fields become `None`.
    pub fn timestamps(&self, column: &str) -> Result<Vec<Option<NaiveDateTime>>, SourceError> {
        let idx = self.require_column(column)?;
        Ok(self.rows.iter().map(|row| time::parse_field(&row[idx])).collect())
    }

    /// Earliest and latest parseable timestamp in a column.
    pub fn timestamp_bounds(&self, column: &str) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let stamps = self.timestamps(column).ok()?;
        let mut iter = stamps.into_iter().flatten();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
    }

    /// Keep rows whose timestamp column satisfies `keep`; rows that fail to
    /// parse are dropped.
    pub fn retain_by_timestamp<F>(&mut self, column: &str, mut keep: F) -> Result<(), SourceError>
    where
        F: FnMut(NaiveDateTime) -> bool,
    {
        let idx = self.require_column(column)?;
        self.rows
            .retain(|row| time::parse_field(&row[idx]).is_some_and(&mut keep));
        Ok(())
    }

    /// Sort by a timestamp column, then optionally by a text column.
    pub fn sort_by_timestamp(
        &mut self,
        column: &str,
        then_by: Option<&str>,
    ) -> Result<(), SourceError> {
        let ts_idx = self.require_column(column)?;
        let second = then_by.and_then(|c| self.column_index(c));
        let mut keyed: Vec<_> = std::mem::take(&mut self.rows)
            .into_iter()
            .map(|row| (time::parse_field(&row[ts_idx]), row))
            .collect();
        keyed.sort_by(|(ta, a), (tb, b)| {
            ta.cmp(tb).then_with(|| match second {
                Some(i) => a[i].cmp(&b[i]),
                None => std::cmp::Ordering::Equal,
            })
        });
        self.rows = keyed.into_iter().map(|(_, row)| row).collect();
        Ok(())
    }

    /// Rows as header-keyed maps, for callers that want named access.
    pub fn records(&self) -> impl Iterator<Item = HashMap<&str, &str>> + '_ {
        self.rows.iter().map(move |row| {
            self.headers
                .iter()
                .map(String::as_str)
                .zip(row.iter().map(String::as_str))
                .collect()
        })
    }

    /// BLAKE3 digest over headers and rows; identical tables hash identically.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for header in &self.headers {
            hasher.update(header.as_bytes());
            hasher.update(&[0x1f]);
        }
        hasher.update(&[0x1e]);
        for row in &self.rows {
            for field in row {
                hasher.update(field.as_bytes());
                hasher.update(&[0x1f]);
            }
            hasher.update(&[0x1e]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn append_aligns_columns_by_name() {
        let mut a = table(&["SETTLEMENTDATE", "REGIONID", "RRP"], &[&["2024/01/01 00:05:00", "NSW1", "50"]]);
        let b = table(&["REGIONID", "SETTLEMENTDATE", "INVALIDFLAG"], &[&["VIC1", "2024/01/01 00:10:00", "0"]]);
        a.append(b);

        assert_eq!(a.headers(), ["SETTLEMENTDATE", "REGIONID", "RRP", "INVALIDFLAG"]);
        assert_eq!(a.rows()[0], ["2024/01/01 00:05:00", "NSW1", "50", ""]);
        assert_eq!(a.rows()[1], ["2024/01/01 00:10:00", "VIC1", "", "0"]);
    }

    #[test]
    fn append_into_empty_takes_other() {
        let mut a = RawTable::default();
        a.append(table(&["X"], &[&["1"]]));
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn dedup_keeps_first() {
        let mut t = table(&["A", "B"], &[&["1", "x"], &["1", "x"], &["2", "y"]]);
        t.dedup_rows();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn bounds_ignore_unparseable() {
        let t = table(
            &["SETTLEMENTDATE"],
            &[&["2024/01/01 00:10:00"], &["bad"], &["2024/01/01 00:05:00"]],
        );
        let (lo, hi) = t.timestamp_bounds("SETTLEMENTDATE").unwrap();
        assert_eq!(lo, time::parse_field("2024/01/01 00:05:00").unwrap());
        assert_eq!(hi, time::parse_field("2024/01/01 00:10:00").unwrap());
    }

    #[test]
    fn sort_by_timestamp_then_region() {
        let mut t = table(
            &["SETTLEMENTDATE", "REGIONID"],
            &[
                &["2024/01/01 00:10:00", "NSW1"],
                &["2024/01/01 00:05:00", "VIC1"],
                &["2024/01/01 00:05:00", "NSW1"],
            ],
        );
        t.sort_by_timestamp("SETTLEMENTDATE", Some("REGIONID")).unwrap();
        assert_eq!(t.rows()[0][1], "NSW1");
        assert_eq!(t.rows()[1][1], "VIC1");
        assert_eq!(t.rows()[2][0], "2024/01/01 00:10:00");
    }

    #[test]
    fn missing_column_is_reported() {
        let t = table(&["A"], &[]);
        let err = t.require_column("LASTCHANGED").unwrap_err();
        assert!(matches!(err, SourceError::MissingColumn { ref column } if column == "LASTCHANGED"));
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = table(&["A"], &[&["1"]]);
        let b = table(&["A"], &[&["1"]]);
        let c = table(&["A"], &[&["2"]]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
