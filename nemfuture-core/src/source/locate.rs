//! Snapshot and range selection over a catalog.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::provider::SourceError;
use crate::domain::{RawTable, SourceCatalog, SourceRecord};
use crate::time;

/// Index of the greatest element `<= at` in an ascending slice.
pub fn nearest_preceding<T: Ord>(sorted: &[T], at: T) -> Option<usize> {
    sorted.partition_point(|x| *x <= at).checked_sub(1)
}

/// The record whose covered date is the greatest one not after `as_of`.
pub fn locate(catalog: &SourceCatalog, as_of: NaiveDateTime) -> Result<&SourceRecord, SourceError> {
    let records = catalog.records();
    let idx = records.partition_point(|r| r.covered <= as_of);
    match idx.checked_sub(1) {
        Some(i) => Ok(&records[i]),
        None => Err(SourceError::NoPriorSnapshot {
            as_of,
            earliest: catalog
                .first()
                .map(|r| time::format_field(r.covered))
                .unwrap_or_else(|| "nothing".into()),
        }),
    }
}

/// Records with `start <= covered <= end`, in date order.
pub fn slice(catalog: &SourceCatalog, start: NaiveDateTime, end: NaiveDateTime) -> Vec<&SourceRecord> {
    let records = catalog.records();
    let lo = records.partition_point(|r| r.covered < start);
    let hi = records.partition_point(|r| r.covered <= end);
    records.get(lo..hi.max(lo)).unwrap_or_default().iter().collect()
}

/// The three query shapes callers can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SourceQuery {
    AsOf(NaiveDateTime),
    Range {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    Latest,
}

impl SourceQuery {
    /// Build a query from optional CLI-style arguments.
    ///
    /// `as_of` wins over a range; a half-open range is not a range.
    pub fn from_parts(
        as_of: Option<NaiveDateTime>,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Self {
        match (as_of, start, end) {
            (Some(t), _, _) => SourceQuery::AsOf(t),
            (None, Some(start), Some(end)) => SourceQuery::Range { start, end },
            (None, None, Some(end)) => SourceQuery::AsOf(end),
            _ => SourceQuery::Latest,
        }
    }
}

/// Documents of `table`'s catalog needed to answer a query, plus the
/// effective query.
///
/// A range that selects nothing degrades to `AsOf(end)`, so the returned
/// query can differ from the input.
pub fn select<'a>(
    catalog: &'a SourceCatalog,
    table: &str,
    query: SourceQuery,
) -> Result<(SourceQuery, Vec<&'a SourceRecord>), SourceError> {
    match query {
        SourceQuery::AsOf(t) => Ok((query, vec![locate(catalog, t)?])),
        SourceQuery::Range { start, end } => {
            let records = slice(catalog, start, end);
            if records.is_empty() {
                tracing::debug!(%start, %end, "empty range; falling back to as-of end");
                Ok((SourceQuery::AsOf(end), vec![locate(catalog, end)?]))
            } else {
                Ok((query, records))
            }
        }
        SourceQuery::Latest => match catalog.last() {
            Some(record) => Ok((query, vec![record])),
            None => Err(SourceError::EmptyCatalog {
                table: table.to_string(),
            }),
        },
    }
}

/// Keep only the rows of the revision nearest-preceding `as_of`.
///
/// Revisions are the distinct values of `column`; rows that don't parse are
/// dropped.
pub fn select_revision(table: &mut RawTable, column: &str, as_of: NaiveDateTime) -> Result<(), SourceError> {
    let mut revisions: Vec<NaiveDateTime> = table.timestamps(column)?.into_iter().flatten().collect();
    revisions.sort_unstable();
    revisions.dedup();

    match nearest_preceding(&revisions, as_of) {
        Some(i) => {
            let chosen = revisions[i];
            table.retain_by_timestamp(column, |t| t == chosen)
        }
        None => {
            table.retain_rows(|_| false);
            Ok(())
        }
    }
}

/// Keep only the rows carrying the latest value of `column`.
pub fn select_latest(table: &mut RawTable, column: &str) -> Result<(), SourceError> {
    match table.timestamp_bounds(column) {
        Some((_, latest)) => table.retain_by_timestamp(column, |t| t == latest),
        None => {
            table.require_column(column)?;
            table.retain_rows(|_| false);
            Ok(())
        }
    }
}
