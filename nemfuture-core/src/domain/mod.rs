//! Domain types: table registry, tiers and catalogs, raw tables, price points.

pub mod price;
pub mod raw;
pub mod table;
pub mod tier;

pub use price::{normalize_region, ActualPoint, ForecastPoint, Market, SettledPrice, SettlementSet};
pub use raw::RawTable;
pub use table::{TableDescriptor, TimeFrame, TABLES};
pub use tier::{SourceCatalog, SourceRecord, TieBreak, Tier};
