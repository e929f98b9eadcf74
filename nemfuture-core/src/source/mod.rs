//! Source resolution and fetching.
//!
//! - `catalog`: builds the unified per-table catalog across tiers
//! - `locate`: as-of / range / latest selection over a catalog
//! - `orchestrator`: concurrent document fetches and the settlement cascade
//! - `cache`: bounded single-flight memoization of document fetches
//! - `nemweb`: the HTTP lister and fetcher

pub mod cache;
pub mod cancel;
pub mod catalog;
pub mod listing;
pub mod locate;
pub mod nemweb;
pub mod orchestrator;
pub mod provider;

pub use cache::{CacheStats, CachedFetcher, FetchCache};
pub use cancel::CancelToken;
pub use catalog::{merge_tiers, ArchiveBounds, CatalogResolver, ResolverSettings};
pub use locate::{locate, select, select_revision, slice, SourceQuery};
pub use nemweb::NemwebClient;
pub use orchestrator::{Attempt, Batch, CascadeState, FetchOrchestrator};
pub use provider::{
    DirectoryLister, FetchProgress, FetchRequest, ListingEntry, LogProgress, SilentProgress,
    SourceError, TableFetcher,
};
