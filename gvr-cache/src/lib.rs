//! gvr-cache: session variant-data cache and streaming ingestion
//!
//! Loads a case's gene/variant summary dataset, keeps it across reloads in
//! a partitioned SQLite store, keeps a handful of recent sessions resident
//! in memory, and fetches per-gene variant detail on demand.
//!
//! Entry point for consumers is [`SessionController`]: every read goes
//! through its reactive [`ReadModel`].

pub mod client;
pub mod controller;
pub mod detail;
pub mod models;
pub mod persistence;
pub mod store;
pub mod stream;
pub mod working_set;

pub use client::{HttpUpstream, TransportError, UpstreamSource};
pub use controller::{
    BindOutcome, DataSource, LoadError, LoadOutcome, LoadStatus, ReadModel, SessionController,
};
pub use detail::DetailOutcome;
pub use models::{GeneSummaryRecord, SessionDataset, SessionId, Variant};
pub use store::{CacheEntry, DatasetTier, PartitionedStore};
pub use working_set::WorkingSet;
