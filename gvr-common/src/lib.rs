//! # GVR Common Library
//!
//! Shared code for the genomic variant review client crates:
//! - Error type and result alias
//! - Configuration loading and fixed cache limits
//! - Clock abstraction used for TTL evaluation
//! - SQLite initialization, schema versioning and the partition catalogue

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod time;

pub use config::CacheLimits;
pub use error::{Error, Result};
pub use time::{Clock, ManualClock, SystemClock};
