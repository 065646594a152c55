//! Database initialization, schema versioning and partition catalogue

pub mod init;
pub mod migrations;
pub mod partitions;

pub use init::*;
pub use migrations::*;
pub use partitions::*;
