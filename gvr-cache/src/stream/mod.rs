//! Summary stream ingestion
//!
//! - [`decoder`]: byte buffering, line splitting and record parsing
//! - [`worker`]: the same work on a spawned task, posting batches back

pub mod decoder;
pub mod worker;

pub use decoder::{decode_stream, LineBuffer, RecordSink, StreamProgress, StreamRecord, StreamSummary};
pub use worker::{ParseWorker, StartCommand, WorkerMessage};
