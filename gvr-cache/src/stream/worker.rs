//! Background parsing worker
//!
//! Fetching, line splitting and JSON parsing of a summary stream run on a
//! spawned task. The controller only ever sees batches of already-parsed
//! records arriving over a bounded channel, in transport order.
//!
//! A worker is one-shot: [`ParseWorker::start`] consumes it. A new stream
//! needs a new worker.

use super::decoder::{decode_stream, RecordSink, StreamProgress, StreamSummary};
use crate::client::UpstreamSource;
use crate::models::{GeneSummaryRecord, StreamMetadata};
use async_trait::async_trait;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outgoing channel depth, in messages
const CHANNEL_CAPACITY: usize = 16;

/// Messages posted back by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// Sent as soon as the metadata record is parsed
    Metadata(StreamMetadata),
    /// Parsed gene records, in stream order
    Batch(Vec<GeneSummaryRecord>),
    /// Every `progress_interval` genes and once at end of stream; genes
    /// counted here have already been posted
    Progress(StreamProgress),
    /// Terminal: stream finished, sent exactly once on success
    Complete(StreamSummary),
    /// Terminal: the fetch or the transport failed
    Error(String),
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerMessage::Complete(_) | WorkerMessage::Error(_))
    }
}

/// What to fetch and how to batch it
#[derive(Debug, Clone)]
pub struct StartCommand {
    pub url: String,
    pub batch_size: usize,
    pub progress_interval: usize,
}

/// One-shot parse worker
pub struct ParseWorker {
    source: Arc<dyn UpstreamSource>,
}

impl ParseWorker {
    pub fn new(source: Arc<dyn UpstreamSource>) -> Self {
        Self { source }
    }

    /// Spawn the worker task and return its message channel
    pub fn start(self, command: StartCommand) -> mpsc::Receiver<WorkerMessage> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run(self.source, command, tx));
        rx
    }
}

async fn run(source: Arc<dyn UpstreamSource>, command: StartCommand, tx: mpsc::Sender<WorkerMessage>) {
    let stream = match source.open_stream(&command.url).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(url = %command.url, error = %e, "Summary stream request failed");
            let _ = tx.send(WorkerMessage::Error(e.to_string())).await;
            return;
        }
    };

    let mut sink = BatchingSink {
        tx: tx.clone(),
        batch: Vec::with_capacity(command.batch_size.max(1)),
        batch_size: command.batch_size.max(1),
    };

    match decode_stream(stream, command.progress_interval, &mut sink).await {
        Ok(summary) => {
            if summary.stopped_early {
                debug!(url = %command.url, "Parse worker receiver closed, stopping");
                return;
            }
            if sink.flush().await.is_break() {
                return;
            }
            let _ = tx.send(WorkerMessage::Complete(summary)).await;
        }
        Err(e) => {
            warn!(url = %command.url, error = %e, "Summary stream failed mid-transfer");
            let _ = tx.send(WorkerMessage::Error(e.to_string())).await;
        }
    }
}

struct BatchingSink {
    tx: mpsc::Sender<WorkerMessage>,
    batch: Vec<GeneSummaryRecord>,
    batch_size: usize,
}

impl BatchingSink {
    async fn flush(&mut self) -> ControlFlow<()> {
        if self.batch.is_empty() {
            return ControlFlow::Continue(());
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        self.send(WorkerMessage::Batch(batch)).await
    }

    async fn send(&self, message: WorkerMessage) -> ControlFlow<()> {
        match self.tx.send(message).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }
}

#[async_trait]
impl RecordSink for BatchingSink {
    async fn on_metadata(&mut self, metadata: StreamMetadata) -> ControlFlow<()> {
        self.send(WorkerMessage::Metadata(metadata)).await
    }

    async fn on_gene(&mut self, gene: GeneSummaryRecord) -> ControlFlow<()> {
        self.batch.push(gene);
        if self.batch.len() >= self.batch_size {
            return self.flush().await;
        }
        ControlFlow::Continue(())
    }

    async fn on_progress(&mut self, progress: StreamProgress) -> ControlFlow<()> {
        debug!(
            parsed = progress.genes_parsed,
            total = ?progress.total_genes,
            finished = progress.finished,
            "Summary stream progress"
        );
        if self.flush().await.is_break() {
            return ControlFlow::Break(());
        }
        self.send(WorkerMessage::Progress(progress)).await
    }
}
