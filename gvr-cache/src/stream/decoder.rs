//! Line-delimited summary stream decoder
//!
//! Chunk boundaries from the transport never line up with record
//! boundaries. Bytes are buffered until a `\n` arrives; the trailing
//! fragment waits for the next chunk. Splitting happens on raw bytes, so a
//! multi-byte UTF-8 sequence cut in half by the transport is reassembled
//! before it is decoded.
//!
//! Each complete line is parsed on its own. A line that fails to parse is
//! skipped and counted; it never aborts the stream.

use crate::client::{ByteStream, TransportError};
use crate::models::{GeneSummaryRecord, StreamMetadata};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::ops::ControlFlow;
use tracing::{debug, trace};

/// One line of a summary stream, tagged by `"type"`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamRecord {
    Metadata(StreamMetadata),
    Gene(GeneSummaryRecord),
    /// Optional in-band end marker; transport close is the real end signal
    Complete {
        #[serde(default)]
        total_genes: Option<u64>,
    },
}

/// Parse one line; `None` for blank or malformed lines
pub fn parse_line(line: &str) -> Option<StreamRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(record) => Some(record),
        Err(e) => {
            trace!(error = %e, "Skipping malformed stream line");
            None
        }
    }
}

/// Accumulates bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(decode_line)
            .collect()
    }

    /// Flush the trailing fragment once the transport has closed
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }

    /// Bytes waiting for a line terminator
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Progress snapshot handed to [`RecordSink::on_progress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProgress {
    pub genes_parsed: u64,
    /// Announced by the metadata record, when one was seen
    pub total_genes: Option<u64>,
    pub finished: bool,
}

/// Final counts of a decoded stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub genes_parsed: u64,
    pub lines_skipped: u64,
    pub total_genes: Option<u64>,
    /// Stream ended on an in-band `complete` record
    pub saw_complete_marker: bool,
    /// Sink asked to stop before the stream ended
    pub stopped_early: bool,
}

/// Receiver of decoded records
///
/// Returning `ControlFlow::Break` stops decoding (the consumer went away).
#[async_trait]
pub trait RecordSink: Send {
    async fn on_metadata(&mut self, metadata: StreamMetadata) -> ControlFlow<()>;

    async fn on_gene(&mut self, gene: GeneSummaryRecord) -> ControlFlow<()>;

    async fn on_progress(&mut self, _progress: StreamProgress) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Drives a byte stream through the line buffer into a sink
struct Decoder<'a, S: RecordSink + ?Sized> {
    sink: &'a mut S,
    progress_interval: u64,
    summary: StreamSummary,
}

impl<'a, S: RecordSink + ?Sized> Decoder<'a, S> {
    async fn handle_line(&mut self, line: &str) -> ControlFlow<()> {
        match parse_line(line) {
            Some(StreamRecord::Metadata(metadata)) => {
                self.summary.total_genes = Some(metadata.total_genes);
                self.sink.on_metadata(metadata).await
            }
            Some(StreamRecord::Gene(gene)) => {
                self.summary.genes_parsed += 1;
                if self.sink.on_gene(gene).await.is_break() {
                    return ControlFlow::Break(());
                }
                if self.progress_interval > 0
                    && self.summary.genes_parsed % self.progress_interval == 0
                {
                    return self.sink.on_progress(self.progress(false)).await;
                }
                ControlFlow::Continue(())
            }
            Some(StreamRecord::Complete { .. }) => {
                self.summary.saw_complete_marker = true;
                ControlFlow::Break(())
            }
            None => {
                if !line.trim().is_empty() {
                    self.summary.lines_skipped += 1;
                }
                ControlFlow::Continue(())
            }
        }
    }

    fn progress(&self, finished: bool) -> StreamProgress {
        StreamProgress {
            genes_parsed: self.summary.genes_parsed,
            total_genes: self.summary.total_genes,
            finished,
        }
    }
}

/// Decode a line-delimited summary stream into `sink`
///
/// Fires `on_progress` every `progress_interval` genes and once more when
/// the stream ends. Transport errors are returned; nothing decoded before a
/// failure should be treated as a valid dataset.
pub async fn decode_stream<S>(
    mut stream: ByteStream,
    progress_interval: usize,
    sink: &mut S,
) -> Result<StreamSummary, TransportError>
where
    S: RecordSink + ?Sized,
{
    let mut buffer = LineBuffer::new();
    let mut decoder = Decoder {
        sink,
        progress_interval: progress_interval as u64,
        summary: StreamSummary::default(),
    };

    'chunks: while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for line in buffer.push(&chunk) {
            if decoder.handle_line(&line).await.is_break() {
                decoder.summary.stopped_early = !decoder.summary.saw_complete_marker;
                break 'chunks;
            }
        }
    }

    if decoder.summary.saw_complete_marker {
        debug!("Summary stream closed by in-band complete marker");
    } else if !decoder.summary.stopped_early {
        if let Some(line) = buffer.finish() {
            if decoder.handle_line(&line).await.is_break() {
                decoder.summary.stopped_early = !decoder.summary.saw_complete_marker;
            }
        }
    }

    let final_progress = decoder.progress(true);
    let _ = decoder.sink.on_progress(final_progress).await;

    Ok(decoder.summary)
}
