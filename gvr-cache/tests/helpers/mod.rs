//! In-memory fakes for controller tests
//!
//! `FakeUpstream` counts requests and can hold a summary stream (before it
//! opens or after its first chunks) until a gate is released; `MemoryTier` does the same for persistent lookups.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use gvr_cache::client::{ByteStream, TransportError, UpstreamSource};
use gvr_cache::{DatasetTier, GeneSummaryRecord, SessionDataset, SessionId, Variant};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

const URL_PREFIX: &str = "fake://summary/";

pub fn metadata_line(total_genes: usize) -> String {
    format!(
        "{{\"type\":\"metadata\",\"total_genes\":{},\"total_variants\":{},\"impact_matrix\":{{\"pathogenic\":{{\"HIGH\":1}}}}}}\n",
        total_genes,
        total_genes * 2
    )
}

pub fn gene_line(gene: &str) -> String {
    format!(
        "{{\"type\":\"gene\",\"gene\":\"{}\",\"counts\":{{\"pathogenic\":1,\"vus\":1}},\"variants\":[]}}\n",
        gene
    )
}

/// Summary stream body: metadata line, then one gene line per symbol
pub fn summary_body(genes: &[&str]) -> String {
    let mut body = metadata_line(genes.len());
    for gene in genes {
        body.push_str(&gene_line(gene));
    }
    body
}

/// A complete dataset as the persistent tier would hold it
pub fn dataset(session: &str, genes: &[&str]) -> SessionDataset {
    let mut dataset = SessionDataset::new(SessionId::new(session));
    dataset.total_genes = genes.len() as u64;
    dataset.genes = genes
        .iter()
        .map(|g| GeneSummaryRecord::new(*g, Default::default()))
        .collect();
    dataset
}

pub fn variant(id: &str) -> Variant {
    serde_json::from_value(serde_json::json!({ "id": id, "chrom": "17", "pos": 43_044_295 }))
        .expect("variant fixture")
}

pub fn gene_symbols(dataset: &SessionDataset) -> Vec<String> {
    dataset.genes.iter().map(|g| g.gene.clone()).collect()
}

/// Scripted upstream
#[derive(Default)]
pub struct FakeUpstream {
    summaries: Mutex<HashMap<SessionId, Result<Vec<Result<String, TransportError>>, TransportError>>>,
    details: Mutex<HashMap<String, Result<Vec<Variant>, TransportError>>>,
    stream_gates: Mutex<HashMap<SessionId, oneshot::Receiver<()>>>,
    held_streams: Mutex<HashMap<SessionId, (Vec<String>, oneshot::Receiver<()>)>>,
    stream_requests: AtomicUsize,
    detail_requests: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(self, session: &str, genes: &[&str]) -> Self {
        self.set_summary(session, genes);
        self
    }

    pub fn set_summary(&self, session: &str, genes: &[&str]) {
        self.summaries
            .lock()
            .unwrap()
            .insert(SessionId::new(session), Ok(vec![Ok(summary_body(genes))]));
    }

    /// Serve `chunks` verbatim; an `Err` chunk fails the transport there
    pub fn set_chunks(&self, session: &str, chunks: Vec<Result<String, TransportError>>) {
        self.summaries
            .lock()
            .unwrap()
            .insert(SessionId::new(session), Ok(chunks));
    }

    /// Reject the summary request itself
    pub fn fail_summary(&self, session: &str, error: TransportError) {
        self.summaries
            .lock()
            .unwrap()
            .insert(SessionId::new(session), Err(error));
    }

    pub fn set_detail(&self, gene: &str, result: Result<Vec<Variant>, TransportError>) {
        self.details.lock().unwrap().insert(gene.to_string(), result);
    }

    /// Hold the next summary request for `session` until the sender fires
    pub fn gate_stream(&self, session: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.stream_gates
            .lock()
            .unwrap()
            .insert(SessionId::new(session), rx);
        tx
    }

    /// Serve `chunks` for `session`, then keep the stream open until the
    /// sender fires
    pub fn hold_open(&self, session: &str, chunks: Vec<String>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.held_streams
            .lock()
            .unwrap()
            .insert(SessionId::new(session), (chunks, rx));
        tx
    }

    pub fn stream_requests(&self) -> usize {
        self.stream_requests.load(Ordering::SeqCst)
    }

    pub fn detail_requests(&self) -> usize {
        self.detail_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamSource for FakeUpstream {
    fn summary_url(&self, session: &SessionId) -> String {
        format!("{}{}", URL_PREFIX, session)
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError> {
        self.stream_requests.fetch_add(1, Ordering::SeqCst);
        let session = SessionId::new(url.trim_start_matches(URL_PREFIX));

        let gate = self.stream_gates.lock().unwrap().remove(&session);
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let held = self.held_streams.lock().unwrap().remove(&session);
        if let Some((chunks, release)) = held {
            let head = stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))));
            let tail = stream::once(release)
                .filter_map(|_| future::ready(None::<Result<Bytes, TransportError>>));
            return Ok(head.chain(tail).boxed());
        }

        let scripted = self.summaries.lock().unwrap().get(&session).cloned();
        let chunks = match scripted {
            Some(Ok(chunks)) => chunks,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(TransportError::Status {
                    status: 404,
                    body: format!("unknown session {}", session),
                })
            }
        };

        let chunks: Vec<Result<Bytes, TransportError>> =
            chunks.into_iter().map(|c| c.map(Bytes::from)).collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn fetch_gene_variants(
        &self,
        _session: &SessionId,
        gene: &str,
    ) -> Result<Vec<Variant>, TransportError> {
        self.detail_requests.fetch_add(1, Ordering::SeqCst);
        self.details
            .lock()
            .unwrap()
            .get(gene)
            .cloned()
            .unwrap_or_else(|| {
                Err(TransportError::Status {
                    status: 404,
                    body: format!("unknown gene {}", gene),
                })
            })
    }
}

/// Persistent tier backed by a map
#[derive(Default)]
pub struct MemoryTier {
    entries: Mutex<HashMap<SessionId, SessionDataset>>,
    load_gates: Mutex<HashMap<SessionId, oneshot::Receiver<()>>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, dataset: SessionDataset) -> Self {
        self.entries
            .lock()
            .unwrap()
            .insert(dataset.session_id.clone(), dataset);
        self
    }

    /// Hold the next lookup for `session` until the sender fires
    pub fn gate_load(&self, session: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.load_gates
            .lock()
            .unwrap()
            .insert(SessionId::new(session), rx);
        tx
    }

    pub fn get(&self, session: &str) -> Option<SessionDataset> {
        self.entries.lock().unwrap().get(&SessionId::new(session)).cloned()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetTier for MemoryTier {
    async fn load(&self, session: &SessionId) -> Option<SessionDataset> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let gate = self.load_gates.lock().unwrap().remove(session);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.entries.lock().unwrap().get(session).cloned()
    }

    async fn save(&self, session: &SessionId, dataset: &SessionDataset) {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .insert(session.clone(), dataset.clone());
    }

    async fn remove(&self, session: &SessionId) {
        self.entries.lock().unwrap().remove(session);
    }
}
