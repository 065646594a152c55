//! Session binding controller
//!
//! Owns the "which session is active" reference and the reactive read
//! model. Binding to a session resolves its dataset from the fastest tier
//! that has it:
//!
//! 1. in-memory working set (synchronous, no I/O)
//! 2. persistent store (asynchronous lookup)
//! 3. network stream, started only by [`SessionController::load`] once the
//!    persistent lookup has missed
//!
//! # Race guard
//!
//! Every bind bumps an epoch while holding the binding lock, before any
//! asynchronous work starts. Asynchronous completions (store lookups,
//! stream batches, gene detail) carry the epoch they started under and are
//! applied only if it is still current; the check and the model update
//! happen under the same lock. A superseded stream keeps no claim on the
//! model: its results are dropped on arrival.

use crate::client::UpstreamSource;
use crate::models::{SessionDataset, SessionId};
use crate::persistence::PersistenceWriter;
use crate::store::DatasetTier;
use crate::stream::{ParseWorker, StartCommand, WorkerMessage};
use crate::working_set::WorkingSet;
use gvr_common::CacheLimits;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Tier a loaded dataset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Memory,
    Disk,
    Network,
}

/// Lifecycle of the bound session's dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// No session bound
    Idle,
    /// Persistent store lookup in flight
    Resolving,
    /// Both cache tiers missed; the caller may start streaming
    AwaitingNetwork,
    Streaming,
    Loaded(DataSource),
    /// Initial network load failed
    Error(String),
}

/// Everything a rendering layer reads
#[derive(Debug, Clone, PartialEq)]
pub struct ReadModel {
    pub session: Option<SessionId>,
    /// `None` only while idle; empty while resolving or awaiting the network
    pub dataset: Option<Arc<SessionDataset>>,
    pub status: LoadStatus,
    pub is_loading: bool,
    /// 0-100
    pub load_progress: u8,
    pub error: Option<String>,
}

impl ReadModel {
    fn idle() -> Self {
        Self {
            session: None,
            dataset: None,
            status: LoadStatus::Idle,
            is_loading: false,
            load_progress: 0,
            error: None,
        }
    }

    fn pending(session: SessionId, status: LoadStatus) -> Self {
        Self {
            dataset: Some(Arc::new(SessionDataset::new(session.clone()))),
            session: Some(session),
            status,
            is_loading: true,
            load_progress: 0,
            error: None,
        }
    }

    fn loaded(session: SessionId, dataset: Arc<SessionDataset>, source: DataSource) -> Self {
        Self {
            session: Some(session),
            dataset: Some(dataset),
            status: LoadStatus::Loaded(source),
            is_loading: false,
            load_progress: 100,
            error: None,
        }
    }

    pub fn gene_count(&self) -> usize {
        self.dataset.as_ref().map_or(0, |d| d.genes.len())
    }

    fn has_data(&self) -> bool {
        self.dataset.as_ref().is_some_and(|d| !d.is_empty())
    }
}

/// Result of [`SessionController::bind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// Already bound to that session
    Unchanged,
    /// Bound to no session
    Cleared,
    Memory,
    Disk,
    /// Both tiers missed; call `load` to stream
    NeedsNetwork,
    /// A newer bind won while the store lookup was in flight
    Superseded,
}

/// Result of a successful [`SessionController::load`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(DataSource),
    /// Bound dataset was already complete; nothing fetched
    AlreadyLoaded(DataSource),
    /// Another call is streaming this session
    AlreadyStreaming,
    Superseded,
}

/// User-visible failure of an initial full-dataset load
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Failed to load variants for session {session}: {message}")]
    Transport { session: SessionId, message: String },

    #[error("Variant stream for session {0} ended before completing")]
    Interrupted(SessionId),
}

#[derive(Debug)]
struct Binding {
    session: Option<SessionId>,
    epoch: u64,
}

/// Proof of which bind an asynchronous operation started under
#[derive(Debug, Clone)]
pub(crate) struct Ticket {
    pub(crate) session: SessionId,
    epoch: u64,
}

pub struct SessionController {
    pub(crate) source: Arc<dyn UpstreamSource>,
    tier: Arc<dyn DatasetTier>,
    writer: PersistenceWriter,
    working_set: Mutex<WorkingSet<SessionId, Arc<SessionDataset>>>,
    binding: Mutex<Binding>,
    model: watch::Sender<ReadModel>,
    limits: CacheLimits,
}

impl SessionController {
    pub fn new(source: Arc<dyn UpstreamSource>, tier: Arc<dyn DatasetTier>, limits: CacheLimits) -> Self {
        let (model, _) = watch::channel(ReadModel::idle());
        Self {
            source,
            writer: PersistenceWriter::new(Arc::clone(&tier)),
            tier,
            working_set: Mutex::new(WorkingSet::new(limits.working_set_capacity)),
            binding: Mutex::new(Binding {
                session: None,
                epoch: 0,
            }),
            model,
            limits,
        }
    }

    /// Watch the read model
    pub fn subscribe(&self) -> watch::Receiver<ReadModel> {
        self.model.subscribe()
    }

    /// Current read model (cheap: the dataset is shared)
    pub fn snapshot(&self) -> ReadModel {
        self.model.borrow().clone()
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.lock_binding().session.clone()
    }

    /// Sessions resident in the working set, least recent first
    pub fn working_set_sessions(&self) -> Vec<SessionId> {
        self.lock_working_set().keys().cloned().collect()
    }

    /// Wait for fire-and-forget store writes to land
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Bind to `session` (or to nothing)
    ///
    /// The working set is consulted synchronously; on a miss the persistent
    /// store is queried and the network is deliberately left alone.
    pub async fn bind(&self, session: Option<SessionId>) -> BindOutcome {
        let ticket = {
            let mut binding = self.lock_binding();
            if binding.session == session {
                return BindOutcome::Unchanged;
            }

            self.write_back_bound();
            binding.epoch += 1;
            binding.session = session.clone();

            let Some(session) = session else {
                self.model.send_replace(ReadModel::idle());
                debug!("Unbound session");
                return BindOutcome::Cleared;
            };

            let hit = self.lock_working_set().get(&session).cloned();
            if let Some(dataset) = hit {
                debug!(session = %session, "Working set hit");
                self.model
                    .send_replace(ReadModel::loaded(session, dataset, DataSource::Memory));
                return BindOutcome::Memory;
            }

            self.model
                .send_replace(ReadModel::pending(session.clone(), LoadStatus::Resolving));
            Ticket {
                session,
                epoch: binding.epoch,
            }
        };

        let from_disk = self.tier.load(&ticket.session).await;

        let binding = self.lock_binding();
        if binding.epoch != ticket.epoch {
            debug!(session = %ticket.session, "Discarding store lookup for superseded session");
            return BindOutcome::Superseded;
        }

        match from_disk {
            Some(dataset) => {
                debug!(session = %ticket.session, genes = dataset.genes.len(), "Persistent store hit");
                self.model.send_replace(ReadModel::loaded(
                    ticket.session,
                    Arc::new(dataset),
                    DataSource::Disk,
                ));
                BindOutcome::Disk
            }
            None => {
                self.model.send_modify(|model| {
                    model.status = LoadStatus::AwaitingNetwork;
                });
                BindOutcome::NeedsNetwork
            }
        }
    }

    /// Make `session`'s full dataset available, streaming it if no tier has it
    ///
    /// Idempotent: a bound, complete dataset or an in-flight stream for the
    /// same session means no new request.
    pub async fn load(&self, session: SessionId) -> Result<LoadOutcome, LoadError> {
        match self.bind(Some(session.clone())).await {
            BindOutcome::Memory => return Ok(LoadOutcome::Loaded(DataSource::Memory)),
            BindOutcome::Disk => return Ok(LoadOutcome::Loaded(DataSource::Disk)),
            BindOutcome::Superseded | BindOutcome::Cleared => return Ok(LoadOutcome::Superseded),
            BindOutcome::NeedsNetwork => {}
            BindOutcome::Unchanged => {
                // Another caller may still be resolving this session from disk
                let mut rx = self.model.subscribe();
                let settled = rx
                    .wait_for(|m| {
                        m.session.as_ref() != Some(&session) || m.status != LoadStatus::Resolving
                    })
                    .await
                    .map(|m| (m.session.clone(), m.status.clone()));

                match settled {
                    Ok((Some(bound), status)) if bound == session => match status {
                        LoadStatus::Loaded(source) => return Ok(LoadOutcome::AlreadyLoaded(source)),
                        LoadStatus::Streaming => return Ok(LoadOutcome::AlreadyStreaming),
                        _ => {}
                    },
                    _ => return Ok(LoadOutcome::Superseded),
                }
            }
        }

        let Some(ticket) = self.begin_streaming(&session) else {
            let model = self.snapshot();
            return Ok(match model.status {
                LoadStatus::Streaming if model.session.as_ref() == Some(&session) => {
                    LoadOutcome::AlreadyStreaming
                }
                LoadStatus::Loaded(source) if model.session.as_ref() == Some(&session) => {
                    LoadOutcome::AlreadyLoaded(source)
                }
                _ => LoadOutcome::Superseded,
            });
        };

        self.stream(ticket).await
    }

    /// Drop `session` from both tiers (e.g. after re-processing upstream)
    ///
    /// When the session is bound its read model is emptied and left
    /// awaiting the network; any stream in flight for it is orphaned.
    /// A store write already scheduled for it lands before the removal.
    pub async fn invalidate(&self, session: &SessionId) {
        let pending_write = {
            let mut binding = self.lock_binding();
            self.lock_working_set().remove(session);

            if binding.session.as_ref() == Some(session) {
                binding.epoch += 1;
                self.model.send_replace(ReadModel::pending(
                    session.clone(),
                    LoadStatus::AwaitingNetwork,
                ));
            }
            self.writer.take(session)
        };

        if let Some(write) = pending_write {
            let _ = write.await;
        }
        self.tier.remove(session).await;
        info!(session = %session, "Session invalidated");
    }

    /// Claim the right to stream the bound session
    fn begin_streaming(&self, session: &SessionId) -> Option<Ticket> {
        let binding = self.lock_binding();
        if binding.session.as_ref() != Some(session) {
            return None;
        }

        let claimable = matches!(
            self.model.borrow().status,
            LoadStatus::AwaitingNetwork | LoadStatus::Error(_)
        );
        if !claimable {
            return None;
        }

        self.model
            .send_replace(ReadModel::pending(session.clone(), LoadStatus::Streaming));
        Some(Ticket {
            session: session.clone(),
            epoch: binding.epoch,
        })
    }

    async fn stream(&self, ticket: Ticket) -> Result<LoadOutcome, LoadError> {
        let command = StartCommand {
            url: self.source.summary_url(&ticket.session),
            batch_size: self.limits.worker_batch_size,
            progress_interval: self.limits.progress_interval,
        };
        info!(session = %ticket.session, url = %command.url, "Streaming variant summaries");

        let mut rx = ParseWorker::new(Arc::clone(&self.source)).start(command);
        let mut received: u64 = 0;
        let mut announced: Option<u64> = None;

        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Metadata(metadata) => {
                    announced = Some(metadata.total_genes);
                    let applied = self.apply_if_current(&ticket, |model| {
                        if let Some(dataset) = model.dataset.as_mut() {
                            Arc::make_mut(dataset).apply_metadata(&metadata);
                        }
                    });
                    if !applied {
                        return Ok(self.superseded(&ticket));
                    }
                }
                WorkerMessage::Batch(genes) => {
                    received += genes.len() as u64;
                    let progress = progress_percent(received, announced);
                    let applied = self.apply_if_current(&ticket, |model| {
                        if let Some(dataset) = model.dataset.as_mut() {
                            Arc::make_mut(dataset).genes.extend(genes);
                        }
                        model.load_progress = progress;
                    });
                    if !applied {
                        return Ok(self.superseded(&ticket));
                    }
                }
                WorkerMessage::Progress(report) => {
                    let progress =
                        progress_percent(report.genes_parsed, report.total_genes.or(announced));
                    let applied = self.apply_if_current(&ticket, |model| {
                        model.load_progress = model.load_progress.max(progress);
                    });
                    if !applied {
                        return Ok(self.superseded(&ticket));
                    }
                }
                WorkerMessage::Complete(summary) => {
                    if summary.lines_skipped > 0 {
                        warn!(
                            session = %ticket.session,
                            skipped = summary.lines_skipped,
                            "Skipped malformed summary lines"
                        );
                    }
                    return Ok(self.finish_stream(&ticket));
                }
                WorkerMessage::Error(message) => {
                    return self.fail_stream(
                        &ticket,
                        LoadError::Transport {
                            session: ticket.session.clone(),
                            message,
                        },
                    );
                }
            }
        }

        self.fail_stream(&ticket, LoadError::Interrupted(ticket.session.clone()))
    }

    /// Publish the completed dataset and hand it to both cache tiers
    ///
    /// The hand-off happens under the binding lock, so an `invalidate` racing
    /// with completion either sees the dataset in both tiers or supersedes it.
    fn finish_stream(&self, ticket: &Ticket) -> LoadOutcome {
        let binding = self.lock_binding();
        if binding.epoch != ticket.epoch {
            return self.superseded(ticket);
        }

        let mut completed = None;
        self.model.send_modify(|model| {
            model.status = LoadStatus::Loaded(DataSource::Network);
            model.is_loading = false;
            model.load_progress = 100;
            completed = model.dataset.clone();
        });

        let Some(dataset) = completed else {
            return self.superseded(ticket);
        };

        info!(session = %ticket.session, genes = dataset.genes.len(), "Variant summaries loaded");
        if let Some((evicted, _)) = self
            .lock_working_set()
            .insert(ticket.session.clone(), Arc::clone(&dataset))
        {
            debug!(session = %evicted, "Evicted from working set");
        }
        self.writer.schedule(ticket.session.clone(), dataset);
        drop(binding);

        LoadOutcome::Loaded(DataSource::Network)
    }

    fn fail_stream(&self, ticket: &Ticket, error: LoadError) -> Result<LoadOutcome, LoadError> {
        let message = error.to_string();
        let applied = self.apply_if_current(ticket, |model| {
            // No partial dataset survives a failed stream
            model.dataset = Some(Arc::new(SessionDataset::new(ticket.session.clone())));
            model.status = LoadStatus::Error(message.clone());
            model.is_loading = false;
            model.load_progress = 0;
            model.error = Some(message);
        });

        if !applied {
            return Ok(self.superseded(ticket));
        }

        warn!(session = %ticket.session, error = %error, "Variant summary load failed");
        Err(error)
    }

    fn superseded(&self, ticket: &Ticket) -> LoadOutcome {
        debug!(session = %ticket.session, "Dropping stream output for superseded session");
        LoadOutcome::Superseded
    }

    /// Apply `update` only while `ticket` is still the current bind
    pub(crate) fn apply_if_current<F>(&self, ticket: &Ticket, update: F) -> bool
    where
        F: FnOnce(&mut ReadModel),
    {
        let binding = self.lock_binding();
        if binding.epoch != ticket.epoch {
            return false;
        }
        self.model.send_modify(update);
        true
    }

    pub(crate) fn current_ticket(&self) -> Option<Ticket> {
        let binding = self.lock_binding();
        binding.session.clone().map(|session| Ticket {
            session,
            epoch: binding.epoch,
        })
    }

    /// Keep the outgoing session's complete dataset in the working set
    ///
    /// Caller holds the binding lock.
    fn write_back_bound(&self) {
        let outgoing = {
            let model = self.model.borrow();
            match (&model.session, &model.status) {
                (Some(session), LoadStatus::Loaded(_)) if model.has_data() => model
                    .dataset
                    .clone()
                    .map(|dataset| (session.clone(), dataset)),
                _ => None,
            }
        };

        if let Some((session, dataset)) = outgoing {
            if let Some((evicted, _)) = self.lock_working_set().insert(session, dataset) {
                debug!(session = %evicted, "Evicted from working set");
            }
        }
    }

    fn lock_binding(&self) -> MutexGuard<'_, Binding> {
        self.binding.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_working_set(&self) -> MutexGuard<'_, WorkingSet<SessionId, Arc<SessionDataset>>> {
        self.working_set.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Percent of announced genes received, held below 100 until completion
fn progress_percent(received: u64, announced: Option<u64>) -> u8 {
    match announced {
        Some(total) if total > 0 => ((received.saturating_mul(100) / total).min(99)) as u8,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, Some(10)), 0);
        assert_eq!(progress_percent(5, Some(10)), 50);
        assert_eq!(progress_percent(10, Some(10)), 99);
        assert_eq!(progress_percent(12, Some(10)), 99);
        assert_eq!(progress_percent(5, None), 0);
        assert_eq!(progress_percent(5, Some(0)), 0);
    }

    #[test]
    fn test_idle_read_model() {
        let model = ReadModel::idle();
        assert_eq!(model.status, LoadStatus::Idle);
        assert!(!model.is_loading);
        assert_eq!(model.gene_count(), 0);
    }
}
