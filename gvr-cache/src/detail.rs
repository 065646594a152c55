//! On-demand gene detail
//!
//! Expands one gene of the bound dataset with its full variant list. Runs
//! beside the main pipeline: the cache tiers are never read or written here,
//! and failures only leave the gene unexpanded. Genes are only expanded
//! once the dataset is fully loaded, so a completing stream never hands
//! expanded records to the persistent tier.

use crate::controller::{LoadStatus, SessionController};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of [`SessionController::load_gene_detail`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailOutcome {
    NoSession,
    /// Bound dataset is still resolving or streaming
    NotReady,
    /// Bound dataset has no gene with that symbol
    NotFound,
    AlreadyLoaded,
    /// Variant list merged; holds the number of variants
    Merged(usize),
    /// Fetch failed; the gene is left as it was
    Failed(String),
    /// The session changed while the fetch was in flight
    Superseded,
}

impl SessionController {
    /// Fetch and merge the full variant list of `symbol`
    pub async fn load_gene_detail(&self, symbol: &str) -> DetailOutcome {
        let Some(ticket) = self.current_ticket() else {
            return DetailOutcome::NoSession;
        };

        let model = self.snapshot();
        if !matches!(model.status, LoadStatus::Loaded(_)) {
            return DetailOutcome::NotReady;
        }
        let state = model.dataset.and_then(|dataset| {
            dataset.gene(symbol).map(|gene| gene.detail_loaded())
        });
        match state {
            None => return DetailOutcome::NotFound,
            Some(true) => return DetailOutcome::AlreadyLoaded,
            Some(false) => {}
        }

        let variants = match self.source.fetch_gene_variants(&ticket.session, symbol).await {
            Ok(variants) => variants,
            Err(e) => {
                warn!(session = %ticket.session, gene = %symbol, error = %e, "Gene detail fetch failed");
                return DetailOutcome::Failed(e.to_string());
            }
        };

        let count = variants.len();
        let mut merged = false;
        let mut loaded = true;
        let current = self.apply_if_current(&ticket, |model| {
            loaded = matches!(model.status, LoadStatus::Loaded(_));
            if !loaded {
                return;
            }
            if let Some(dataset) = model.dataset.as_mut() {
                if dataset.gene(symbol).is_some() {
                    if let Some(gene) = Arc::make_mut(dataset).gene_mut(symbol) {
                        gene.set_variants(variants);
                        merged = true;
                    }
                }
            }
        });

        if !current {
            debug!(session = %ticket.session, gene = %symbol, "Dropping gene detail for superseded session");
            return DetailOutcome::Superseded;
        }
        if !loaded {
            return DetailOutcome::NotReady;
        }
        if !merged {
            return DetailOutcome::NotFound;
        }

        debug!(session = %ticket.session, gene = %symbol, variants = count, "Gene detail merged");
        DetailOutcome::Merged(count)
    }
}
