//! gvr-cache - load and inspect cached session variant data
//!
//! `load` resolves a session through the working set, the persistent store
//! and finally the upstream stream, optionally expanding genes.
//! `invalidate` drops a session from the persistent store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gvr_cache::{
    DataSource, DetailOutcome, HttpUpstream, LoadOutcome, PartitionedStore, SessionController,
    SessionId,
};
use gvr_common::config::{resolve_upstream_url, RootFolderInitializer, RootFolderResolver, TomlConfig};
use gvr_common::CacheLimits;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for gvr-cache
#[derive(Parser, Debug)]
#[command(name = "gvr-cache")]
#[command(about = "Session variant-data cache for genomic variant review")]
#[command(version)]
struct Args {
    /// Folder holding the cache database
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Upstream annotation service base URL
    #[arg(long)]
    upstream: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a session's summary dataset
    Load {
        session: String,

        /// Also fetch full variant lists for these genes
        #[arg(long = "gene")]
        genes: Vec<String>,
    },
    /// Drop a session from the persistent cache
    Invalidate { session: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = TomlConfig::load_or_default();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting gvr-cache");

    let upstream_url = resolve_upstream_url(args.upstream.as_deref(), &toml_config);
    let root_folder = RootFolderResolver::new(args.root_folder, toml_config).resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;
    let db_path = initializer.database_path();
    info!(path = %db_path.display(), "Cache database");

    let limits = CacheLimits::default();
    let store = Arc::new(PartitionedStore::open_or_disabled(&db_path, limits).await);
    let upstream = Arc::new(
        HttpUpstream::new(&upstream_url)
            .with_context(|| format!("Invalid upstream URL {}", upstream_url))?,
    );
    info!(url = %upstream_url, "Upstream");

    let controller = SessionController::new(upstream, store, limits);

    match args.command {
        Command::Load { session, genes } => {
            load(&controller, SessionId::new(session), &genes).await?;
        }
        Command::Invalidate { session } => {
            controller.invalidate(&SessionId::new(session)).await;
        }
    }

    controller.flush().await;
    Ok(())
}

async fn load(controller: &SessionController, session: SessionId, genes: &[String]) -> Result<()> {
    let outcome = controller
        .load(session.clone())
        .await
        .with_context(|| format!("Loading session {}", session))?;

    let source = match outcome {
        LoadOutcome::Loaded(source) | LoadOutcome::AlreadyLoaded(source) => source,
        other => bail!("Session {} did not load: {:?}", session, other),
    };

    for gene in genes {
        match controller.load_gene_detail(gene).await {
            DetailOutcome::Merged(count) => info!(gene = %gene, variants = count, "Gene expanded"),
            DetailOutcome::NotFound => warn!(gene = %gene, "Gene not in session"),
            other => warn!(gene = %gene, outcome = ?other, "Gene not expanded"),
        }
    }

    let model = controller.snapshot();
    let origin = match source {
        DataSource::Memory => "memory",
        DataSource::Disk => "disk",
        DataSource::Network => "network",
    };
    println!("session:  {}", session);
    println!("source:   {}", origin);

    if let Some(dataset) = model.dataset.as_ref() {
        println!("genes:    {} of {}", dataset.genes.len(), dataset.total_genes);
        println!("variants: {}", dataset.total_variants);
        for gene in dataset.genes.iter().filter(|g| g.detail_loaded()) {
            println!("  {}: {} variants", gene.gene, gene.variants.len());
        }
    }

    Ok(())
}
