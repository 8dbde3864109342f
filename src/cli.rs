use std::path::PathBuf;

use anyhow::{Context, Result};
use catalog_sync_core::clock::SystemClock;
use catalog_sync_core::collections::Collections;
use catalog_sync_core::config::SyncConfig;
use catalog_sync_core::contract::{CatalogSource, DocumentStore};
use catalog_sync_core::discovery::DependencyTracker;
use catalog_sync_core::store::{scan_all, AuditedStore};
use catalog_sync_core::synchronise::{SynchroniseReport, Synchroniser};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use serde_json::Value;

use crate::elasticsearch::ElasticsearchStore;
use crate::load_config::load_config;
use crate::upstream::HttpCatalogClient;

/// CLI for catalog-sync: mirror an upstream product catalogue into a document store.
#[derive(Parser)]
#[clap(
    name = "catalog-sync",
    version,
    about = "Incrementally mirror a paginated, multi-locale product catalogue into Elasticsearch"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every synchronisation phase once using the given config file
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Print stored checkpoints and pending location references
    Status {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Async CLI entrypoint shared by main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sync { config } => {
            let config = load_config(config)?;
            let source =
                HttpCatalogClient::new(&config.upstream).context("building upstream client")?;
            let store = ElasticsearchStore::new(&config.store).context("building store client")?;

            println!("Synchronise starting...");
            let result = if config.store.audit {
                let collections = Collections::new(config.sync.collection_prefix.clone());
                let audited = AuditedStore::new(store, SystemClock, &collections);
                synchronise(&source, &audited, &config.sync).await
            } else {
                synchronise(&source, &store, &config.sync).await
            };

            match result {
                Ok(report) => {
                    println!("Synchronise complete.\nReport:");
                    println!("{:#?}", report);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] Synchronisation failed: {:#}", e);
                    Err(e)
                }
            }
        }
        Commands::Status { config } => {
            let config = load_config(config)?;
            let store = ElasticsearchStore::new(&config.store).context("building store client")?;
            status(&store, &config.sync).await
        }
    }
}

async fn synchronise<C, S>(
    source: &C,
    store: &S,
    config: &SyncConfig,
) -> Result<SynchroniseReport>
where
    C: CatalogSource,
    S: DocumentStore,
{
    let synchroniser = Synchroniser::new(source, store, config, SystemClock)?;
    Ok(synchroniser.run().await?)
}

async fn status<S: DocumentStore>(store: &S, config: &SyncConfig) -> Result<()> {
    let collections = Collections::new(config.collection_prefix.clone());
    let metadata = collections.metadata();

    let records: Vec<(String, Value)> = scan_all(store, &metadata)
        .try_collect()
        .await
        .context("reading checkpoints")?;
    println!("Checkpoints ({}):", records.len());
    for (id, record) in &records {
        println!("  {id} = {record}");
    }

    let tracker = DependencyTracker::new(store, &collections);
    for locale in &config.locales {
        let pending = tracker
            .count_unresolved(locale, config.location_batch_size)
            .await
            .with_context(|| format!("counting unresolved references for {locale}"))?;
        println!("Unresolved location references [{locale}]: {pending}");
    }
    Ok(())
}
