//! tierstore admin CLI
//!
//! Inspects and edits a partition store directory. Payloads are JSON
//! documents.
//!
//! ```text
//! tierstore --storage-dir ./data put graph-1 graph-1.json
//! tierstore --storage-dir ./data get graph-1
//! tierstore --storage-dir ./data stats --prometheus
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tierstore::adapters::StatsExporter;
use tierstore::{Error, LoggingEventListener, PartitionStore, Result, StorageConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiered partition store administration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root directory of the store (overrides the config file)
    #[arg(long, env = "TIERSTORE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long, env = "TIERSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a JSON document as a partition
    Put {
        /// Partition id
        id: String,
        /// File holding the JSON payload
        file: PathBuf,
    },
    /// Print a partition as JSON
    Get {
        /// Partition id
        id: String,
    },
    /// Remove a partition from every tier
    Rm {
        /// Partition id
        id: String,
    },
    /// Print aggregate statistics
    Stats {
        /// Prometheus text exposition instead of JSON
        #[arg(long)]
        prometheus: bool,
    },
    /// List partition ids
    Ids,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => StorageConfig::from_yaml_file(path)?,
        None => StorageConfig::default(),
    };
    if let Some(dir) = &args.storage_dir {
        config.storage_dir = dir.clone();
    }
    debug!(?config, "Resolved configuration");

    let store: PartitionStore<Value> = PartitionStore::new(config)?;
    store.subscribe(Arc::new(LoggingEventListener::debug_level()));
    store.initialize().await?;

    let outcome = run(&store, args.command).await;
    let shutdown = store.shutdown().await;

    let found = outcome?;
    shutdown?;
    if !found {
        std::process::exit(1);
    }
    Ok(())
}

/// Run one command. Returns false when the requested partition does not exist.
async fn run(store: &PartitionStore<Value>, command: Command) -> Result<bool> {
    match command {
        Command::Put { id, file } => {
            let raw = tokio::fs::read(&file)
                .await
                .map_err(|e| Error::io(&file, e))?;
            let payload: Value =
                serde_json::from_slice(&raw).map_err(|source| Error::Deserialization {
                    partition_id: id.clone(),
                    source,
                })?;

            store.store(&id, payload).await?;
            if let Some(metrics) = store.partition_metrics(&id) {
                let tier = metrics
                    .tier()
                    .map(|t| t.name())
                    .unwrap_or("pending");
                println!("stored {} ({} bytes, {})", id, metrics.size, tier);
            }
            Ok(true)
        }
        Command::Get { id } => match store.retrieve(&id).await? {
            Some(value) => {
                let json = serde_json::to_string_pretty(value.as_ref()).map_err(|source| {
                    Error::Serialization {
                        partition_id: id.clone(),
                        source,
                    }
                })?;
                println!("{}", json);
                Ok(true)
            }
            None => {
                eprintln!("partition '{}' not found", id);
                Ok(false)
            }
        },
        Command::Rm { id } => {
            let existed = store.contains(&id);
            store.remove(&id).await?;
            if existed {
                println!("removed {}", id);
            }
            Ok(existed)
        }
        Command::Stats { prometheus } => {
            let stats = store.storage_stats();
            if prometheus {
                let exporter = StatsExporter::new()?;
                exporter.update(&stats);
                print!("{}", exporter.render()?);
            } else {
                let json = serde_json::to_string_pretty(&stats)
                    .map_err(|e| Error::Internal(format!("Failed to encode stats: {}", e)))?;
                println!("{}", json);
            }
            Ok(true)
        }
        Command::Ids => {
            for id in store.partition_ids() {
                println!("{}", id);
            }
            Ok(true)
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_put() {
        let args = Args::parse_from([
            "tierstore",
            "--storage-dir",
            "/tmp/store",
            "put",
            "graph-1",
            "graph.json",
        ]);
        assert_eq!(args.storage_dir, Some(PathBuf::from("/tmp/store")));
        match args.command {
            Command::Put { id, file } => {
                assert_eq!(id, "graph-1");
                assert_eq!(file, PathBuf::from("graph.json"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_stats_prometheus() {
        let args = Args::parse_from(["tierstore", "--log-json", "stats", "--prometheus"]);
        assert!(args.log_json);
        assert!(matches!(args.command, Command::Stats { prometheus: true }));
    }

    #[tokio::test]
    async fn test_run_commands_against_temp_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store: PartitionStore<Value> =
            PartitionStore::new(StorageConfig::new(tmp.path().join("store"))).unwrap();
        store.initialize().await.unwrap();

        let file = tmp.path().join("doc.json");
        std::fs::write(&file, br#"{"nodes": [1, 2, 3]}"#).unwrap();

        let put = Command::Put {
            id: "doc".into(),
            file,
        };
        assert!(run(&store, put).await.unwrap());
        assert!(run(&store, Command::Get { id: "doc".into() }).await.unwrap());
        assert!(run(&store, Command::Ids).await.unwrap());
        assert!(run(&store, Command::Stats { prometheus: true }).await.unwrap());
        assert!(run(&store, Command::Rm { id: "doc".into() }).await.unwrap());
        assert!(!run(&store, Command::Get { id: "doc".into() }).await.unwrap());

        store.shutdown().await.unwrap();
    }
}
