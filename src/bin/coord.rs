//! Coordinator binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use shardkeeper::common::{parse_duration, Config};
use shardkeeper::coordinator::{AddReplica, CreateCollection};
use shardkeeper::metastore::{MemoryStore, MetaStore};
use shardkeeper::node::LocalNodes;
use shardkeeper::Coordinator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkeeper")]
#[command(about = "Cluster state coordinator: topology, leader election, convergence", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario against an in-process cluster and print the final state
    Simulate {
        /// Scenario file (TOML)
        #[arg(long)]
        scenario: PathBuf,

        /// Persist metadata in a RocksDB directory instead of memory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Also print metrics in Prometheus text format
        #[arg(long)]
        metrics: bool,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    nodes: Vec<String>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Step {
    CreateCollection(CreateCollection),
    DeleteCollection {
        name: String,
    },
    AddReplica(AddReplica),
    RemoveReplica {
        core_name: String,
        #[serde(default)]
        force: bool,
    },
    Index {
        collection: String,
        count: usize,
        #[serde(default = "default_prefix")]
        prefix: String,
    },
    CrashNode {
        node: String,
    },
    StartNode {
        node: String,
    },
    WaitForRecoveries {
        collection: String,
        #[serde(default)]
        timeout: Option<String>,
    },
    WaitForLeader {
        collection: String,
        shard: String,
        #[serde(default)]
        timeout: Option<String>,
    },
}

fn default_prefix() -> String {
    "doc".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::try_load()?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Simulate {
            scenario,
            db,
            metrics,
        } => {
            let scenario = load_scenario(&scenario)?;
            let store = open_store(db, config.coordinator.watch_buffer)?;
            let span = tracing::info_span!(
                "scenario",
                run_id = %uuid::Uuid::new_v4(),
                coordinator = %config.node_id
            );
            run(&config, store, scenario, metrics).instrument(span).await?;
        }
    }

    Ok(())
}

fn load_scenario(path: &PathBuf) -> anyhow::Result<Scenario> {
    let scenario = config::Config::builder()
        .add_source(config::File::from(path.as_path()).format(config::FileFormat::Toml))
        .build()
        .with_context(|| format!("reading scenario {}", path.display()))?
        .try_deserialize()
        .with_context(|| format!("parsing scenario {}", path.display()))?;
    Ok(scenario)
}

#[cfg(feature = "rocksdb")]
fn open_store(db: Option<PathBuf>, watch_buffer: usize) -> anyhow::Result<Arc<dyn MetaStore>> {
    match db {
        Some(path) => Ok(Arc::new(shardkeeper::metastore::RocksStore::open(
            path,
            watch_buffer,
        )?)),
        None => Ok(Arc::new(MemoryStore::new(watch_buffer))),
    }
}

#[cfg(not(feature = "rocksdb"))]
fn open_store(db: Option<PathBuf>, watch_buffer: usize) -> anyhow::Result<Arc<dyn MetaStore>> {
    if db.is_some() {
        anyhow::bail!("--db requires building with the `rocksdb` feature");
    }
    Ok(Arc::new(MemoryStore::new(watch_buffer)))
}

fn timeout_or(value: &Option<String>, default: Duration) -> anyhow::Result<Duration> {
    match value {
        Some(text) => Ok(parse_duration(text)?),
        None => Ok(default),
    }
}

async fn run(
    config: &Config,
    store: Arc<dyn MetaStore>,
    scenario: Scenario,
    print_metrics: bool,
) -> anyhow::Result<()> {
    let nodes = Arc::new(LocalNodes::new(store.clone()));
    for node in &scenario.nodes {
        nodes.start_node(node)?;
    }

    let coord = Coordinator::start(config.coordinator.clone(), store, nodes.clone())?;
    let default_wait = config.coordinator.default_wait_timeout();
    tracing::info!(steps = scenario.steps.len(), "running scenario");

    for (i, step) in scenario.steps.into_iter().enumerate() {
        tracing::info!(step = i + 1, ?step, "step");
        match step {
            Step::CreateCollection(req) => {
                coord.create_collection(req).await?;
            }
            Step::DeleteCollection { name } => coord.delete_collection(&name).await?,
            Step::AddReplica(req) => {
                coord.add_replica(req).await?;
            }
            Step::RemoveReplica { core_name, force } => {
                coord.remove_replica(&core_name, force).await?;
            }
            Step::Index {
                collection,
                count,
                prefix,
            } => {
                let docs: Vec<(String, String)> = (0..count)
                    .map(|n| (format!("{}{}", prefix, n), format!("body {}", n)))
                    .collect();
                let accepted = nodes.index(&coord.current_state(), &collection, &docs).await?;
                tracing::info!(collection = %collection, accepted, "indexed");
            }
            Step::CrashNode { node } => nodes.crash_node(&node)?,
            Step::StartNode { node } => {
                nodes.start_node(&node)?;
            }
            Step::WaitForRecoveries {
                collection,
                timeout,
            } => {
                coord
                    .wait_for_recoveries(&collection, timeout_or(&timeout, default_wait)?)
                    .await
                    .into_result()?;
            }
            Step::WaitForLeader {
                collection,
                shard,
                timeout,
            } => {
                let leader = coord
                    .get_leader_retry(&collection, &shard, timeout_or(&timeout, default_wait)?)
                    .await?;
                tracing::info!(collection = %collection, shard = %shard, leader = %leader.core_url(), "leader");
            }
        }
    }

    let report = serde_json::json!({
        "state": coord.current_state().as_ref(),
        "elections": coord.election_phases(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    if print_metrics {
        println!("{}", coord.metrics().to_prometheus());
    }

    coord.shutdown();
    Ok(())
}
