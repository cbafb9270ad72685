//! Cluster node binary

use clap::{Parser, Subcommand};
use minisearch::{ClusterNode, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minisearch-node")]
#[command(about = "minisearch cluster node: discovery, elections and shard allocation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node and join (or form) a cluster
    Serve {
        /// Node name
        #[arg(long)]
        name: Option<String>,

        /// Transport bind address
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Seed addresses (comma-separated)
        #[arg(long, value_delimiter = ',')]
        seeds: Vec<String>,

        /// Directory for the persisted coordination state
        #[arg(long)]
        data: Option<PathBuf>,

        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Master-eligible
        #[arg(long)]
        master: bool,

        /// Not master-eligible
        #[arg(long)]
        no_master: bool,

        /// Holds shards (use --data-role=false for a dedicated master)
        #[arg(long)]
        data_role: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            name,
            bind,
            seeds,
            data,
            config,
            master,
            no_master,
            data_role,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(name) = name {
                config.node.name = Some(name);
            }
            if let Some(bind) = bind {
                config.node.bind_addr = bind;
            }
            if !seeds.is_empty() {
                config.discovery.seed_hosts = seeds;
            }
            if let Some(data) = data {
                config.node.data_path = data;
            }
            if master {
                config.node.master = true;
            }
            if no_master {
                config.node.master = false;
            }
            if let Some(data_role) = data_role {
                config.node.data = data_role;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            tracing::info!(
                "starting minisearch {} in cluster [{}] on {}",
                minisearch::VERSION,
                config.node.cluster_name,
                config.node.bind_addr
            );
            let node = ClusterNode::bind(&config).await?;
            node.serve().await?;
        }
    }

    Ok(())
}
