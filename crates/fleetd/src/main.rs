//! fleetd — the fleetshift daemon.
//!
//! Single binary that assembles the fleetshift subsystems:
//! - In-memory cluster seeded from `fleet.toml`
//! - Cluster simulator (replication, placement, pod startup)
//! - REST API for workloads, nodes and rollouts
//!
//! # Usage
//!
//! ```text
//! fleetd serve --config deploy/fleet.toml
//! fleetd rollout --config deploy/fleet.toml --namespace prod \
//!     --old web-v1 --manifest deploy/web-v2.yaml --node-label web_version
//! ```

mod rollout_once;
mod seed;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetshift daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed the simulated cluster and serve the REST API until Ctrl-C.
    Serve {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Override `[server] listen`.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Run one rollout against the seeded cluster and print the result.
    Rollout {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        #[arg(long, default_value = "default")]
        namespace: String,

        /// Workload being replaced.
        #[arg(long)]
        old: String,

        /// Manifest of the replacement workload.
        #[arg(long)]
        manifest: PathBuf,

        /// Partition label key. Selects the node-by-node strategy; without
        /// it old pods are swapped fleet-wide.
        #[arg(long)]
        node_label: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fleetd=debug,fleetshift=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, listen } => serve::run(&config, listen).await,
        Command::Rollout {
            config,
            namespace,
            old,
            manifest,
            node_label,
        } => rollout_once::run(&config, &namespace, &old, &manifest, node_label).await,
    }
}

/// Await a background task. A panic or abort is logged and reported as `false`.
pub(crate) async fn join_task(handle: JoinHandle<()>, task: &str) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!(task, error = %e, "background task failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_task_joins_cleanly() {
        assert!(join_task(tokio::spawn(async {}), "noop").await);
    }

    #[tokio::test]
    async fn panicked_task_is_reported() {
        let handle: JoinHandle<()> = tokio::spawn(async { panic!("simulator blew up") });
        assert!(!join_task(handle, "cluster simulator").await);
    }

    #[tokio::test]
    async fn aborted_task_is_reported() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        assert!(!join_task(handle, "progress reporter").await);
    }
}
