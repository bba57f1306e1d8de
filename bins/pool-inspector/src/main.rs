//! Pool Inspector
//!
//! Provisions one throwaway container (optionally on its own network), prints where its ports
//! are published, optionally waits for a port to accept connections, and tears everything down.

use anyhow::{Context, Result};
use clap::Parser;
use resource_pool::{ContainerOptions, Pool, PoolConfig};
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "pool-inspector")]
#[command(about = "Start a throwaway container, report its ports, clean up")]
struct Args {
    /// Image repository, e.g. `mysql`
    repository: String,

    #[arg(long, default_value = resource_pool::DEFAULT_TAG)]
    tag: String,

    /// Environment entry (`KEY=VALUE`), repeatable
    #[arg(long = "env")]
    env: Vec<String>,

    /// Command argument, repeatable
    #[arg(long = "cmd")]
    cmd: Vec<String>,

    /// Container port to publish, repeatable
    #[arg(long = "port")]
    ports: Vec<String>,

    /// Container path to bind-mount from the mount root, repeatable
    #[arg(long = "mount")]
    mounts: Vec<String>,

    /// Create a network with this name and attach the container to it
    #[arg(long)]
    network: Option<String>,

    /// Docker endpoint; falls back to DOCKER_HOST, DOCKER_URL, then the platform default
    #[arg(long, env = "POOL_DOCKER_ENDPOINT")]
    endpoint: Option<String>,

    /// Wait until this container port accepts TCP connections
    #[arg(long)]
    wait_port: Option<String>,

    /// Leave the host directories created for --mount in place
    #[arg(long)]
    keep_mount_root: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pool_inspector=debug,resource_pool=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = PoolConfig::from_env();
    if let Some(endpoint) = &args.endpoint {
        config = config.with_endpoint(endpoint.clone());
    }
    let mount_root = config.mount_root.clone();
    let pool = Pool::from_config(config)?;
    info!(endpoint = %pool.config().resolved_endpoint(), "Pool ready");

    let outcome = inspect(&pool, &args).await;
    if let Err(e) = &outcome {
        error!(error = %e, "Inspection failed");
    }

    let closed = pool.close().await;
    if let Err(e) = &closed {
        error!(error = %e, "Failed to tear down pool");
    }

    if !args.keep_mount_root {
        remove_mount_dirs(&mount_root, &args.mounts);
    }

    outcome?;
    closed.context("tear down pool")?;
    Ok(())
}

async fn inspect(pool: &Pool, args: &Args) -> Result<()> {
    let mut options = ContainerOptions::new()
        .tag(&args.tag)
        .env(&args.env)
        .cmd(&args.cmd)
        .exposed_ports(&args.ports)
        .mounts(&args.mounts);

    if let Some(name) = &args.network {
        let network = pool
            .create_network(name)
            .await
            .with_context(|| format!("create network {name}"))?;
        println!("network {} {}", network.name, network.id);
        options = options.network(network.id);
    }

    let id = pool
        .create_container(&args.repository, options)
        .await
        .with_context(|| format!("create container from {}", args.repository))?;
    pool.log_container(&id)?;
    println!("container {id}");

    for port in &args.ports {
        let address = pool.get_host_port(&id, port)?;
        println!("{port} -> {address}");
    }

    if let Some(port) = &args.wait_port {
        let address = pool.get_host_port(&id, port)?;
        info!(address = %address, "Waiting for port to accept connections");
        let target = address.as_str();
        pool.retry(move || async move {
            match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(target)).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(anyhow::anyhow!("connect {target}: {e}")),
                Err(_) => Err(anyhow::anyhow!("connect {target}: timed out")),
            }
        })
        .await
        .map_err(|e| anyhow::anyhow!("port {port} never became reachable: {e}"))?;
        println!("{port} ready");
    }

    Ok(())
}

fn remove_mount_dirs(root: &Path, mounts: &[String]) {
    for mount in mounts {
        let dir = root.join(mount.trim_start_matches('/'));
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => debug!(dir = %dir.display(), "Removed mount directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove mount directory"),
        }
    }
}
