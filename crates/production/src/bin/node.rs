//! Frame-locked cluster node
//!
//! Joins a multicast group, completes the emitter/repeater handshake and
//! runs a paced host loop behind the cluster frame barrier.
//!
//! # Usage
//!
//! ```bash
//! # Emitter waiting for two repeaters
//! framelock-node --node-id 0 --role emitter --repeaters 2
//!
//! # Repeater from a configuration file, bound to a specific adapter
//! framelock-node --config node.toml --adapter eth1
//!
//! # Stop the whole cluster after 1000 frames
//! framelock-node --config node.toml --frames 1000
//! ```
//!
//! See `ClusterConfig` for the configuration file format.

use anyhow::{bail, Context, Result};
use clap::Parser;
use framelock_production::{init_logging, run_host_loop, start_udp, ClusterConfig, HostLoopConfig};
use framelock_types::{NodeId, NodeRole};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Frame-locked cluster node
#[derive(Parser, Debug)]
#[command(name = "framelock-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node id in [0, 63] (overrides config)
    #[arg(long)]
    node_id: Option<u8>,

    /// Node role: emitter, repeater or backup (overrides config)
    #[arg(long)]
    role: Option<NodeRole>,

    /// Repeaters the emitter waits for during the handshake
    #[arg(long)]
    repeaters: Option<usize>,

    /// Run without cluster logic
    #[arg(long)]
    standalone: bool,

    /// Multicast group address
    #[arg(long)]
    group: Option<Ipv4Addr>,

    /// Receive port
    #[arg(long)]
    rx_port: Option<u16>,

    /// Transmit port
    #[arg(long)]
    tx_port: Option<u16>,

    /// Network adapter name or IPv4 address
    #[arg(long)]
    adapter: Option<String>,

    #[arg(long)]
    handshake_timeout_ms: Option<u64>,

    #[arg(long)]
    communication_timeout_ms: Option<u64>,

    /// Shut down when no frame starts within this many milliseconds
    #[arg(long)]
    debug_tick_budget_ms: Option<u64>,

    #[arg(long)]
    target_fps: Option<u32>,

    /// Request a cluster shutdown after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to log file (redirects all logs to this file)
    #[arg(long)]
    logfile: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<ClusterConfig> {
    let mut config = match &cli.config {
        Some(path) => ClusterConfig::load(path)?,
        None => {
            let (Some(node_id), Some(role)) = (cli.node_id, cli.role) else {
                bail!("Either --config or both --node-id and --role are required");
            };
            let node_id = NodeId::new(node_id)
                .with_context(|| format!("Node id {node_id} is out of range"))?;
            ClusterConfig::new(node_id, role)
        }
    };
    apply_overrides(&mut config, cli)?;
    Ok(config)
}

/// Apply CLI overrides to the configuration.
fn apply_overrides(config: &mut ClusterConfig, cli: &Cli) -> Result<()> {
    if let Some(node_id) = cli.node_id {
        config.node.node_id = NodeId::new(node_id)
            .with_context(|| format!("Node id {node_id} is out of range"))?;
    }
    if let Some(role) = cli.role {
        config.node.role = role;
    }
    if let Some(repeaters) = cli.repeaters {
        config.node.repeaters = repeaters;
    }
    if cli.standalone {
        config.node.standalone = true;
    }
    if let Some(group) = cli.group {
        config.network.group = group;
    }
    if let Some(port) = cli.rx_port {
        config.network.rx_port = port;
    }
    if let Some(port) = cli.tx_port {
        config.network.tx_port = port;
    }
    if let Some(ref adapter) = cli.adapter {
        config.network.adapter = Some(adapter.clone());
    }
    if let Some(timeout) = cli.handshake_timeout_ms {
        config.timing.handshake_timeout_ms = timeout;
    }
    if let Some(timeout) = cli.communication_timeout_ms {
        config.timing.communication_timeout_ms = timeout;
    }
    if let Some(budget) = cli.debug_tick_budget_ms {
        config.timing.debug_tick_budget_ms = Some(budget);
    }
    if let Some(fps) = cli.target_fps {
        config.timing.target_fps = fps;
    }
    if let Some(ref logfile) = cli.logfile {
        config.logging.log_file = Some(logfile.clone());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _log_guard = init_logging(&cli.log_level, config.logging.log_file.as_deref())?;

    info!(
        node_id = %config.node.node_id,
        role = %config.node.role,
        repeaters = config.node.repeaters,
        target_fps = config.timing.target_fps,
        "Node configuration loaded"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, stopping the cluster");
                    shutdown.store(true, Ordering::Release);
                }
                Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
            }
        });
    }

    let host = HostLoopConfig {
        frame_interval: config.frame_interval(),
        max_frames: cli.frames,
        ..HostLoopConfig::default()
    };
    let result = tokio::task::spawn_blocking(move || {
        let mut driver = start_udp(&config);
        run_host_loop(&mut driver, &host, &shutdown)
    })
    .await
    .context("Host loop panicked")?;

    match result {
        Ok(frames) => {
            info!(frames, "Node stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Node failed");
            bail!("Node failed: {e}")
        }
    }
}
