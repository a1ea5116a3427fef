//! Gluster Provisioner
//!
//! Command line front end for the device lifecycle on a single storage node:
//! turn a raw block device into a volume group and report its capacity, or
//! tear that group down again.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gluster_provisioner::topology::generate_id;
use gluster_provisioner::{
    Config, DeviceCapacity, DeviceProvisioner, LoggingConfig, Result, SshCommandRunner, StorageSize,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Gluster Provisioner - LVM device lifecycle on GlusterFS storage nodes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "PROVISIONER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the physical volume and volume group, print their capacity
    Setup {
        /// Storage node to run on
        #[arg(long)]
        host: String,
        /// Raw block device path
        #[arg(long)]
        device: String,
        /// Device id naming the volume group (generated if omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Remove the volume group and physical volume
    Teardown {
        #[arg(long)]
        host: String,
        #[arg(long)]
        device: String,
        #[arg(long)]
        id: String,
    },
}

#[derive(Serialize)]
struct SetupReport {
    id: String,
    volume_group: String,
    #[serde(flatten)]
    capacity: DeviceCapacity,
    storage: StorageSize,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= args.log_json;

    init_logging(&config.logging);

    info!("Starting {} {}", gluster_provisioner::NAME, gluster_provisioner::VERSION);

    let runner = Arc::new(SshCommandRunner::new(config.ssh.clone()));
    let provisioner = DeviceProvisioner::new(runner, config.provisioner.clone());

    match args.command {
        Command::Setup { host, device, id } => {
            let id = id.unwrap_or_else(generate_id);
            let capacity = provisioner.setup(&host, &device, &id).await.map_err(|e| {
                error!(host = %host, device = %device, error = %e, "Setup failed");
                e
            })?;

            let report = SetupReport {
                volume_group: provisioner.vg_name(&id),
                id,
                capacity,
                storage: capacity.storage(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Teardown { host, device, id } => {
            provisioner.teardown(&host, &device, &id).await.map_err(|e| {
                error!(host = %host, device = %device, error = %e, "Teardown failed");
                e
            })?;
            info!(host = %host, vg = %provisioner.vg_name(&id), "Removed volume group");
        }
    }

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so stdout carries only the JSON report
    if config.json {
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
