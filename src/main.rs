//! rotfs - mount a directory through a ROT13 byte-substitution overlay.
//!
//! Usage: rotfs <source> <mountpoint>

use anyhow::{Context, Result};
use clap::Parser;
use rotfs::{MountConfig, RotFs};
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rotfs")]
#[command(about = "Mount a directory through a transparent ROT13 overlay")]
#[command(version)]
struct Cli {
    /// Backing directory to overlay
    source: PathBuf,

    /// Mountpoint for the filesystem
    mount: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Mount as read-only (default: read-write)
    #[arg(long)]
    read_only: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // The backing root is fixed for the lifetime of the mount; resolve it
    // to an absolute path once, before anything is served.
    let source = cli
        .source
        .canonicalize()
        .with_context(|| format!("Invalid source path: {}", cli.source.display()))?;
    if !source.is_dir() {
        anyhow::bail!("Source path is not a directory: {}", source.display());
    }
    if !cli.mount.exists() {
        anyhow::bail!("Mountpoint does not exist: {}", cli.mount.display());
    }

    let config = MountConfig::default()
        .read_only(cli.read_only)
        .allow_other(cli.allow_other);
    let options = config.mount_options();
    let fs = RotFs::new(source.clone(), config);

    // Set up channel for signal handling
    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to set signal handler")?;

    info!(source = %source.display(), mount = %cli.mount.display(), "Mounting overlay (press Ctrl+C to unmount)");

    let session = fuser::spawn_mount2(fs, &cli.mount, &options).map_err(|e| {
        error!(error = %e, "Mount failed");
        anyhow::anyhow!("Failed to mount filesystem: {}", e)
    })?;

    info!("Filesystem mounted at {}", cli.mount.display());

    match rx.recv() {
        Ok(()) => info!("Received interrupt signal, unmounting..."),
        Err(_) => warn!("Signal channel closed unexpectedly"),
    }

    drop(session);
    info!("Filesystem unmounted");
    Ok(())
}
