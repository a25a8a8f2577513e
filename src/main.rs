use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smbfs::config::Config;
use smbfs::fs::{ConnectError, SmbFilesystem};
use smbfs::fuse::MountOptions;
use smbfs::smb::{Authenticator, MemoryShare, SmbClient};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "smbfs")]
#[command(about = "Mount SMB shares as FUSE filesystems")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./smbfs.toml when present)
    #[arg(short, long, env = "SMBFS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount the configured share and wait for Ctrl+C
    Mount {
        /// Overrides fuse.mount_point from the configuration
        mountpoint: Option<PathBuf>,

        /// Serve an in-memory share seeded from this local directory instead
        /// of connecting to the server
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Allow other users to access the mount
        #[arg(long)]
        allow_other: bool,
    },
    /// Check that the configured share can be reached
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Mount { mountpoint, seed, allow_other } => {
            let mountpoint =
                mountpoint.unwrap_or_else(|| PathBuf::from(&config.fuse.mount_point));
            let mut options = MountOptions::for_share(&config.share.share_path);
            options.allow_other = allow_other || config.fuse.allow_other;

            match seed {
                Some(seed) => {
                    let share = MemoryShare::new(&config.share.share_path);
                    seed_share(&share, &seed, "")
                        .with_context(|| format!("Failed to seed share from {}", seed.display()))?;
                    tracing::warn!(seed = %seed.display(), "Serving an in-memory share");
                    let fs = start_filesystem(&config, move |auth| share.connect(auth))?;
                    mount_and_wait(fs, &config, &mountpoint, &options).await?;
                }
                None => {
                    let fs = start_remote(&config)?;
                    mount_and_wait(fs, &config, &mountpoint, &options).await?;
                }
            }
        }
        Command::Probe => {
            let mut fs = start_remote(&config)?;
            let result = fs.ensure_connected().await;
            fs.shutdown();

            println!("{}: {}", config.share.share_path, result);
            if result != ConnectError::Ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn mount_and_wait<C: SmbClient + 'static>(
    fs: SmbFilesystem<C>,
    config: &Config,
    mountpoint: &Path,
    options: &MountOptions,
) -> Result<()> {
    let probe = fs.ensure_connected().await;
    if !probe.is_ok() {
        anyhow::bail!("Share {} is not reachable: {}", config.share.share_path, probe);
    }

    let session = smbfs::fuse::mount(fs, mountpoint, options)?;
    tracing::info!("Press Ctrl+C to unmount");
    tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl+C")?;

    tracing::info!(mountpoint = %mountpoint.display(), "Unmounting");
    drop(session);
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "smbfs=debug,info".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
    }
}

fn start_filesystem<C, F>(config: &Config, connect: F) -> Result<SmbFilesystem<C>>
where
    C: SmbClient + 'static,
    F: FnOnce(Authenticator) -> C + Send + 'static,
{
    SmbFilesystem::new(&config.share, connect).context("Failed to start filesystem")
}

#[cfg(feature = "smbclient")]
fn start_remote(config: &Config) -> Result<SmbFilesystem<smbfs::smb::RemoteClient>> {
    start_filesystem(config, smbfs::smb::RemoteClient::new)
}

#[cfg(not(feature = "smbclient"))]
fn start_remote(_config: &Config) -> Result<SmbFilesystem<smbfs::smb::MemoryClient>> {
    anyhow::bail!(
        "Built without SMB client support; rebuild with `--features smbclient` or mount with --seed"
    )
}

/// Copy a local tree into the in-memory share.
fn seed_share(share: &MemoryShare, dir: &Path, prefix: &str) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 name");
            continue;
        };
        let path = format!("{}/{}", prefix, name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            share.add_dir(&path);
            seed_share(share, &entry.path(), &path)?;
        } else if file_type.is_file() {
            share.add_file(&path, &std::fs::read(entry.path())?);
        }
    }
    Ok(())
}
