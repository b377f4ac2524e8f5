pub mod file_lock;
pub mod monitor;
pub mod profiles;
pub mod sysfs;

use anyhow::Context;
use clap::{ArgAction, Parser};
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use nmd::backend::auth::PolicyAuthorizer;
use nmd::backend::connectivity::StaticConnectivity;
use nmd::{ConnectivityState, ManagerConfig, NetworkManager, StateFile};

use crate::file_lock::{acquire_daemon_lock, default_lock_path};
use crate::monitor::HostWatcher;
use crate::profiles::ProfileDir;
use crate::sysfs::{SysfsPlatform, SysfsRfkill};

/// How often sysfs, rfkill and the profile directory are re-read.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "nmd")]
#[command(disable_version_flag = true)]
#[command(version)]
struct Args {
    #[arg(short = 'V', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    /// Where the networking and radio switches are persisted.
    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,

    /// Directory of connection profiles, one `*.toml` file each.
    #[arg(long, value_name = "DIR")]
    profiles_dir: Option<PathBuf>,

    /// Device never managed, as `mac:<address>` or `interface-name:<name>`.
    #[arg(long = "unmanaged", value_name = "SPEC")]
    unmanaged: Vec<String>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Skip the single-instance lock.
    #[arg(long)]
    no_lock: bool,

    /// Directory holding `sys/` and `proc/`.
    #[arg(long, default_value = "/", value_name = "DIR")]
    sysfs_root: PathBuf,
}

fn data_dir() -> PathBuf {
    let mut dir = dirs::data_local_dir().unwrap_or(std::env::temp_dir());
    dir.push("nmd");
    dir
}

pub fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.version {
        println!("nmd {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));
        return Ok(());
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let _lock = if args.no_lock {
        None
    } else {
        let lock = acquire_daemon_lock(&default_lock_path()).map_err(anyhow::Error::msg)?;
        Some(lock)
    };

    let state_file = StateFile::load(
        args.state_file
            .unwrap_or_else(|| data_dir().join("state.toml")),
    );
    let profiles_dir = args
        .profiles_dir
        .unwrap_or_else(|| data_dir().join("profiles"));
    let profiles = ProfileDir::open(&profiles_dir)
        .with_context(|| format!("failed to load profiles from {}", profiles_dir.display()))?;
    let platform = SysfsPlatform::new(&args.sysfs_root);
    let rfkill = SysfsRfkill::new(&args.sysfs_root);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let watcher = HostWatcher::new(platform.clone(), rfkill.clone(), profiles.clone());
    let mut nm = NetworkManager::builder()
        .store(profiles)
        .platform(platform)
        .rfkill(rfkill)
        .authorizer(PolicyAuthorizer::deny_all())
        .connectivity(StaticConnectivity::new(ConnectivityState::Full))
        .config(ManagerConfig {
            unmanaged_specs: args.unmanaged,
            ..ManagerConfig::default()
        })
        .state_file(state_file)
        .build();

    runtime.block_on(async {
        nm.start();
        info!(
            "started with {} devices, state {}",
            nm.list_devices().len(),
            nm.state()
        );

        let (inputs, rx) = mpsc::unbounded_channel();
        let (stop, shutdown) = watch::channel(());
        let monitor = tokio::spawn(watcher.run(POLL_INTERVAL, inputs, shutdown.clone()));
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupted, shutting down"),
                Err(e) => error!("failed to listen for Ctrl-C: {e}"),
            }
            let _ = stop.send(());
        });

        nm.run(rx, shutdown).await;
        let _ = monitor.await;
    });

    nm.shutdown();
    info!("stopped");
    Ok(())
}
