//! Serve command - run the pack calculation HTTP service.

use anyhow::{anyhow, Result};
use clap::Args;
use log::LevelFilter;
use packer::{CatalogStore, PackCatalog, Packer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::PackerConfig;
use crate::handler::{Handler, Limits};
use crate::logging::{self, LogFormat};
use crate::server::{PackServer, ServerOptions, ShutdownHandle};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HTTP_TIMEOUT: u64 = 10;

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Configuration file (default: packer.toml, searched upward from the current directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Request timeout in seconds
    #[arg(long)]
    pub http_timeout: Option<u64>,

    /// Number of worker threads (default: number of CPU cores)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (text or json)
    #[arg(long)]
    pub log_format: Option<String>,
}

/// Effective settings after merging CLI arguments over the config file.
#[derive(Debug)]
pub struct Settings {
    pub server: ServerOptions,
    pub log_level: LevelFilter,
    pub log_format: LogFormat,
    pub catalog: PackCatalog,
    pub limits: Limits,
}

impl Settings {
    pub fn resolve(args: &ServeArgs, config: PackerConfig) -> Result<Self> {
        let workers = args
            .workers
            .or(config.server.workers)
            .filter(|&workers| workers > 0)
            .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(4));

        let log_level = logging::parse_level(
            args.log_level
                .as_deref()
                .or(config.log.level.as_deref())
                .unwrap_or("info"),
        )?;
        let log_format = match args.log_format.as_deref().or(config.log.format.as_deref()) {
            Some(format) => format.parse()?,
            None => LogFormat::default(),
        };

        let catalog = match config.packs.sizes {
            Some(sizes) => PackCatalog::new(sizes).map_err(|e| anyhow!("Invalid pack sizes in config: {}", e))?,
            None => PackCatalog::default(),
        };

        let defaults = Limits::default();
        let limits = Limits {
            max_order: config.limits.max_order.unwrap_or(defaults.max_order),
            max_horizon: config.limits.max_horizon.unwrap_or(defaults.max_horizon),
            max_pack_sizes: config.limits.max_pack_sizes.unwrap_or(defaults.max_pack_sizes),
        };
        if limits.max_order <= 0 {
            return Err(anyhow!("limits.max_order must be positive, got {}", limits.max_order));
        }
        limits
            .check_catalog(&catalog)
            .map_err(|e| anyhow!("Invalid pack sizes in config: {}", e))?;

        let max_in_flight = config
            .server
            .max_in_flight
            .filter(|&max| max > 0)
            .unwrap_or(workers * 2);

        Ok(Self {
            server: ServerOptions {
                host: args
                    .host
                    .clone()
                    .or(config.server.host)
                    .unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: args.port.or(config.server.port).unwrap_or(DEFAULT_PORT),
                workers,
                max_in_flight,
                http_timeout: Duration::from_secs(
                    args.http_timeout
                        .or(config.server.http_timeout)
                        .unwrap_or(DEFAULT_HTTP_TIMEOUT),
                ),
            },
            log_level,
            log_format,
            catalog,
            limits,
        })
    }
}

pub fn execute(args: ServeArgs) -> Result<i32> {
    let config = match &args.config {
        Some(path) => PackerConfig::load_file(path)?,
        None => PackerConfig::load_from_cwd()?.unwrap_or_default(),
    };
    let settings = Settings::resolve(&args, config)?;

    logging::init(settings.log_level, settings.log_format)?;
    log::info!(
        "parsed config: level={} format={:?} packs={:?} host={} port={} workers={} max_in_flight={} http_timeout={:?} max_order={} max_horizon={}",
        settings.log_level,
        settings.log_format,
        settings.catalog.sizes(),
        settings.server.host,
        settings.server.port,
        settings.server.workers,
        settings.server.max_in_flight,
        settings.server.http_timeout,
        settings.limits.max_order,
        settings.limits.max_horizon
    );

    let catalog = Arc::new(CatalogStore::new(settings.catalog));
    let calculator = Arc::new(Packer::new().with_max_horizon(settings.limits.max_horizon));
    let handler = Handler::new(catalog, calculator, settings.limits);
    let server = PackServer::bind(settings.server, handler)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(server.shutdown_handle(), Arc::clone(&interrupted))?;

    server.run()?;

    // stopped by a signal, so exit with code 1
    if interrupted.load(Ordering::SeqCst) {
        return Ok(1);
    }
    Ok(0)
}

/// Shut the server down on Ctrl-C or SIGTERM.
fn spawn_signal_listener(shutdown: ShutdownHandle, interrupted: Arc<AtomicBool>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("Failed to create async runtime: {}", e))?;

    thread::Builder::new()
        .name("packer-signals".to_string())
        .spawn(move || {
            rt.block_on(wait_for_signal());
            log::info!("signal interrupt detected, shutting down ...");
            interrupted.store(true, Ordering::SeqCst);
            shutdown.shutdown();
        })
        .map_err(|e| anyhow!("Failed to spawn signal listener: {}", e))?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = wait_for_ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            log::warn!("Failed to listen for SIGTERM: {}", e);
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
