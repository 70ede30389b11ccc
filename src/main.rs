//! Waypoint - policy-routed proxy core

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use waypoint::app::{api, Executor, LiveState, ReconfigScope};
use waypoint::config;
use waypoint::dialer::Dialer;
use waypoint::dns::DnsServerSlot;
use waypoint::error::{Error, Result};
use waypoint::listener::ListenerRegistry;
use waypoint::log::{self, LogLevel};
use waypoint::profile::CacheFile;

const CACHE_FILE: &str = "cache.json";

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    let log = Arc::new(log::init(LogLevel::Info));

    let path = args.config.unwrap_or_else(config::default_path);
    let cfg = match config::parse_with_path(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("[Config] {}: {}", path.display(), e);
            return Err(e);
        }
    };

    let api_listen = args
        .api_listen
        .or_else(|| Some(cfg.general.external_controller.clone()).filter(|s| !s.is_empty()));
    let api_addr: Option<SocketAddr> = match api_listen {
        Some(addr) => Some(
            addr.parse()
                .map_err(|_| Error::ConfigParse(format!("invalid API address {}", addr)))?,
        ),
        None => None,
    };

    let home = path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let store = Arc::new(CacheFile::load(home.join(CACHE_FILE)));

    info!("Waypoint v{} starting...", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let state = Arc::new(LiveState::new(Dialer::default()));
        let executor = Arc::new(Executor::new(
            state,
            Arc::new(ListenerRegistry::new()),
            Arc::new(DnsServerSlot::new()),
            store,
            log,
        ));
        executor.apply_config(cfg, ReconfigScope::Full);

        let (shutdown_tx, _) = broadcast::channel(1);
        let api_task = api_addr.map(|addr| {
            tokio::spawn(api::serve(addr, executor.clone(), shutdown_tx.subscribe()))
        });

        tokio::signal::ctrl_c().await?;

        let _ = shutdown_tx.send(());
        if let Some(task) = api_task {
            let _ = task.await;
        }
        executor.shutdown();
        Ok::<(), Error>(())
    })?;

    info!("Goodbye!");
    Ok(())
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    version: bool,
    api_listen: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut version = false;
        let mut api_listen = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--api" => {
                    if i + 1 < args.len() {
                        api_listen = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') && config.is_none() => {
                    config = Some(PathBuf::from(arg));
                }
                _ => {}
            }
            i += 1;
        }

        Self { config, version, api_listen }
    }
}

fn print_help() {
    println!(r#"Waypoint - policy-routed proxy core

USAGE:
    waypoint [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file (default: $WAYPOINT_HOME/config.json)
    --api <ADDR>            Control API listen address (e.g., 127.0.0.1:9090)
    -v, --version           Print version information
    -h, --help              Print help information

CONTROL API ENDPOINTS:
    GET /metrics             Prometheus metrics
    GET /configs             Running general settings
    PUT /configs?force=true  Reload configuration
    GET /proxies             Live adapters
    PUT /proxies/<group>     Switch a selector group
"#);
}

fn print_version() {
    println!("Waypoint v{}", env!("CARGO_PKG_VERSION"));
}
