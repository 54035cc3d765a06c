use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use retro_shell::{
    AppConfig, CacheStorage, DiskCacheStorage, HttpNetwork, MemoryCacheStorage, Network,
    OfflineCacheWorker, RegisterOutcome, WorkerHost,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    upstream: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    cache_dir: Option<PathBuf>,
    memory: bool,
    version_tag: Option<String>,
}

fn next_value(args: &[String], i: &mut usize, flag: &str) -> String {
    *i += 1;
    if let Some(value) = args.get(*i) {
        value.clone()
    } else {
        eprintln!("Error: {flag} requires a value");
        std::process::exit(1);
    }
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut cli = CliArgs::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => cli.config = Some(PathBuf::from(next_value(&args, &mut i, "--config"))),
            "-u" | "--upstream" => cli.upstream = Some(next_value(&args, &mut i, "--upstream")),
            "--host" => cli.host = Some(next_value(&args, &mut i, "--host")),
            "-p" | "--port" => {
                let value = next_value(&args, &mut i, "--port");
                if let Ok(port) = value.parse() {
                    cli.port = Some(port);
                } else {
                    eprintln!("Error: invalid port: {value}");
                    std::process::exit(1);
                }
            }
            "--cache-dir" => cli.cache_dir = Some(PathBuf::from(next_value(&args, &mut i, "--cache-dir"))),
            "--memory" => cli.memory = true,
            "--version-tag" => cli.version_tag = Some(next_value(&args, &mut i, "--version-tag")),
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown option: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    cli
}

fn print_usage() {
    eprintln!("Usage: retro-shell [OPTIONS]");
    eprintln!();
    eprintln!("Serves the app through a network-first cache with an offline fallback.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>     Config file (default: {})", AppConfig::default_path().display());
    eprintln!("  -u, --upstream <URL>    Origin to proxy (default: http://127.0.0.1:8000)");
    eprintln!("      --host <HOST>       Bind address (default: 127.0.0.1)");
    eprintln!("  -p, --port <PORT>       Bind port (default: 9780)");
    eprintln!("      --cache-dir <DIR>   Cache directory");
    eprintln!("      --memory            Keep caches in memory only");
    eprintln!("      --version-tag <TAG> Cache version tag (default: v2)");
    eprintln!("  -h, --help              Show this help");
    eprintln!();
    eprintln!("Logging is controlled with RUST_LOG (default: info).");
}

fn apply_overrides(mut config: AppConfig, cli: CliArgs) -> AppConfig {
    if let Some(upstream) = cli.upstream {
        config.server.upstream = upstream;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(cache_dir) = cli.cache_dir {
        config.paths.cache_dir = cache_dir;
    }
    if let Some(tag) = cli.version_tag {
        config.worker = config.worker.with_version(tag);
    }
    config
}

#[tokio::main]
async fn main() -> retro_shell::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = parse_args();
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let memory = cli.memory;
    let config = apply_overrides(AppConfig::load(&config_path)?, cli);
    config.validate()?;

    let storage: Arc<dyn CacheStorage> = if memory {
        log::info!("Using in-memory cache storage");
        Arc::new(MemoryCacheStorage::new())
    } else {
        log::info!("Using cache directory {}", config.paths.cache_dir.display());
        Arc::new(DiskCacheStorage::open_at(config.paths.cache_dir.clone()).await?)
    };
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(config.server.request_timeout())?);

    let scope = config.server.upstream.parse()?;
    let host = Arc::new(WorkerHost::new(Arc::clone(&storage), Arc::clone(&network)));
    let worker = OfflineCacheWorker::new(config.worker.clone(), scope, storage, network);

    match host.register(Arc::new(worker)).await {
        RegisterOutcome::Activated { install, activation } => {
            log::info!(
                "Worker {} active: {} shell resources cached, {} stale caches purged",
                config.worker.version,
                install.cached.len(),
                activation.purged.len()
            );
        }
        RegisterOutcome::Waiting { .. } => log::info!("Worker {} waiting", config.worker.version),
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        log::info!("Received SIGINT");
        shutdown.cancel();
    });

    retro_shell::server::run_server(&config.server, host, cancel).await
}
