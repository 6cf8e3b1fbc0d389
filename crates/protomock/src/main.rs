use anyhow::Context as _;
use clap::{Parser, Subcommand};
use protomock::config::{Config, LogConfig, LogFormat};
use protomock::routing::{DirectorySource, RouteTable, SourceTree};
use protomock::scripting::SandboxExecutor;
use protomock::server::{AdminServer, MockServer};
use protomock::watcher::MockWatcher;
use protomock::MockEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Protomock - serve HTTP and gRPC mocks from a directory of JavaScript fixtures
#[derive(Parser, Debug)]
#[command(name = "protomock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "PROTOMOCK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Mocks root directory (overrides `mocks_dir`)
    #[arg(short, long, env = "PROTOMOCK_MOCKS_DIR", global = true)]
    mocks_dir: Option<PathBuf>,

    /// Mock server port (overrides `http.port`)
    #[arg(short, long, env = "PROTOMOCK_PORT", global = true)]
    port: Option<u16>,

    /// Admin API port (overrides `admin.port`)
    #[arg(long, env = "PROTOMOCK_ADMIN_PORT", global = true)]
    admin_port: Option<u16>,

    /// Reload routes when the mocks tree changes
    #[arg(short, long, env = "PROTOMOCK_WATCH", global = true)]
    watch: bool,

    /// Log output format (overrides `log.format`)
    #[arg(long, env = "PROTOMOCK_LOG_FORMAT", value_parser = parse_log_format, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Serve mocks (default)
    Serve,
    /// Load the mocks tree and report errors without serving
    Check,
    /// Print the route table
    Routes {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn parse_log_format(raw: &str) -> Result<LogFormat, String> {
    match raw.to_ascii_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{other}' (expected text or json)")),
    }
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(dir) = &self.mocks_dir {
            config.mocks_dir = dir.clone();
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(port) = self.admin_port {
            config.admin.port = port;
        }
        if self.watch {
            config.watch.enabled = true;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(log: &LogConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.level));

    match log.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config.log);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Check => check(&config),
        Command::Routes { json } => routes(&config, json),
    }
}

fn load_table(config: &Config) -> anyhow::Result<RouteTable> {
    let tree = SourceTree::from_dir(&config.mocks_dir)?;
    Ok(RouteTable::build(&tree)?)
}

fn check(config: &Config) -> anyhow::Result<()> {
    let table = load_table(config)
        .with_context(|| format!("mocks tree {} is invalid", config.mocks_dir.display()))?;
    let counts = table
        .counts()
        .into_iter()
        .map(|(protocol, n)| format!("{n} {protocol}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("{}: {} routes ({counts})", config.mocks_dir.display(), table.len());
    Ok(())
}

fn routes(config: &Config, json: bool) -> anyhow::Result<()> {
    let routes = load_table(config)?.routes();
    if json {
        println!("{}", serde_json::to_string_pretty(&routes)?);
        return Ok(());
    }
    for route in routes {
        println!(
            "{:<5} {:<7} {:<40} {}",
            route.protocol.as_str(),
            route.method,
            route.pattern,
            route.script
        );
    }
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let executor = SandboxExecutor::new(config.script.pool_config(), config.script.limits())?;
    let engine = match MockEngine::new(DirectorySource::new(&config.mocks_dir), executor) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("Failed to load mocks from {}: {}", config.mocks_dir.display(), e);
            return Err(e.into());
        }
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut tasks = Vec::new();

    let server = MockServer::bind(config.http.socket_addr(), Arc::clone(&engine)).await?;
    tasks.push(tokio::spawn(server.run(shutdown_tx.subscribe())));

    if config.admin.enabled {
        let admin = AdminServer::bind(config.admin.socket_addr(), Arc::clone(&engine)).await?;
        tasks.push(tokio::spawn(admin.run(shutdown_tx.subscribe())));
    }

    let _watcher = if config.watch.enabled {
        Some(MockWatcher::spawn(
            &config.mocks_dir,
            Arc::clone(&engine),
            Duration::from_millis(config.watch.debounce_ms),
        )?)
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    for task in tasks {
        task.await??;
    }
    Ok(())
}
