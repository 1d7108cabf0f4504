//! Comet server CLI binary.
//!
//! # Commands
//!
//! - `server` - Start the Comet HTTP server
//! - `config` - Print the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use comet::{
    config::CometConfig,
    policy::PolicyKind,
    server::{serve, ServerConfig},
    VERSION,
};

#[derive(Parser)]
#[command(name = "comet")]
#[command(version = VERSION)]
#[command(about = "Comet push-messaging server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Comet HTTP server
    Server {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Bind to all interfaces (0.0.0.0)
        #[arg(long)]
        bind_all: bool,

        /// Configuration file (default: platform config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Connection strategy (blocking, non-blocking)
        #[arg(long)]
        policy: Option<String>,

        /// Heartbeat interval in milliseconds
        #[arg(long)]
        heartbeat_ms: Option<u64>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Emit logs as JSON lines
        #[arg(long)]
        log_json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file (default: platform config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            host,
            bind_all,
            config,
            policy,
            heartbeat_ms,
            verbose,
            log_json,
        } => {
            init_logging(verbose, log_json);
            cmd_server(port, host, bind_all, config, policy, heartbeat_ms)
        },
        Commands::Config { config } => cmd_config(config),
    }
}

/// Load configuration: explicit file, else the default path if present, else
/// defaults. `COMET_*` variables are applied on top.
fn load_config(path: Option<PathBuf>) -> anyhow::Result<CometConfig> {
    let mut config = match path {
        Some(path) => CometConfig::from_file(path)?,
        None => match CometConfig::default_path().filter(|p| p.exists()) {
            Some(path) => CometConfig::from_file(path)?,
            None => CometConfig::default(),
        },
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn cmd_config(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn cmd_server(
    port: Option<u16>,
    host: Option<String>,
    bind_all: bool,
    config_path: Option<PathBuf>,
    policy: Option<String>,
    heartbeat_ms: Option<u64>,
) -> anyhow::Result<()> {
    let mut comet = load_config(config_path)?;
    if let Some(host) = host {
        comet.server.host = host;
    }
    if let Some(port) = port {
        comet.server.port = port;
    }
    if let Some(policy) = policy {
        comet.transport.policy = policy
            .parse::<PolicyKind>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(ms) = heartbeat_ms {
        comet.transport.heartbeat_ms = ms;
    }

    let mut config = ServerConfig::from_comet_config(comet)?;
    if bind_all {
        config = config.bind_all();
    }

    tracing::info!("Starting Comet server on {}", config.addr);
    tracing::info!("Connection policy: {}", config.comet.transport.policy);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        serve(config).await?;
        Ok::<_, anyhow::Error>(())
    })
}
