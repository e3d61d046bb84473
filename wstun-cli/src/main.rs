//! wstun CLI
//!
//! A command-line interface for the wstun WebSocket VPN server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wstun_core::FileStore;
use wstun_server::{Config, Paths, Server, ServerConfig};

/// How long the server gets to stop after a signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// wstun - WebSocket VPN concentrator
#[derive(Parser)]
#[command(name = "wstun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/wstun/config.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace); defaults to the config's
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the VPN server
    Run,

    /// Create directories, the lease store and a configuration file
    Init(InitArgs),

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "wstun.toml")]
        output: PathBuf,
    },

    /// Show installation status
    Status {
        /// Also check every managed directory
        #[arg(long)]
        full: bool,
    },
}

#[derive(Args)]
struct InitArgs {
    /// Address the HTTP/WebSocket listener binds to
    #[arg(long)]
    listen: String,

    /// Tunnel network
    #[arg(long, default_value = "10.0.10.1/24")]
    cidr: String,

    /// Shared secret clients must send; empty disables authentication
    #[arg(long, default_value = "")]
    key: String,

    /// TUN interface name
    #[arg(long, default_value = "wstun")]
    device_name: String,

    #[arg(long, default_value_t = 1500)]
    mtu: u16,

    #[arg(long, default_value_t = 65536)]
    buffer_size: usize,

    /// Snappy-compress tunnel payloads
    #[arg(long)]
    compress: bool,
}

impl InitArgs {
    fn into_config(self) -> Config {
        Config {
            server: ServerConfig {
                listen: self.listen,
                cidr: self.cidr,
                key: self.key,
                device_name: self.device_name,
                mtu: self.mtu,
                buffer_size: self.buffer_size,
                compress: self.compress,
                ..ServerConfig::default()
            },
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));
            info!("Configuration loaded from {:?}", cli.config);
            run_server(config).await
        }
        Commands::Init(args) => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            init(&cli.config, args.into_config())
        }
        Commands::GenConfig { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            generate_config(output)
        }
        Commands::Status { full } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            show_status(&cli.config, full);
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load configuration from {:?}", path))
}

async fn run_server(config: Config) -> Result<()> {
    info!("Starting wstun server on {}...", config.server.listen);

    let server = Server::new(config).context("Failed to create server")?;
    let shutdown_tx = server.shutdown_handle();

    let mut server_handle = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut server_handle => {
            // The server stopped on its own; that is always a failure
            let result = result.context("Server task panicked")?;
            if let Err(ref e) = result {
                error!("Server error: {}", e);
            }
            return result.context("Server stopped");
        }
        signal = wait_for_shutdown() => signal?,
    }

    info!("Shutting down server...");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_handle).await {
        Ok(result) => result
            .context("Server task panicked")?
            .context("Server stopped with an error"),
        Err(_) => {
            warn!("Server did not stop within {:?}", SHUTDOWN_TIMEOUT);
            Ok(())
        }
    }
}

fn init(config_path: &Path, mut config: Config) -> Result<()> {
    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        config.paths.config_dir = dir.to_path_buf();
    }
    config.validate().context("Invalid settings")?;

    config
        .paths
        .provision()
        .context("Failed to create directories")?;

    let store_path = config.paths.allocator_file();
    FileStore::open(&store_path)
        .with_context(|| format!("Failed to open lease store {:?}", store_path))?;

    config
        .save(config_path)
        .with_context(|| format!("Failed to write configuration to {:?}", config_path))?;

    println!("Configuration written to {:?}", config_path);
    println!("Lease store at {:?}", store_path);
    println!("\nStart the server with: wstun -c {:?} run", config_path);
    Ok(())
}

fn generate_config(output: PathBuf) -> Result<()> {
    let sample = Config::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    info!("Generated sample configuration at {:?}", output);
    println!("Sample configuration written to {:?}", output);
    println!("\nEdit the configuration file and set your shared key before running.");

    Ok(())
}

fn show_status(config_path: &Path, full: bool) {
    let paths = match Config::load(config_path) {
        Ok(config) => {
            println!("config:       {:?} (ok)", config_path);
            config.paths
        }
        Err(e) if config_path.exists() => {
            println!("config:       {:?} (invalid: {})", config_path, e);
            Paths::default()
        }
        Err(_) => {
            println!("config:       {:?} (missing)", config_path);
            Paths::default()
        }
    };

    let store = paths.allocator_file();
    println!(
        "lease store:  {:?} ({})",
        store,
        if store.is_file() { "ok" } else { "missing" }
    );

    println!("tun driver:   {}", tun_status());

    if full {
        for (label, dir) in paths.dirs() {
            let state = if dir.is_dir() { "ok" } else { "missing" };
            println!("{:<13} {:?} ({})", format!("{} dir:", label), dir, state);
        }
    }
}

#[cfg(target_os = "linux")]
fn tun_status() -> &'static str {
    if wstun_tun::linux::is_tun_available() {
        "available"
    } else {
        "missing (modprobe tun)"
    }
}

#[cfg(not(target_os = "linux"))]
fn tun_status() -> &'static str {
    "unknown"
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to register SIGTERM handler")?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .context("Failed to register SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
