#![deny(unsafe_code)]

//! otpdec CLI: run the decoding daemon or decode a file against one.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use otpdec_config::AppConfig;
use otpdec_core::ipc::{self, IpcClient, IpcClientError};
use otpdec_core::{ClientError, Daemon, DaemonError, DecodeClient};

static LONG_VERSION: LazyLock<String> = LazyLock::new(otpdec_core::build_info::version_string);

/// otpdec: one-time-pad decoding daemon and client.
#[derive(Parser, Debug)]
#[command(name = "otpdec", version = LONG_VERSION.as_str(), about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "otpdec.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the decoding daemon in the foreground.
    Daemon {
        /// Control port, overriding `daemon.listen_port`.
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,
    },

    /// Decode a ciphertext file with a key file via a running daemon.
    Decode {
        ciphertext: PathBuf,
        key: PathBuf,
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
    },

    /// Show daemon status.
    Status,

    /// Stop a running daemon.
    Stop,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("otpdec: failed to start runtime: {e}");
            return ExitCode::from(4);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("otpdec: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (config, found) = load_config(&cli.config).await?;
    init_logging(cli.verbose, &config.logging.level);
    if !found {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Daemon { port } => cmd_daemon(config, port).await,
        Commands::Decode {
            ciphertext,
            key,
            port,
        } => cmd_decode(&config, &ciphertext, &key, port).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Stop => cmd_stop(&config).await,
        Commands::Config { show } => cmd_config(&cli.config, &config, show),
    }
}

/// `RUST_LOG` wins, then `-v`, then the configured level. Output goes to
/// stderr so stdout carries only plaintext.
fn init_logging(verbose: u8, configured: &str) {
    let fallback = match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_daemon(mut config: AppConfig, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.daemon.listen_port = port;
        config.validate()?;
    }

    let daemon = Daemon::bind(config).await?;
    let socket_path = ipc::socket_path_from_config(daemon.config());
    let ipc_state = daemon.ipc_state();
    let ipc_shutdown = daemon.shutdown_sender().subscribe();

    let ipc_task = tokio::spawn(async move {
        if let Err(e) = ipc::server::serve(&socket_path, ipc_state, ipc_shutdown).await {
            warn!(error = %e, "Admin IPC unavailable");
        }
    });

    daemon.run().await?;
    let _ = ipc_task.await;
    Ok(())
}

async fn cmd_decode(config: &AppConfig, ciphertext: &Path, key: &Path, port: u16) -> Result<()> {
    let plaintext = DecodeClient::from_config(config)
        .run(ciphertext, key, port)
        .await?;

    let mut out = std::io::stdout().lock();
    out.write_all(&plaintext)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

async fn cmd_status(config: &AppConfig) -> Result<()> {
    let client = IpcClient::new(ipc::socket_path_from_config(config));
    let status = client.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_stop(config: &AppConfig) -> Result<()> {
    let client = IpcClient::new(ipc::socket_path_from_config(config));
    let stop = client.stop().await?;
    println!("{}", stop.message);
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = config.to_toml()?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

/// Load `path` if it exists, otherwise fall back to defaults.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let config = AppConfig::load(path)
            .await
            .with_context(|| format!("invalid config '{}'", path.display()))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<ClientError>() {
        return e.exit_code();
    }
    if err.downcast_ref::<DaemonError>().is_some() {
        return 4;
    }
    if err.downcast_ref::<IpcClientError>().is_some() {
        return 2;
    }
    // Config and argument errors count as bad input.
    1
}
