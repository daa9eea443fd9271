//! Hopsocks - local SOCKS5 proxies through chained SSH hops
//!
//! This is the main entry point for the hopsocks application.

use anyhow::{Context, Result};
use clap::Parser;
use hopsocks::config::load_config;
use hopsocks::registry::{ProxyClosed, SessionRegistry};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Hopsocks - local SOCKS5 proxies routed through chains of SSH hops
#[derive(Parser, Debug)]
#[command(name = "hopsocks")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_log)?;

    let config = load_config(&args.config)?;
    let base_dir = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    info!("Hopsocks v{}", hopsocks::VERSION);
    info!("Configuration loaded from: {:?}", args.config);
    info!("Host key policy: {}", config.options.host_key_policy);

    let registry = SessionRegistry::with_ssh(config.options.to_proxy_options());

    for proxy in &config.proxies {
        let opened = match proxy.hop_specs(&base_dir) {
            Ok(hops) => registry
                .open_proxy(&proxy.alias, proxy.listen_port, hops)
                .await
                .with_context(|| format!("Failed to open proxy '{}'", proxy.alias)),
            Err(e) => Err(e),
        };

        match opened {
            Ok(opened) => info!(
                "Proxy '{}' {} on 127.0.0.1:{} ({} hop(s))",
                opened.alias, opened.status, opened.listen_port, opened.hop_count
            ),
            Err(e) => {
                error!("{:#}", e);
                report_closed(registry.close_all().await);
                return Err(e);
            }
        }
    }

    shutdown_signal().await;

    report_closed(registry.close_all().await);
    info!("Shutdown complete");
    Ok(())
}

fn report_closed(closed: Vec<ProxyClosed>) {
    for result in closed {
        if result.is_clean() {
            info!("Proxy '{}' {}", result.alias, result.status);
        } else {
            for err in &result.teardown_errors {
                warn!("Proxy '{}': {}", result.alias, err);
            }
        }
    }
}

/// Wait for Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
                return;
            }
            Err(e) => warn!("Failed to setup SIGTERM handler: {}", e),
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

/// Setup logging based on command line flags
///
/// `RUST_LOG`, when set, takes precedence over `--log-level`.
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
