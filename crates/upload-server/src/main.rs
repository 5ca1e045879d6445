//! upload-server: chunked file upload over WebSocket.
//!
//! Accepts WebSocket connections, receives files announced by a metadata
//! message and streamed as base64 chunks, validates them against the upload
//! policy, and writes completed files to disk. Every inbound message is
//! counted against a per-client fixed-window rate limit.

mod config;
mod limiter;
mod server;
mod session;
mod storage;
mod transfer;
mod transport;

use clap::Parser;
use config::{Overrides, ServerConfig};
use server::UploadServer;
use std::path::PathBuf;
use tracing::{error, info};

/// Extension allow-list given as a JSON array or a comma-separated list.
#[derive(Debug, Clone)]
struct ExtensionList(Vec<String>);

fn parse_extensions(raw: &str) -> Result<ExtensionList, String> {
    config::parse_extension_list(raw).map(ExtensionList)
}

/// upload-server — chunked file upload over WebSocket
#[derive(Parser, Debug)]
#[command(name = "upload-server", version, about = "Chunked file upload server")]
struct Cli {
    /// Listen address
    #[arg(long, env = "UPLOAD_HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(short, long, env = "UPLOAD_PORT")]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "upload-server.toml")]
    config: String,

    /// Maximum file size in MiB
    #[arg(long, env = "FILE_MAX_SIZE")]
    max_size_mb: Option<u64>,

    /// Allowed file extensions, e.g. '["txt","csv"]' or 'txt,csv'
    #[arg(long, env = "FILE_ALLOWED_EXTENSIONS", value_parser = parse_extensions)]
    allowed_extensions: Option<ExtensionList>,

    /// Directory completed files are written to
    #[arg(long, env = "FILE_SAVE_DIRECTORY")]
    save_directory: Option<String>,

    /// Rate-limit window in seconds
    #[arg(long, env = "RATE_LIMIT_PERIOD")]
    rate_limit_period: Option<u64>,

    /// Messages allowed per client and window
    #[arg(long, env = "RATE_LIMIT_PER_PERIOD")]
    rate_limit_per_period: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            max_size_mb: self.max_size_mb,
            allowed_extensions: self.allowed_extensions.as_ref().map(|l| l.0.clone()),
            save_directory: self.save_directory.clone(),
            rate_limit_period: self.rate_limit_period,
            rate_limit_per_period: self.rate_limit_per_period,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting upload-server");

    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), &cli.overrides()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let upload_server = UploadServer::new(server_config);
    let shutdown_tx = upload_server.shutdown_handle();

    let run = upload_server.run();
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            let _ = shutdown_tx.send(());
            // Let open connections send their close frames before exiting.
            run.await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("upload-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
