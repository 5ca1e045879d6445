//! Server configuration: TOML file + CLI/environment overrides.

use crate::limiter::RateLimitPolicy;
use crate::transfer::UploadPolicy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use upload_core::{UploadError, UploadResult};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub upload: UploadSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

/// `[upload]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadSection {
    /// Maximum accepted file size in MiB.
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_save_directory")]
    pub save_directory: String,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_size_mb(),
            allowed_extensions: default_allowed_extensions(),
            save_directory: default_save_directory(),
        }
    }
}

/// `[rate_limit]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    /// Window length in seconds.
    #[serde(default = "default_period")]
    pub period: u64,
    /// Messages admitted per window and client.
    #[serde(default = "default_per_period")]
    pub per_period: u32,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            period: default_period(),
            per_period: default_per_period(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_path() -> String {
    "/ws/file-transfer/".to_string()
}
fn default_max_size_mb() -> u64 {
    10
}
fn default_allowed_extensions() -> Vec<String> {
    vec!["txt".to_string()]
}
fn default_save_directory() -> String {
    "uploaded_files".to_string()
}
fn default_period() -> u64 {
    60
}
fn default_per_period() -> u32 {
    1000
}
fn default_key_prefix() -> String {
    "rate_limit_".to_string()
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_size_mb: Option<u64>,
    pub allowed_extensions: Option<Vec<String>>,
    pub save_directory: Option<String>,
    pub rate_limit_period: Option<u64>,
    pub rate_limit_per_period: Option<u32>,
}

/// Resolved server configuration (paths expanded, overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// WebSocket route clients must request.
    pub path: String,
    pub upload: UploadPolicy,
    pub rate_limit: RateLimitPolicy,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply overrides.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> UploadResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse_config(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, overrides)
    }

    /// Merge a parsed config file with overrides and validate the result.
    pub fn resolve(file_config: ConfigFile, overrides: &Overrides) -> UploadResult<Self> {
        let ConfigFile {
            server,
            upload,
            rate_limit,
        } = file_config;

        let host = overrides.host.clone().unwrap_or(server.host);
        let port = overrides.port.unwrap_or(server.port);
        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| UploadError::Config(format!("invalid bind address {host}:{port}: {e}")))?;

        let max_size_mb = overrides.max_size_mb.unwrap_or(upload.max_size_mb);
        let max_size = max_size_mb
            .checked_mul(BYTES_PER_MB)
            .ok_or_else(|| UploadError::Config(format!("max size {max_size_mb}MB is too large")))?;
        let allowed_extensions = overrides
            .allowed_extensions
            .clone()
            .unwrap_or(upload.allowed_extensions);
        let save_directory = overrides
            .save_directory
            .clone()
            .unwrap_or(upload.save_directory);

        let period = overrides.rate_limit_period.unwrap_or(rate_limit.period);
        if period == 0 {
            return Err(UploadError::Config(
                "rate limit period must be at least one second".into(),
            ));
        }
        let per_period = overrides
            .rate_limit_per_period
            .unwrap_or(rate_limit.per_period);

        Ok(Self {
            bind_addr,
            path: server.path,
            upload: UploadPolicy {
                max_size,
                allowed_extensions,
                save_directory: expand_tilde_str(&save_directory),
            },
            rate_limit: RateLimitPolicy {
                period: Duration::from_secs(period),
                limit: per_period,
                key_prefix: rate_limit.key_prefix,
            },
        })
    }
}

/// Parse the TOML config text.
pub fn parse_config(content: &str) -> UploadResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| UploadError::Config(format!("config parse error: {e}")))
}

/// Parse an extension allow-list given as a JSON array or a comma list.
pub fn parse_extension_list(raw: &str) -> Result<Vec<String>, String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed)
            .map_err(|e| format!("invalid extension list: {e}"));
    }
    Ok(trimmed
        .split(',')
        .map(|s| s.trim().trim_start_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
