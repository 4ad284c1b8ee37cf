//! Configuration resolution for koe-sync
//!
//! All environment-derived settings are resolved once at startup into an
//! explicit [`SyncConfig`] that is injected into the engine and resolver at
//! construction; nothing reads the environment ad hoc.
//!
//! Resolution priority per setting: environment variable, then TOML config
//! file (`<config dir>/koe/koe-sync.toml`), then compiled default.

use koe_common::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};

/// Default bound for concurrently outstanding filesystem operations
pub const DEFAULT_SCAN_CONCURRENCY: usize = 50;

/// Default bound for concurrently in-flight per-work resolve/persist tasks.
/// The storefront is rate-limit sensitive, so this is far below the
/// filesystem bound.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;

const DEFAULT_PORT: u16 = 8371;
const DEFAULT_STOREFRONT_BASE: &str = "https://www.dlsite.com/maniax";

/// Service configuration, resolved once at startup
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root of the local voice-work library (one folder per work)
    pub library_root: PathBuf,
    /// Public host URL used to build absolute stream/download URLs
    pub public_host: String,
    /// Storefront base URL (metadata provider)
    pub storefront_base: String,
    /// Maximum outstanding filesystem operations during library scans
    pub scan_concurrency: usize,
    /// Maximum in-flight per-work tasks during a batch run
    pub batch_concurrency: usize,
    /// Bind address for the HTTP server
    pub bind_host: String,
    pub port: u16,
    /// SQLite catalog path
    pub database_path: PathBuf,
}

/// Optional TOML overlay, `<config dir>/koe/koe-sync.toml`
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    library_root: Option<String>,
    public_host: Option<String>,
    storefront_base: Option<String>,
    scan_concurrency: Option<usize>,
    batch_concurrency: Option<usize>,
    bind_host: Option<String>,
    port: Option<u16>,
    database_path: Option<String>,
}

impl SyncConfig {
    /// Resolve configuration from environment and TOML file
    pub fn resolve() -> Result<Self> {
        let toml_config = load_toml_config();

        let library_root = env_var("KOE_LIBRARY_ROOT")
            .or(toml_config.library_root.clone())
            .map(PathBuf::from)
            .unwrap_or_else(default_library_root);

        let bind_host = env_var("KOE_BIND_HOST")
            .or(toml_config.bind_host.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let port = env_var("KOE_PORT")
            .map(|v| {
                v.parse::<u16>()
                    .map_err(|_| Error::Config(format!("Invalid KOE_PORT: {}", v)))
            })
            .transpose()?
            .or(toml_config.port)
            .unwrap_or(DEFAULT_PORT);

        let public_host = env_var("KOE_PUBLIC_HOST")
            .or(toml_config.public_host.clone())
            .unwrap_or_else(|| format!("http://{}:{}", bind_host, port));

        let storefront_base = env_var("KOE_STOREFRONT_BASE")
            .or(toml_config.storefront_base.clone())
            .unwrap_or_else(|| DEFAULT_STOREFRONT_BASE.to_string());

        let scan_concurrency = parse_usize_env("KOE_SCAN_CONCURRENCY")?
            .or(toml_config.scan_concurrency)
            .unwrap_or(DEFAULT_SCAN_CONCURRENCY);

        let batch_concurrency = parse_usize_env("KOE_BATCH_CONCURRENCY")?
            .or(toml_config.batch_concurrency)
            .unwrap_or(DEFAULT_BATCH_CONCURRENCY);

        if scan_concurrency == 0 || batch_concurrency == 0 {
            return Err(Error::Config(
                "Concurrency limits must be at least 1".to_string(),
            ));
        }

        let database_path = env_var("KOE_DATABASE_PATH")
            .or(toml_config.database_path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| library_root.join("koe.db"));

        let config = Self {
            library_root,
            public_host,
            storefront_base,
            scan_concurrency,
            batch_concurrency,
            bind_host,
            port,
            database_path,
        };

        info!(
            library_root = %config.library_root.display(),
            public_host = %config.public_host,
            scan_concurrency = config.scan_concurrency,
            batch_concurrency = config.batch_concurrency,
            "Configuration resolved"
        );

        Ok(config)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_usize_env(name: &str) -> Result<Option<usize>> {
    env_var(name)
        .map(|v| {
            v.parse::<usize>()
                .map_err(|_| Error::Config(format!("Invalid {}: {}", name, v)))
        })
        .transpose()
}

/// Load the TOML overlay if present; missing or unreadable files fall back
/// to an empty overlay.
fn load_toml_config() -> TomlConfig {
    let Some(path) = dirs::config_dir().map(|d| d.join("koe").join("koe-sync.toml")) else {
        return TomlConfig::default();
    };

    if !path.exists() {
        return TomlConfig::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                debug!("Loaded TOML config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring malformed TOML config {}: {}", path.display(), e);
                TomlConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!("Cannot read TOML config {}: {}", path.display(), e);
            TomlConfig::default()
        }
    }
}

/// OS-dependent default library root
fn default_library_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("koe").join("library"))
        .unwrap_or_else(|| PathBuf::from("./koe_library"))
}

#[cfg(test)]
pub(crate) fn test_config(library_root: PathBuf) -> SyncConfig {
    SyncConfig {
        library_root,
        public_host: "http://localhost:8371".to_string(),
        storefront_base: "http://localhost:0".to_string(),
        scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
        batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        bind_host: "127.0.0.1".to_string(),
        port: 8371,
        database_path: PathBuf::from(":memory:"),
    }
}
