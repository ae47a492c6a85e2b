use crate::services::validator::DEFAULT_MAX_UPLOAD_BYTES;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Prefix for links to stored payloads; the server mounts them at `/storage`.
    pub public_base_url: String,
    pub max_upload_bytes: u64,
    /// Accept uploads without an `x-user-id` header, attributing them to the system owner.
    pub allow_demo_mode: bool,
    pub preview_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            storage_dir: "./data/objects".into(),
            database_url: "sqlite://./data/meta/dataset_ingest.db".into(),
            public_base_url: "http://localhost:3000/storage".into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allow_demo_mode: false,
            preview_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Tabular dataset ingest service")]
pub struct Args {
    /// Host to bind to (overrides DATASET_INGEST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DATASET_INGEST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payloads are stored (overrides DATASET_INGEST_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DATASET_INGEST_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL for public object links (overrides DATASET_INGEST_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Largest accepted upload in bytes (overrides DATASET_INGEST_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Allow anonymous uploads (overrides DATASET_INGEST_ALLOW_DEMO_MODE)
    #[arg(long)]
    pub allow_demo_mode: bool,

    /// Preview cache lifetime in seconds (overrides DATASET_INGEST_PREVIEW_TTL_SECS)
    #[arg(long)]
    pub preview_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let defaults = Self::default();

        let env_host = env::var("DATASET_INGEST_HOST").unwrap_or(defaults.host);
        let env_port = env_parse("DATASET_INGEST_PORT")?.unwrap_or(defaults.port);
        let env_storage = env::var("DATASET_INGEST_STORAGE_DIR").unwrap_or(defaults.storage_dir);
        let env_db = env::var("DATASET_INGEST_DATABASE_URL").unwrap_or(defaults.database_url);
        let env_public =
            env::var("DATASET_INGEST_PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url);
        let env_max = env_parse("DATASET_INGEST_MAX_UPLOAD_BYTES")?
            .unwrap_or(defaults.max_upload_bytes);
        let env_demo = env_parse("DATASET_INGEST_ALLOW_DEMO_MODE")?
            .unwrap_or(defaults.allow_demo_mode);
        let env_ttl = env_parse::<u64>("DATASET_INGEST_PREVIEW_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.preview_ttl);

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.unwrap_or(env_public),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max),
            allow_demo_mode: args.allow_demo_mode || env_demo,
            preview_ttl: args
                .preview_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(env_ttl),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.preview_ttl, Duration::from_secs(1800));
        assert!(!cfg.allow_demo_mode);
    }

    #[test]
    fn cli_flags_parse() {
        let args = Args::try_parse_from([
            "dataset-ingest",
            "--port",
            "8080",
            "--allow-demo-mode",
            "--migrate",
        ])
        .unwrap();
        assert_eq!(args.port, Some(8080));
        assert!(args.allow_demo_mode);
        assert!(args.migrate);
    }
}
