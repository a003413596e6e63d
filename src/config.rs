use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

use crate::services::{
    http::{DEFAULT_RETRY_BASE_DELAY, DEFAULT_TIMEOUT, HttpSettings, RetryPolicy},
    state_fetcher::DEFAULT_API_URL,
};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub vault_addr: String,
    pub vault_token: String,
    pub vault_mount: String,
    pub secret_path: String,
    pub tfc_api_url: String,
    pub http: HttpSettings,
    pub local_dir: Option<PathBuf>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Back up the current Terraform Cloud workspace state to S3"
)]
pub struct Args {
    /// Secret store address (overrides VAULT_ADDR)
    #[arg(long)]
    pub vault_addr: Option<String>,

    /// KV v2 mount holding the backup secret (overrides VAULT_KV_MOUNT)
    #[arg(long)]
    pub vault_mount: Option<String>,

    /// Path of the backup secret inside the mount (overrides VAULT_SECRET_PATH)
    #[arg(long)]
    pub secret_path: Option<String>,

    /// Terraform Cloud API base URL (overrides TFC_API_URL)
    #[arg(long)]
    pub tfc_api_url: Option<String>,

    /// Per-request HTTP timeout in seconds (overrides BACKUP_HTTP_TIMEOUT_SECS)
    #[arg(long)]
    pub http_timeout_secs: Option<u64>,

    /// Retries for transient state API failures (overrides BACKUP_MAX_RETRIES)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Archive into this directory instead of S3 (overrides BACKUP_LOCAL_DIR)
    #[arg(long)]
    pub local_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_sources(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over values read through `lookup`, over defaults.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let vault_addr = match args.vault_addr.or_else(|| env_value("VAULT_ADDR")) {
            Some(addr) => addr,
            None => bail!("VAULT_ADDR is not set"),
        };
        // Token is env-only so it never shows up in a process listing.
        let vault_token = match env_value("VAULT_TOKEN") {
            Some(token) => token,
            None => bail!("VAULT_TOKEN is not set"),
        };

        let timeout_secs = match args.http_timeout_secs {
            Some(secs) => secs,
            None => parse_env(&env_value, "BACKUP_HTTP_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_TIMEOUT.as_secs()),
        };
        if timeout_secs == 0 {
            bail!("HTTP timeout must be at least one second");
        }
        let max_retries = match args.max_retries {
            Some(retries) => retries,
            None => parse_env(&env_value, "BACKUP_MAX_RETRIES")?.unwrap_or(0),
        };

        Ok(Self {
            vault_addr,
            vault_token,
            vault_mount: args
                .vault_mount
                .or_else(|| env_value("VAULT_KV_MOUNT"))
                .unwrap_or_else(|| "secret".into()),
            secret_path: args
                .secret_path
                .or_else(|| env_value("VAULT_SECRET_PATH"))
                .unwrap_or_else(|| "tfc-backup".into()),
            tfc_api_url: args
                .tfc_api_url
                .or_else(|| env_value("TFC_API_URL"))
                .unwrap_or_else(|| DEFAULT_API_URL.into()),
            http: HttpSettings {
                timeout: Duration::from_secs(timeout_secs),
                retry: RetryPolicy::new(max_retries, DEFAULT_RETRY_BASE_DELAY),
            },
            local_dir: args
                .local_dir
                .or_else(|| env_value("BACKUP_LOCAL_DIR").map(PathBuf::from)),
        })
    }
}

fn parse_env<T, F>(env_value: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    env_value(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("vault_addr", &self.vault_addr)
            .field("vault_token", &"<redacted>")
            .field("vault_mount", &self.vault_mount)
            .field("secret_path", &self.secret_path)
            .field("tfc_api_url", &self.tfc_api_url)
            .field("http", &self.http)
            .field("local_dir", &self.local_dir)
            .finish()
    }
}
