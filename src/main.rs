use anyhow::{Context, Result};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use tfstate_backup::{
    config::AppConfig,
    services::{
        orchestrator::{LiveBackends, Orchestrator, RunOutcome, SystemClock},
        secret_provider::VaultSecretProvider,
    },
};

const EXIT_SUCCESS: u8 = 0;
/// Some stage failed; the log names it.
const EXIT_STAGE_FAILED: u8 = 1;
/// Configuration or client setup failed before any stage ran.
const EXIT_STARTUP_FAILED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config and wire stages ---
    let orchestrator = match AppConfig::from_env_and_args().and_then(|cfg| wire(&cfg)) {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            tracing::error!("Startup failed: {:#}", err);
            return ExitCode::from(EXIT_STARTUP_FAILED);
        }
    };

    // --- Run once ---
    ExitCode::from(exit_status(&orchestrator.run().await))
}

fn wire(cfg: &AppConfig) -> Result<Orchestrator> {
    tracing::debug!("Starting tfstate-backup with config: {:?}", cfg);

    let client = cfg
        .http
        .build_client()
        .context("building HTTP client")?;
    let secrets = VaultSecretProvider::new(
        client.clone(),
        cfg.vault_addr.clone(),
        cfg.vault_token.clone(),
        cfg.vault_mount.clone(),
    );
    let backends = LiveBackends {
        client,
        tfc_api_url: cfg.tfc_api_url.clone(),
        http: cfg.http.clone(),
        local_dir: cfg.local_dir.clone(),
    };
    Ok(Orchestrator::new(
        cfg.secret_path.clone(),
        Box::new(secrets),
        Box::new(backends),
        Box::new(SystemClock),
    ))
}

fn exit_status(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Success { .. } => EXIT_SUCCESS,
        RunOutcome::Failure { .. } => EXIT_STAGE_FAILED,
    }
}
