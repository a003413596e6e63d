//! Drives one backup run:
//!
//! `ResolvingSecrets → FetchingVersionId → DownloadingState → ComputingKey →
//! Uploading → Done`
//!
//! Any stage failure ends the run. Nothing is retried at this level and
//! nothing carries over between runs.

use crate::{
    errors::{BackupError, Stage},
    models::{archive_key::ArchiveKey, secret_bundle::SecretBundle},
    services::{
        archiver::{Archiver, LocalArchiver, S3Archiver},
        http::HttpSettings,
        secret_provider::SecretProvider,
        state_fetcher::{StateFetcher, TfcStateFetcher},
    },
};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::path::PathBuf;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

/// Wall-clock source for the archive timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local time of the running process.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Builds the stage clients once secrets are known.
#[async_trait]
pub trait Backends: Send + Sync {
    fn state_fetcher(&self, secrets: &SecretBundle) -> Box<dyn StateFetcher>;
    async fn archiver(&self, secrets: &SecretBundle) -> Box<dyn Archiver>;
}

/// Terraform Cloud plus S3, or a local directory when one is configured.
/// `http.timeout` bounds the state API calls and the S3 write alike.
pub struct LiveBackends {
    pub client: reqwest::Client,
    pub tfc_api_url: String,
    pub http: HttpSettings,
    pub local_dir: Option<PathBuf>,
}

#[async_trait]
impl Backends for LiveBackends {
    fn state_fetcher(&self, secrets: &SecretBundle) -> Box<dyn StateFetcher> {
        Box::new(TfcStateFetcher::new(
            self.client.clone(),
            self.tfc_api_url.clone(),
            secrets,
            self.http.retry.clone(),
        ))
    }

    async fn archiver(&self, secrets: &SecretBundle) -> Box<dyn Archiver> {
        match &self.local_dir {
            Some(dir) => Box::new(LocalArchiver::new(dir.clone(), secrets.bucket.clone())),
            None => Box::new(S3Archiver::connect(secrets, self.http.timeout).await),
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Success {
        key: ArchiveKey,
        location: String,
        size_bytes: usize,
    },
    Failure {
        stage: Stage,
        cause: BackupError,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }
}

pub struct Orchestrator {
    secret_path: String,
    secrets: Box<dyn SecretProvider>,
    backends: Box<dyn Backends>,
    clock: Box<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        secret_path: impl Into<String>,
        secrets: Box<dyn SecretProvider>,
        backends: Box<dyn Backends>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            secret_path: secret_path.into(),
            secrets,
            backends,
            clock,
        }
    }

    pub async fn run(&self) -> RunOutcome {
        let span = info_span!("backup", run_id = %Uuid::new_v4());
        match self.execute().instrument(span.clone()).await {
            Ok(outcome) => outcome,
            Err(cause) => {
                let stage = cause.stage();
                span.in_scope(|| error!("Backup failed while {}: {}", stage, cause));
                RunOutcome::Failure { stage, cause }
            }
        }
    }

    async fn execute(&self) -> Result<RunOutcome, BackupError> {
        let secrets = self
            .secrets
            .resolve(&self.secret_path)
            .await
            .map_err(|source| BackupError::SecretResolution {
                path: self.secret_path.clone(),
                source,
            })?;
        info!(
            "Resolved secrets for workspace {}/{}",
            secrets.organization, secrets.workspace
        );

        let fetcher = self.backends.state_fetcher(&secrets);
        let version = fetcher
            .resolve_current_version()
            .await
            .map_err(BackupError::StateLookup)?;
        info!("Fetched state version ID: {}", version);

        let payload =
            fetcher
                .download(&version)
                .await
                .map_err(|source| BackupError::StateDownload {
                    version: version.to_string(),
                    source,
                })?;
        info!(
            "Downloaded state file for workspace {} ({} bytes)",
            secrets.workspace,
            payload.len()
        );

        let key = ArchiveKey::new(&secrets.workspace, self.clock.now())
            .map_err(BackupError::ArchiveWrite)?;
        let archiver = self.backends.archiver(&secrets).await;
        archiver
            .put(&key, &payload)
            .await
            .map_err(BackupError::ArchiveWrite)?;

        let location = archiver.location(&key);
        info!("Successfully uploaded state file to {}", location);

        Ok(RunOutcome::Success {
            key,
            location,
            size_bytes: payload.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::{ArchiveError, FetchError, SecretError},
        models::{
            secret_bundle::RawSecretBundle,
            state::{StatePayload, StateVersionRef},
        },
        services::archiver::MemoryArchiver,
    };
    use chrono::NaiveDate;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct Calls {
        resolve: AtomicUsize,
        lookup: AtomicUsize,
        download: AtomicUsize,
        put: AtomicUsize,
    }

    #[derive(Clone, Copy, PartialEq)]
    enum FailAt {
        Nowhere,
        Secrets,
        Lookup,
        Download,
        Upload,
    }

    fn raw_secrets() -> RawSecretBundle {
        RawSecretBundle {
            terraform_org: Some("acme".into()),
            workspace_name: Some("prod".into()),
            terraform_cloud_api_token: Some("t".into()),
            aws_region: Some("us-east-1".into()),
            s3_bucket_name: Some("tfstate-backups".into()),
        }
    }

    struct FakeSecrets {
        fail: FailAt,
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl SecretProvider for FakeSecrets {
        async fn resolve(&self, path: &str) -> Result<SecretBundle, SecretError> {
            self.calls.resolve.fetch_add(1, Ordering::SeqCst);
            assert_eq!(path, "tfc-backup");
            if self.fail == FailAt::Secrets {
                return Err(SecretError::NotFound { path: path.into() });
            }
            SecretBundle::validate(raw_secrets())
        }
    }

    struct FakeFetcher {
        fail: FailAt,
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl StateFetcher for FakeFetcher {
        async fn resolve_current_version(&self) -> Result<StateVersionRef, FetchError> {
            self.calls.lookup.fetch_add(1, Ordering::SeqCst);
            if self.fail == FailAt::Lookup {
                return Err(FetchError::Status {
                    status: 404,
                    body: "workspace not found".into(),
                });
            }
            Ok(StateVersionRef("sv-123".into()))
        }

        async fn download(&self, version: &StateVersionRef) -> Result<StatePayload, FetchError> {
            self.calls.download.fetch_add(1, Ordering::SeqCst);
            assert_eq!(version.as_str(), "sv-123");
            if self.fail == FailAt::Download {
                return Err(FetchError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(StatePayload::new(&b"{\"version\":4}"[..]))
        }
    }

    struct CountingArchiver {
        fail: bool,
        inner: Arc<MemoryArchiver>,
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl Archiver for CountingArchiver {
        async fn put(&self, key: &ArchiveKey, payload: &StatePayload) -> Result<(), ArchiveError> {
            self.calls.put.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ArchiveError::Io(std::io::Error::other("bucket not found")));
            }
            self.inner.put(key, payload).await
        }

        fn location(&self, key: &ArchiveKey) -> String {
            self.inner.location(key)
        }
    }

    struct FakeBackends {
        fail: FailAt,
        calls: Arc<Calls>,
        store: Arc<MemoryArchiver>,
    }

    #[async_trait]
    impl Backends for FakeBackends {
        fn state_fetcher(&self, secrets: &SecretBundle) -> Box<dyn StateFetcher> {
            assert_eq!(secrets.api_token, "t");
            Box::new(FakeFetcher {
                fail: self.fail,
                calls: self.calls.clone(),
            })
        }

        async fn archiver(&self, secrets: &SecretBundle) -> Box<dyn Archiver> {
            assert_eq!(secrets.bucket, "tfstate-backups");
            Box::new(CountingArchiver {
                fail: self.fail == FailAt::Upload,
                inner: self.store.clone(),
                calls: self.calls.clone(),
            })
        }
    }

    struct FixedClock(NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    fn orchestrator(fail: FailAt) -> (Orchestrator, Arc<Calls>, Arc<MemoryArchiver>) {
        let calls = Arc::new(Calls::default());
        let store = Arc::new(MemoryArchiver::new("tfstate-backups"));
        let at = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(9, 8, 7)
            .unwrap();
        let orchestrator = Orchestrator::new(
            "tfc-backup",
            Box::new(FakeSecrets {
                fail,
                calls: calls.clone(),
            }),
            Box::new(FakeBackends {
                fail,
                calls: calls.clone(),
                store: store.clone(),
            }),
            Box::new(FixedClock(at)),
        );
        (orchestrator, calls, store)
    }

    fn counts(calls: &Calls) -> [usize; 4] {
        [
            calls.resolve.load(Ordering::SeqCst),
            calls.lookup.load(Ordering::SeqCst),
            calls.download.load(Ordering::SeqCst),
            calls.put.load(Ordering::SeqCst),
        ]
    }

    #[tokio::test]
    async fn successful_run_archives_downloaded_bytes_once() {
        let (orchestrator, calls, store) = orchestrator(FailAt::Nowhere);

        let outcome = orchestrator.run().await;

        match &outcome {
            RunOutcome::Success {
                key,
                location,
                size_bytes,
            } => {
                assert_eq!(key.as_str(), "terraform-backups/prod-2024-06-01_09-08-07");
                assert_eq!(
                    location,
                    "memory://tfstate-backups/terraform-backups/prod-2024-06-01_09-08-07"
                );
                assert_eq!(*size_bytes, 13);
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(counts(&calls), [1, 1, 1, 1]);
        assert_eq!(
            store
                .get("terraform-backups/prod-2024-06-01_09-08-07")
                .await
                .unwrap()
                .as_ref(),
            b"{\"version\":4}"
        );
    }

    #[tokio::test]
    async fn secret_failure_stops_before_lookup() {
        let (orchestrator, calls, _) = orchestrator(FailAt::Secrets);
        match orchestrator.run().await {
            RunOutcome::Failure { stage, cause } => {
                assert_eq!(stage, Stage::ResolvingSecrets);
                assert!(matches!(
                    cause,
                    BackupError::SecretResolution {
                        source: SecretError::NotFound { .. },
                        ..
                    }
                ));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(counts(&calls), [1, 0, 0, 0]);
    }

    #[tokio::test]
    async fn lookup_failure_stops_before_download() {
        let (orchestrator, calls, _) = orchestrator(FailAt::Lookup);
        match orchestrator.run().await {
            RunOutcome::Failure { stage, cause } => {
                assert_eq!(stage, Stage::FetchingVersionId);
                match cause {
                    BackupError::StateLookup(err) => assert_eq!(err.status(), Some(404)),
                    other => panic!("unexpected cause {:?}", other),
                }
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(counts(&calls), [1, 1, 0, 0]);
    }

    #[tokio::test]
    async fn download_failure_stops_before_upload() {
        let (orchestrator, calls, store) = orchestrator(FailAt::Download);
        match orchestrator.run().await {
            RunOutcome::Failure { stage, cause } => {
                assert_eq!(stage, Stage::DownloadingState);
                match cause {
                    BackupError::StateDownload { version, source } => {
                        assert_eq!(version, "sv-123");
                        assert!(matches!(
                            source,
                            FetchError::Status { status: 500, ref body } if body == "boom"
                        ));
                    }
                    other => panic!("unexpected cause {:?}", other),
                }
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(counts(&calls), [1, 1, 1, 0]);
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn upload_failure_is_reported_as_archive_write() {
        let (orchestrator, calls, store) = orchestrator(FailAt::Upload);
        let outcome = orchestrator.run().await;
        assert!(!outcome.is_success());
        match outcome {
            RunOutcome::Failure { stage, cause } => {
                assert_eq!(stage, Stage::Uploading);
                assert!(matches!(cause, BackupError::ArchiveWrite(ArchiveError::Io(_))));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(counts(&calls), [1, 1, 1, 1]);
        assert!(store.keys().await.is_empty());
    }
}
