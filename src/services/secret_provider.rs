//! Secret store access.
//!
//! The production provider reads a KV version 2 secret over Vault's HTTP API:
//! `GET {addr}/v1/{mount}/data/{path}` authenticated with `X-Vault-Token`.
//! The secret's data map is validated into a [`SecretBundle`] before anything
//! else runs.

use crate::{
    errors::SecretError,
    models::secret_bundle::{RawSecretBundle, SecretBundle},
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Resolve the bundle stored at `path`. Never cached.
    async fn resolve(&self, path: &str) -> Result<SecretBundle, SecretError>;
}

#[derive(Deserialize)]
struct KvV2Response {
    data: KvV2Data,
}

#[derive(Deserialize)]
struct KvV2Data {
    data: Option<RawSecretBundle>,
}

pub struct VaultSecretProvider {
    client: reqwest::Client,
    addr: String,
    token: String,
    mount: String,
}

impl VaultSecretProvider {
    pub fn new(
        client: reqwest::Client,
        addr: impl Into<String>,
        token: impl Into<String>,
        mount: impl Into<String>,
    ) -> Self {
        Self {
            client,
            addr: addr.into(),
            token: token.into(),
            mount: mount.into(),
        }
    }

    fn secret_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.addr.trim_end_matches('/'),
            self.mount.trim_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl SecretProvider for VaultSecretProvider {
    async fn resolve(&self, path: &str) -> Result<SecretBundle, SecretError> {
        let url = self.secret_url(path);
        debug!("Reading secret bundle from {}", url);

        let response = self
            .client
            .get(&url)
            .header(VAULT_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(SecretError::Unreachable)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SecretError::NotFound {
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SecretError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: KvV2Response = response
            .json()
            .await
            .map_err(|err| SecretError::Malformed(err.to_string()))?;

        // A deleted latest version comes back with `data: null`.
        SecretBundle::validate(envelope.data.data.unwrap_or_default())
    }
}
