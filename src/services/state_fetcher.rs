//! Terraform Cloud state API client.
//!
//! Two calls, both bearer-authenticated:
//! - `GET /organizations/{org}/workspaces/{workspace}/current-state-version`
//! - `GET /state-versions/{id}/download`
//!
//! Only `200 OK` counts as success. Any other status surfaces its code and
//! body untouched.

use crate::{
    errors::FetchError,
    models::{
        secret_bundle::SecretBundle,
        state::{CurrentStateVersion, StatePayload, StateVersionRef},
    },
    services::http::RetryPolicy,
};
use async_trait::async_trait;
use reqwest::{StatusCode, Url, header};
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://app.terraform.io/api/v2";
const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

#[async_trait]
pub trait StateFetcher: Send + Sync {
    async fn resolve_current_version(&self) -> Result<StateVersionRef, FetchError>;

    /// Download the content of `version`. Retries reuse `version`; the
    /// current version is never re-resolved mid-download.
    async fn download(&self, version: &StateVersionRef) -> Result<StatePayload, FetchError>;
}

pub struct TfcStateFetcher {
    client: reqwest::Client,
    base_url: String,
    organization: String,
    workspace: String,
    api_token: String,
    retry: RetryPolicy,
}

impl TfcStateFetcher {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        secrets: &SecretBundle,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            organization: secrets.organization.clone(),
            workspace: secrets.workspace.clone(),
            api_token: secrets.api_token.clone(),
            retry,
        }
    }

    /// `{base_url}/{segments...}` with every segment percent-encoded, so an
    /// organization, workspace or version id can never change the route.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| FetchError::InvalidUrl(format!("`{}`: {}", self.base_url, err)))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl(format!("`{}` cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn current_version_url(&self) -> Result<Url, FetchError> {
        self.endpoint(&[
            "organizations",
            &self.organization,
            "workspaces",
            &self.workspace,
            "current-state-version",
        ])
    }

    fn download_url(&self, version: &StateVersionRef) -> Result<Url, FetchError> {
        self.endpoint(&["state-versions", version.as_str(), "download"])
    }

    /// Send an authenticated request and require exactly `200 OK`.
    async fn get_ok(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, FetchError> {
        let response = request.bearer_auth(&self.api_token).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl StateFetcher for TfcStateFetcher {
    async fn resolve_current_version(&self) -> Result<StateVersionRef, FetchError> {
        let url = &self.current_version_url()?;
        debug!("Looking up current state version at {}", url);

        self.retry
            .run("current state version lookup", || async move {
                let request = self
                    .client
                    .get(url.clone())
                    .header(header::CONTENT_TYPE, JSON_API_CONTENT_TYPE);
                let body = self.get_ok(request).await?.bytes().await?;
                let parsed: CurrentStateVersion = serde_json::from_slice(&body)
                    .map_err(|err| FetchError::MalformedBody(err.to_string()))?;
                if parsed.data.id.trim().is_empty() {
                    return Err(FetchError::MalformedBody(
                        "state version id is empty".into(),
                    ));
                }
                Ok(StateVersionRef(parsed.data.id))
            })
            .await
    }

    async fn download(&self, version: &StateVersionRef) -> Result<StatePayload, FetchError> {
        let url = &self.download_url(version)?;
        debug!("Downloading state version {} from {}", version, url);

        self.retry
            .run("state download", || async move {
                let response = self.get_ok(self.client.get(url.clone())).await?;
                Ok(StatePayload::new(response.bytes().await?))
            })
            .await
    }
}
