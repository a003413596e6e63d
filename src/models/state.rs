//! State-hosting API values handed between pipeline stages.

use bytes::Bytes;
use serde::Deserialize;
use std::fmt;

/// Opaque identifier of a state version, e.g. `sv-123`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateVersionRef(pub String);

impl StateVersionRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateVersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `GET /organizations/{org}/workspaces/{workspace}/current-state-version`
/// response, reduced to the only field the backup needs.
#[derive(Deserialize, Debug)]
pub struct CurrentStateVersion {
    pub data: CurrentStateVersionData,
}

#[derive(Deserialize, Debug)]
pub struct CurrentStateVersionData {
    pub id: String,
}

/// Raw state content. Never parsed or mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatePayload {
    bytes: Bytes,
}

impl StatePayload {
    pub const CONTENT_TYPE: &'static str = "application/json";

    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn content_type(&self) -> &'static str {
        Self::CONTENT_TYPE
    }

    /// Hex MD5 of the content, as S3 reports it in the ETag.
    pub fn etag(&self) -> String {
        format!("{:x}", md5::compute(&self.bytes))
    }
}
