//! Runtime configuration resolved from the secret store.

use crate::errors::SecretError;
use serde::Deserialize;
use std::fmt;

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Flat key/value mapping as stored in the secret store. Every key may be
/// absent; [`SecretBundle::validate`] decides what is acceptable.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct RawSecretBundle {
    pub terraform_org: Option<String>,
    pub workspace_name: Option<String>,
    pub terraform_cloud_api_token: Option<String>,
    pub aws_region: Option<String>,
    pub s3_bucket_name: Option<String>,
}

/// Fully validated secret bundle. Read-only once built.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBundle {
    pub organization: String,
    pub workspace: String,
    pub api_token: String,
    pub region: String,
    pub bucket: String,
}

impl SecretBundle {
    /// Validate every field eagerly.
    ///
    /// Missing or blank fields are collected and reported together, so an
    /// operator fixing the secret sees the full list in one run.
    pub fn validate(raw: RawSecretBundle) -> Result<Self, SecretError> {
        let mut missing = Vec::new();
        let mut take = |value: Option<String>, field: &'static str| match value {
            Some(v) if !v.trim().is_empty() => v,
            _ => {
                missing.push(field);
                String::new()
            }
        };

        let organization = take(raw.terraform_org, "terraform_org");
        let workspace = take(raw.workspace_name, "workspace_name");
        let api_token = take(raw.terraform_cloud_api_token, "terraform_cloud_api_token");
        let region = take(raw.aws_region, "aws_region");
        let bucket = take(raw.s3_bucket_name, "s3_bucket_name");

        if !missing.is_empty() {
            return Err(SecretError::MissingFields(missing));
        }

        ensure_region_valid(&region)?;
        ensure_bucket_name_safe(&bucket)?;

        Ok(Self {
            organization,
            workspace,
            api_token,
            region,
            bucket,
        })
    }
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBundle")
            .field("organization", &self.organization)
            .field("workspace", &self.workspace)
            .field("api_token", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .finish()
    }
}

fn ensure_region_valid(region: &str) -> Result<(), SecretError> {
    if region
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        Ok(())
    } else {
        Err(SecretError::InvalidField {
            field: "aws_region",
            reason: format!("`{}` is not a region identifier", region),
        })
    }
}

/// S3 bucket naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - starts and ends with a letter or digit
/// - no consecutive dots or dot-hyphen pairs
/// - not shaped like an IPv4 address
fn ensure_bucket_name_safe(name: &str) -> Result<(), SecretError> {
    let invalid = |reason: &str| SecretError::InvalidField {
        field: "s3_bucket_name",
        reason: format!("`{}` {}", name, reason),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "may only contain lowercase letters, digits, dots, and hyphens",
        ));
    }

    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
