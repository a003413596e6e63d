//! Destination key of an archived state snapshot.

use crate::errors::ArchiveError;
use chrono::NaiveDateTime;
use std::fmt;

pub const KEY_PREFIX: &str = "terraform-backups";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// `terraform-backups/{workspace}-{YYYY-MM-DD_HH-MM-SS}`
///
/// Seconds granularity: two runs in the same second produce the same key and
/// the later upload overwrites the earlier one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveKey(String);

impl ArchiveKey {
    pub fn new(workspace: &str, timestamp: NaiveDateTime) -> Result<Self, ArchiveError> {
        let key = format!(
            "{}/{}-{}",
            KEY_PREFIX,
            workspace,
            timestamp.format(TIMESTAMP_FORMAT)
        );
        ensure_key_safe(&key)?;
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejects keys that could escape the backup prefix once mapped onto a
/// filesystem or that object storage would refuse.
fn ensure_key_safe(key: &str) -> Result<(), ArchiveError> {
    let reject = |reason| {
        Err(ArchiveError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return reject("key is empty");
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return reject("key exceeds 1024 bytes");
    }
    if key.starts_with('/') || key.contains("..") {
        return reject("key must be relative and must not contain `..`");
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return reject("key contains control characters or backslashes");
    }
    if key[KEY_PREFIX.len() + 1..].contains('/') {
        return reject("workspace name must not contain `/`");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn key_matches_template_with_zero_padding() {
        let key = ArchiveKey::new("prod", at(2024, 3, 7, 4, 5, 9)).unwrap();
        assert_eq!(key.as_str(), "terraform-backups/prod-2024-03-07_04-05-09");
    }

    #[test]
    fn key_is_deterministic() {
        let ts = at(2025, 12, 31, 23, 59, 59);
        assert_eq!(
            ArchiveKey::new("staging", ts).unwrap(),
            ArchiveKey::new("staging", ts).unwrap()
        );
    }

    #[test]
    fn same_second_collides() {
        let a = ArchiveKey::new("prod", at(2025, 1, 1, 0, 0, 1)).unwrap();
        let b = ArchiveKey::new("prod", at(2025, 1, 1, 0, 0, 1)).unwrap();
        let c = ArchiveKey::new("prod", at(2025, 1, 1, 0, 0, 2)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn escaping_workspace_names_are_rejected() {
        let ts = at(2025, 1, 1, 0, 0, 0);
        for workspace in ["../etc", "a/b", "tab\there", "back\\slash"] {
            assert!(
                matches!(
                    ArchiveKey::new(workspace, ts),
                    Err(ArchiveError::InvalidKey { .. })
                ),
                "{:?} should be rejected",
                workspace
            );
        }
    }
}
