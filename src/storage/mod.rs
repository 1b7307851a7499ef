//! Drive and sheet collaborators.
//!
//! The receiver and the submission handler only talk to these traits. Two
//! backends ship with the crate: [`memory`] for tests and local runs, and
//! [`fs`] which keeps a directory tree with JSON metadata.

pub mod fs;
pub mod memory;

pub use fs::{FsDrive, FsSheet};
pub use memory::{MemoryDrive, MemorySheet};

use crate::errors::OnboardingResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("id pattern is valid"));

static SHEET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9 _-]{1,128}$").expect("name pattern is valid"));

/// Metadata of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// File id.
    pub id: String,
    /// Current name.
    pub name: String,
    /// Parent container id.
    pub container_id: String,
    /// Content type.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Share link once the file is public.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl StoredFile {
    /// True once a share link was granted.
    pub fn is_public(&self) -> bool {
        self.public_url.is_some()
    }
}

/// A public file with its content.
#[derive(Debug, Clone)]
pub struct PublicFile {
    /// File metadata.
    pub file: StoredFile,
    /// File content.
    pub bytes: Bytes,
}

/// Folder and file store.
#[async_trait]
pub trait DriveStore: Send + Sync {
    /// Creates a container under `parent_id` and returns its id.
    async fn create_container(&self, parent_id: &str, name: &str) -> OnboardingResult<String>;

    /// Creates a file inside `container_id`.
    async fn create_file(
        &self,
        container_id: &str,
        name: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> OnboardingResult<StoredFile>;

    /// Appends bytes to a file and returns its new size.
    async fn append_bytes(&self, file_id: &str, bytes: &[u8]) -> OnboardingResult<u64>;

    /// Renames a file.
    async fn rename_file(&self, file_id: &str, name: &str) -> OnboardingResult<()>;

    /// Grants public read access and returns the share link.
    async fn set_public_readable(&self, file_id: &str) -> OnboardingResult<String>;

    /// Metadata of a file, public or not.
    async fn stat_file(&self, file_id: &str) -> OnboardingResult<StoredFile>;

    /// Reads a file that was made public.
    ///
    /// Files without a share link are reported as not found.
    async fn read_public(&self, file_id: &str) -> OnboardingResult<PublicFile>;
}

/// Append-only row store.
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Appends a row and returns its 1-based index.
    async fn append_row(&self, sheet: &str, values: &[String]) -> OnboardingResult<usize>;
}

/// Share link of a file served under `base`.
pub fn share_link(base: &str, file_id: &str) -> String {
    format!("{}/files/{}", base.trim_end_matches('/'), file_id)
}

/// True if `id` is safe to use as a store key.
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// True if `name` is an acceptable sheet name.
pub fn is_valid_sheet_name(name: &str) -> bool {
    SHEET_PATTERN.is_match(name)
}

/// Fresh store id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_link() {
        assert_eq!(share_link("http://host:8080/", "abc"), "http://host:8080/files/abc");
        assert_eq!(share_link("https://x.io/base", "abc"), "https://x.io/base/files/abc");
    }

    #[test]
    fn test_id_validation() {
        assert!(is_valid_id(&new_id()));
        assert!(is_valid_id("onboarding-root"));
        assert!(!is_valid_id("../etc/passwd"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("a/b"));

        assert!(is_valid_sheet_name("Onboarding"));
        assert!(is_valid_sheet_name("Onboarding 2024"));
        assert!(!is_valid_sheet_name("../sheet"));
    }
}
