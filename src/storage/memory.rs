//! In-memory drive and sheet.

use super::{new_id, share_link, DriveStore, PublicFile, SheetStore, StoredFile};
use crate::errors::{OnboardingError, OnboardingResult, ResourceError, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Container {
    parent_id: Option<String>,
    name: String,
}

#[derive(Debug)]
struct Entry {
    file: StoredFile,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct DriveState {
    containers: HashMap<String, Container>,
    files: HashMap<String, Entry>,
    used: u64,
}

/// Drive kept in process memory.
#[derive(Debug)]
pub struct MemoryDrive {
    link_base: String,
    quota: Option<u64>,
    state: Mutex<DriveState>,
}

impl MemoryDrive {
    /// Creates a drive holding one root container.
    pub fn new(root_container_id: impl Into<String>, link_base: impl Into<String>) -> Self {
        let mut state = DriveState::default();
        state.containers.insert(
            root_container_id.into(),
            Container {
                parent_id: None,
                name: "root".to_string(),
            },
        );
        Self {
            link_base: link_base.into(),
            quota: None,
            state: Mutex::new(state),
        }
    }

    /// Caps the total stored bytes.
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    /// Metadata of a file.
    pub fn file(&self, file_id: &str) -> Option<StoredFile> {
        self.state.lock().files.get(file_id).map(|e| e.file.clone())
    }

    /// Content of a file, public or not.
    pub fn file_bytes(&self, file_id: &str) -> Option<Bytes> {
        self.state
            .lock()
            .files
            .get(file_id)
            .map(|e| Bytes::copy_from_slice(&e.data))
    }

    /// Files inside a container, sorted by name.
    pub fn files_in(&self, container_id: &str) -> Vec<StoredFile> {
        let state = self.state.lock();
        let mut files: Vec<StoredFile> = state
            .files
            .values()
            .filter(|e| e.file.container_id == container_id)
            .map(|e| e.file.clone())
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }

    /// `(id, name)` of the containers directly under `parent_id`.
    pub fn containers_in(&self, parent_id: &str) -> Vec<(String, String)> {
        let state = self.state.lock();
        let mut found: Vec<(String, String)> = state
            .containers
            .iter()
            .filter(|(_, c)| c.parent_id.as_deref() == Some(parent_id))
            .map(|(id, c)| (id.clone(), c.name.clone()))
            .collect();
        found.sort();
        found
    }

    /// Total stored bytes.
    pub fn used_bytes(&self) -> u64 {
        self.state.lock().used
    }

    fn reserve(&self, state: &mut DriveState, extra: u64) -> OnboardingResult<()> {
        if let Some(limit) = self.quota {
            if state.used + extra > limit {
                return Err(StorageError::QuotaExceeded {
                    message: "The user's Drive storage quota has been exceeded".to_string(),
                    limit,
                    used: state.used,
                }
                .into());
            }
        }
        state.used += extra;
        Ok(())
    }
}

#[async_trait]
impl DriveStore for MemoryDrive {
    async fn create_container(&self, parent_id: &str, name: &str) -> OnboardingResult<String> {
        let mut state = self.state.lock();
        if !state.containers.contains_key(parent_id) {
            return Err(OnboardingError::container_not_found(parent_id));
        }
        let id = new_id();
        state.containers.insert(
            id.clone(),
            Container {
                parent_id: Some(parent_id.to_string()),
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    async fn create_file(
        &self,
        container_id: &str,
        name: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> OnboardingResult<StoredFile> {
        let mut state = self.state.lock();
        if !state.containers.contains_key(container_id) {
            return Err(OnboardingError::container_not_found(container_id));
        }
        self.reserve(&mut state, bytes.len() as u64)?;

        let file = StoredFile {
            id: new_id(),
            name: name.to_string(),
            container_id: container_id.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            public_url: None,
            created_at: Utc::now(),
        };
        state.files.insert(
            file.id.clone(),
            Entry {
                file: file.clone(),
                data: bytes.to_vec(),
            },
        );
        Ok(file)
    }

    async fn append_bytes(&self, file_id: &str, bytes: &[u8]) -> OnboardingResult<u64> {
        let mut state = self.state.lock();
        if !state.files.contains_key(file_id) {
            return Err(OnboardingError::file_not_found(file_id));
        }
        self.reserve(&mut state, bytes.len() as u64)?;

        let entry = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| OnboardingError::file_not_found(file_id))?;
        entry.data.extend_from_slice(bytes);
        entry.file.size = entry.data.len() as u64;
        Ok(entry.file.size)
    }

    async fn rename_file(&self, file_id: &str, name: &str) -> OnboardingResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| OnboardingError::file_not_found(file_id))?;
        entry.file.name = name.to_string();
        Ok(())
    }

    async fn set_public_readable(&self, file_id: &str) -> OnboardingResult<String> {
        let mut state = self.state.lock();
        let entry = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| OnboardingError::file_not_found(file_id))?;
        let url = share_link(&self.link_base, file_id);
        entry.file.public_url = Some(url.clone());
        Ok(url)
    }

    async fn stat_file(&self, file_id: &str) -> OnboardingResult<StoredFile> {
        self.file(file_id)
            .ok_or_else(|| OnboardingError::file_not_found(file_id))
    }

    async fn read_public(&self, file_id: &str) -> OnboardingResult<PublicFile> {
        let state = self.state.lock();
        match state.files.get(file_id) {
            Some(entry) if entry.file.is_public() => Ok(PublicFile {
                file: entry.file.clone(),
                bytes: Bytes::copy_from_slice(&entry.data),
            }),
            _ => Err(OnboardingError::file_not_found(file_id)),
        }
    }
}

/// Sheets kept in process memory.
#[derive(Debug, Default)]
pub struct MemorySheet {
    rows: Mutex<HashMap<String, Vec<Vec<String>>>>,
}

impl MemorySheet {
    /// Creates an empty sheet store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of a sheet in append order.
    pub fn rows(&self, sheet: &str) -> Vec<Vec<String>> {
        self.rows.lock().get(sheet).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SheetStore for MemorySheet {
    async fn append_row(&self, sheet: &str, values: &[String]) -> OnboardingResult<usize> {
        if !super::is_valid_sheet_name(sheet) {
            return Err(ResourceError::SheetNotFound(sheet.to_string()).into());
        }
        let mut rows = self.rows.lock();
        let sheet_rows = rows.entry(sheet.to_string()).or_default();
        sheet_rows.push(values.to_vec());
        Ok(sheet_rows.len())
    }
}
