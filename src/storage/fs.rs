//! Filesystem-backed drive and sheet.
//!
//! Layout under the base directory:
//!
//! ```text
//! containers/{id}.json   container record
//! files/{id}.json        file metadata
//! files/{id}.bin         file content
//! sheets/{name}.jsonl    one JSON array per row
//! ```

use super::{
    is_valid_id, is_valid_sheet_name, new_id, share_link, DriveStore, PublicFile, SheetStore,
    StoredFile,
};
use crate::errors::{OnboardingError, OnboardingResult, ResourceError, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerRecord {
    id: String,
    parent_id: Option<String>,
    name: String,
    created_at: DateTime<Utc>,
}

/// Drive stored in a directory tree.
#[derive(Debug)]
pub struct FsDrive {
    base: PathBuf,
    link_base: String,
    // Serialises metadata rewrites.
    meta_lock: Mutex<()>,
}

impl FsDrive {
    /// Opens (or initialises) a drive under `base` with the given root container.
    pub async fn open(
        base: impl Into<PathBuf>,
        root_container_id: &str,
        link_base: impl Into<String>,
    ) -> OnboardingResult<Self> {
        let base = base.into();
        if !is_valid_id(root_container_id) {
            return Err(OnboardingError::configuration(format!(
                "Root container id '{}' is not a valid store id",
                root_container_id
            )));
        }

        fs::create_dir_all(base.join("containers"))
            .await
            .map_err(StorageError::from)?;
        fs::create_dir_all(base.join("files"))
            .await
            .map_err(StorageError::from)?;

        let drive = Self {
            base,
            link_base: link_base.into(),
            meta_lock: Mutex::new(()),
        };

        let root_path = drive.container_path(root_container_id);
        if fs::metadata(&root_path).await.is_err() {
            let record = ContainerRecord {
                id: root_container_id.to_string(),
                parent_id: None,
                name: "root".to_string(),
                created_at: Utc::now(),
            };
            write_json(&root_path, &record).await?;
            debug!(path = %drive.base.display(), root = root_container_id, "Initialised drive");
        }

        Ok(drive)
    }

    fn container_path(&self, id: &str) -> PathBuf {
        self.base.join("containers").join(format!("{}.json", id))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.base.join("files").join(format!("{}.json", id))
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.base.join("files").join(format!("{}.bin", id))
    }

    async fn container_exists(&self, id: &str) -> bool {
        is_valid_id(id) && fs::metadata(self.container_path(id)).await.is_ok()
    }

    async fn load_file(&self, file_id: &str) -> OnboardingResult<StoredFile> {
        if !is_valid_id(file_id) {
            return Err(OnboardingError::file_not_found(file_id));
        }
        match fs::read(self.meta_path(file_id)).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                OnboardingError::from(StorageError::CorruptMetadata(format!("{}: {}", file_id, e)))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OnboardingError::file_not_found(file_id))
            }
            Err(e) => Err(StorageError::from(e).into()),
        }
    }

    async fn update_file<F>(&self, file_id: &str, update: F) -> OnboardingResult<StoredFile>
    where
        F: FnOnce(&mut StoredFile),
    {
        let _guard = self.meta_lock.lock().await;
        let mut file = self.load_file(file_id).await?;
        update(&mut file);
        write_json(&self.meta_path(file_id), &file).await?;
        Ok(file)
    }
}

#[async_trait]
impl DriveStore for FsDrive {
    async fn create_container(&self, parent_id: &str, name: &str) -> OnboardingResult<String> {
        if !self.container_exists(parent_id).await {
            return Err(OnboardingError::container_not_found(parent_id));
        }
        let record = ContainerRecord {
            id: new_id(),
            parent_id: Some(parent_id.to_string()),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        write_json(&self.container_path(&record.id), &record).await?;
        Ok(record.id)
    }

    async fn create_file(
        &self,
        container_id: &str,
        name: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> OnboardingResult<StoredFile> {
        if !self.container_exists(container_id).await {
            return Err(OnboardingError::container_not_found(container_id));
        }

        let file = StoredFile {
            id: new_id(),
            name: name.to_string(),
            container_id: container_id.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            public_url: None,
            created_at: Utc::now(),
        };

        fs::write(self.data_path(&file.id), &bytes)
            .await
            .map_err(StorageError::from)?;
        write_json(&self.meta_path(&file.id), &file).await?;
        Ok(file)
    }

    async fn append_bytes(&self, file_id: &str, bytes: &[u8]) -> OnboardingResult<u64> {
        self.load_file(file_id).await?;

        let mut out = fs::OpenOptions::new()
            .append(true)
            .open(self.data_path(file_id))
            .await
            .map_err(StorageError::from)?;
        out.write_all(bytes).await.map_err(StorageError::from)?;
        out.flush().await.map_err(StorageError::from)?;

        let size = fs::metadata(self.data_path(file_id))
            .await
            .map_err(StorageError::from)?
            .len();
        self.update_file(file_id, |file| file.size = size).await?;
        Ok(size)
    }

    async fn rename_file(&self, file_id: &str, name: &str) -> OnboardingResult<()> {
        self.update_file(file_id, |file| file.name = name.to_string())
            .await
            .map(|_| ())
    }

    async fn set_public_readable(&self, file_id: &str) -> OnboardingResult<String> {
        let url = share_link(&self.link_base, file_id);
        let shared = url.clone();
        self.update_file(file_id, move |file| file.public_url = Some(shared))
            .await?;
        Ok(url)
    }

    async fn stat_file(&self, file_id: &str) -> OnboardingResult<StoredFile> {
        self.load_file(file_id).await
    }

    async fn read_public(&self, file_id: &str) -> OnboardingResult<PublicFile> {
        let file = self.load_file(file_id).await?;
        if !file.is_public() {
            return Err(OnboardingError::file_not_found(file_id));
        }
        let bytes = fs::read(self.data_path(file_id))
            .await
            .map_err(StorageError::from)?;
        Ok(PublicFile {
            file,
            bytes: Bytes::from(bytes),
        })
    }
}

/// Sheets stored as JSON-lines files.
#[derive(Debug)]
pub struct FsSheet {
    dir: PathBuf,
    append_lock: Mutex<()>,
}

impl FsSheet {
    /// Opens (or creates) the sheet directory under `base`.
    pub async fn open(base: impl Into<PathBuf>) -> OnboardingResult<Self> {
        let dir = base.into().join("sheets");
        fs::create_dir_all(&dir).await.map_err(StorageError::from)?;
        Ok(Self {
            dir,
            append_lock: Mutex::new(()),
        })
    }

    /// Reads every row of a sheet.
    pub async fn rows(&self, sheet: &str) -> OnboardingResult<Vec<Vec<String>>> {
        let path = self.sheet_path(sheet)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::from(e).into()),
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<Vec<String>>(line).map_err(|e| {
                    OnboardingError::from(StorageError::CorruptMetadata(format!("{}: {}", sheet, e)))
                })
            })
            .collect()
    }

    fn sheet_path(&self, sheet: &str) -> OnboardingResult<PathBuf> {
        if !is_valid_sheet_name(sheet) {
            return Err(ResourceError::SheetNotFound(sheet.to_string()).into());
        }
        Ok(self.dir.join(format!("{}.jsonl", sheet)))
    }
}

#[async_trait]
impl SheetStore for FsSheet {
    async fn append_row(&self, sheet: &str, values: &[String]) -> OnboardingResult<usize> {
        let path = self.sheet_path(sheet)?;
        let mut line = serde_json::to_string(values)
            .map_err(|e| StorageError::Io(format!("Row encoding failed: {}", e)))?;
        line.push('\n');

        let _guard = self.append_lock.lock().await;
        let existing = self.rows(sheet).await?.len();

        let mut out = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(StorageError::from)?;
        out.write_all(line.as_bytes())
            .await
            .map_err(StorageError::from)?;
        out.flush().await.map_err(StorageError::from)?;

        Ok(existing + 1)
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> OnboardingResult<()> {
    let raw = serde_json::to_vec_pretty(value)
        .map_err(|e| StorageError::Io(format!("Metadata encoding failed: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, raw).await.map_err(StorageError::from)?;
    fs::rename(&tmp, path).await.map_err(StorageError::from)?;
    Ok(())
}
