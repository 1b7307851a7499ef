//! Upload receiver.
//!
//! Stores whole files directly and reassembles chunked uploads. Chunk 0
//! creates a provisional `.partial` file; middle chunks append to it; the
//! last chunk appends, renames the file to `{type}_{index}{ext}`, makes it
//! publicly readable and closes the session. A repeated last chunk after
//! that is answered from the stored file. Nothing is retried here.

pub mod session;

pub use session::{SessionHandle, SessionRegistry, UploadSession};

use crate::errors::{OnboardingError, OnboardingResult, ResourceError, UploadError};
use crate::storage::{DriveStore, StoredFile};
use crate::types::{ChunkUpload, FileUpload, UploadRequest, UploadResponse};
use std::sync::Arc;
use tracing::{debug, info};

/// Suffix of files still being assembled.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Successful receiver reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReply {
    /// Destination file id.
    pub file_id: String,
    /// Public link, only once the file is complete.
    pub file_url: Option<String>,
}

impl From<UploadReply> for UploadResponse {
    fn from(reply: UploadReply) -> Self {
        UploadResponse::Success {
            file_id: reply.file_id,
            file_url: reply.file_url,
        }
    }
}

/// Handles `form_type=file_upload` requests.
pub struct UploadReceiver {
    drive: Arc<dyn DriveStore>,
    sessions: Arc<SessionRegistry>,
}

impl std::fmt::Debug for UploadReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadReceiver")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl UploadReceiver {
    /// Creates a receiver writing to `drive`.
    pub fn new(drive: Arc<dyn DriveStore>, sessions: Arc<SessionRegistry>) -> Self {
        Self { drive, sessions }
    }

    /// Live upload sessions.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Handles one upload request.
    pub async fn handle(&self, request: UploadRequest) -> OnboardingResult<UploadReply> {
        match request {
            UploadRequest::WholeFile(upload) => self.store_whole(upload).await,
            UploadRequest::Chunk(chunk) if chunk.is_first() => self.start(chunk).await,
            UploadRequest::Chunk(chunk) => self.append(chunk).await,
        }
    }

    async fn store_whole(&self, upload: FileUpload) -> OnboardingResult<UploadReply> {
        let name = upload.meta.final_name();
        let stored = self
            .drive
            .create_file(
                &upload.meta.container_id,
                &name,
                &upload.meta.content_type,
                upload.payload,
            )
            .await?;
        let url = self.drive.set_public_readable(&stored.id).await?;

        info!(file_id = %stored.id, name = %name, size = stored.size, "Stored file");
        Ok(UploadReply {
            file_id: stored.id,
            file_url: Some(url),
        })
    }

    async fn start(&self, chunk: ChunkUpload) -> OnboardingResult<UploadReply> {
        let final_name = chunk.meta.final_name();

        if chunk.is_last() {
            return self
                .store_whole(FileUpload {
                    meta: chunk.meta,
                    payload: chunk.payload,
                })
                .await;
        }

        let len = chunk.payload.len();
        let stored = self
            .drive
            .create_file(
                &chunk.meta.container_id,
                &format!("{}{}", final_name, PARTIAL_SUFFIX),
                &chunk.meta.content_type,
                chunk.payload,
            )
            .await?;

        self.sessions.insert(UploadSession::new(
            stored.id.clone(),
            chunk.meta.container_id.clone(),
            final_name,
            chunk.total_chunks,
            len,
        ));

        debug!(
            file_id = %stored.id,
            total_chunks = chunk.total_chunks,
            "Started chunked upload"
        );
        Ok(UploadReply {
            file_id: stored.id,
            file_url: None,
        })
    }

    async fn append(&self, chunk: ChunkUpload) -> OnboardingResult<UploadReply> {
        let file_id = chunk
            .continuation_file_id
            .clone()
            .ok_or_else(|| UploadError::ProtocolViolation("chunk without file_id".to_string()))?;
        let Some(handle) = self.sessions.get(&file_id) else {
            return self.acknowledge_finished(file_id, &chunk).await;
        };
        let mut session = handle.lock().await;

        if session.is_expired() {
            return Err(ResourceError::SessionNotFound(file_id).into());
        }
        check_matches(&session, &chunk)?;

        let len = chunk.payload.len();

        if session.is_finalized() {
            if chunk.is_last() && session.is_replay(chunk.chunk_index, len) {
                debug!(file_id = %file_id, "Acknowledged repeated final chunk");
                session.touch();
                return Ok(UploadReply {
                    file_id,
                    file_url: session.file_url.clone(),
                });
            }
            return Err(out_of_order(&session, chunk.chunk_index));
        }

        if chunk.chunk_index != session.next_expected {
            if !session.is_replay(chunk.chunk_index, len) {
                return Err(out_of_order(&session, chunk.chunk_index));
            }
            session.touch();
            if chunk.is_last() {
                // Bytes are in place but the file never became public.
                let size = session.bytes_written;
                let url = self.finalize(&mut session, size).await?;
                return Ok(UploadReply {
                    file_id,
                    file_url: Some(url),
                });
            }
            debug!(file_id = %file_id, chunk_index = chunk.chunk_index, "Acknowledged repeated chunk");
            return Ok(UploadReply {
                file_id,
                file_url: None,
            });
        }

        let new_size = self.drive.append_bytes(&file_id, &chunk.payload).await?;
        session.record_chunk(len, new_size);

        if !chunk.is_last() {
            debug!(
                file_id = %file_id,
                chunk_index = chunk.chunk_index,
                bytes_written = new_size,
                "Appended chunk"
            );
            return Ok(UploadReply {
                file_id,
                file_url: None,
            });
        }

        let url = self.finalize(&mut session, new_size).await?;
        Ok(UploadReply {
            file_id,
            file_url: Some(url),
        })
    }

    async fn finalize(&self, session: &mut UploadSession, size: u64) -> OnboardingResult<String> {
        self.drive
            .rename_file(&session.file_id, &session.final_name)
            .await?;
        let url = self.drive.set_public_readable(&session.file_id).await?;
        session.file_url = Some(url.clone());
        self.sessions.remove(&session.file_id);

        info!(
            file_id = %session.file_id,
            name = %session.final_name,
            size,
            chunks = session.total_chunks,
            "Assembled chunked file"
        );
        Ok(url)
    }

    /// Answers a chunk whose session is gone. Only a repeated last chunk of
    /// a file that was finalised under the same name and folder succeeds.
    async fn acknowledge_finished(
        &self,
        file_id: String,
        chunk: &ChunkUpload,
    ) -> OnboardingResult<UploadReply> {
        if chunk.is_last() {
            let stored = match self.drive.stat_file(&file_id).await {
                Ok(file) => Some(file),
                Err(OnboardingError::Resource(ResourceError::FileNotFound(_))) => None,
                Err(e) => return Err(e),
            };
            if let Some(StoredFile {
                public_url: Some(url),
                name,
                container_id,
                ..
            }) = stored
            {
                if name == chunk.meta.final_name() && container_id == chunk.meta.container_id {
                    debug!(file_id = %file_id, "Acknowledged repeated final chunk");
                    return Ok(UploadReply {
                        file_id,
                        file_url: Some(url),
                    });
                }
            }
        }
        Err(ResourceError::SessionNotFound(file_id).into())
    }
}

fn check_matches(session: &UploadSession, chunk: &ChunkUpload) -> OnboardingResult<()> {
    if chunk.total_chunks != session.total_chunks {
        return Err(UploadError::SessionMismatch(format!(
            "total_chunks {} differs from {}",
            chunk.total_chunks, session.total_chunks
        ))
        .into());
    }
    if chunk.meta.container_id != session.container_id {
        return Err(UploadError::SessionMismatch(format!(
            "folder {} differs from {}",
            chunk.meta.container_id, session.container_id
        ))
        .into());
    }
    if chunk.meta.final_name() != session.final_name {
        return Err(UploadError::SessionMismatch(format!(
            "file {} differs from {}",
            chunk.meta.final_name(),
            session.final_name
        ))
        .into());
    }
    Ok(())
}

fn out_of_order(session: &UploadSession, received: usize) -> OnboardingError {
    UploadError::OutOfOrder {
        file_id: session.file_id.clone(),
        expected: session.next_expected,
        received,
    }
    .into()
}
