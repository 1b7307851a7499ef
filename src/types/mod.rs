//! Wire types for the single form endpoint.
//!
//! Every request is an URL-encoded form distinguished by `form_type`. File
//! uploads are validated at the boundary into a tagged [`UploadRequest`]
//! before anything is dispatched.

use crate::errors::{OnboardingError, OnboardingResult, RequestError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Flat form fields as received from or sent to the endpoint.
pub type FormFields = HashMap<String, String>;

/// Field names of the file upload form.
pub mod field {
    /// Form discriminator.
    pub const FORM_TYPE: &str = "form_type";
    /// Logical document type.
    pub const TYPE: &str = "type";
    /// Position of the file within its logical type.
    pub const INDEX: &str = "index";
    /// Destination container id.
    pub const FOLDER_ID: &str = "folderId";
    /// Original file name.
    pub const FILENAME: &str = "filename";
    /// Declared content type.
    pub const CONTENT_TYPE: &str = "contentType";
    /// Base64 payload.
    pub const FILE: &str = "file";
    /// 0-based chunk index.
    pub const CHUNK_INDEX: &str = "chunk_index";
    /// Total number of chunks.
    pub const TOTAL_CHUNKS: &str = "total_chunks";
    /// Continuation file id.
    pub const FILE_ID: &str = "file_id";
}

/// Content type used when the client declares none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Form discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormType {
    /// Full onboarding application.
    Onboarding,
    /// Whole file or chunk upload.
    FileUpload,
}

impl FormType {
    /// Wire value of the discriminator.
    pub fn as_str(&self) -> &'static str {
        match self {
            FormType::Onboarding => "onboarding",
            FormType::FileUpload => "file_upload",
        }
    }

    /// Reads the discriminator from form fields.
    pub fn from_fields(fields: &FormFields) -> OnboardingResult<Self> {
        match fields.get(field::FORM_TYPE).map(String::as_str) {
            Some("onboarding") => Ok(FormType::Onboarding),
            Some("file_upload") => Ok(FormType::FileUpload),
            Some(other) => Err(RequestError::UnsupportedFormType(other.to_string()).into()),
            None => Err(RequestError::UnsupportedFormType("<missing>".to_string()).into()),
        }
    }
}

/// Metadata shared by whole-file and chunk uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Logical document type (e.g. `incorporation`).
    pub logical_type: String,
    /// Position of this file among files of the same type.
    pub index: u32,
    /// Destination container id.
    pub container_id: String,
    /// Original file name.
    pub file_name: String,
    /// Declared content type.
    pub content_type: String,
}

impl FileMeta {
    /// Name the file carries once finalised.
    pub fn final_name(&self) -> String {
        final_file_name(&self.logical_type, self.index, &self.file_name)
    }
}

/// A file sent in one request.
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// File metadata.
    pub meta: FileMeta,
    /// Decoded file bytes.
    pub payload: Bytes,
}

/// One chunk of a multi-chunk upload.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    /// File metadata.
    pub meta: FileMeta,
    /// 0-based chunk index.
    pub chunk_index: usize,
    /// Number of chunks in the upload.
    pub total_chunks: usize,
    /// File id returned for chunk 0; present on every later chunk.
    pub continuation_file_id: Option<String>,
    /// Decoded chunk bytes.
    pub payload: Bytes,
}

impl ChunkUpload {
    /// True for the first chunk.
    pub fn is_first(&self) -> bool {
        self.chunk_index == 0
    }

    /// True for the chunk that completes the file.
    pub fn is_last(&self) -> bool {
        self.chunk_index + 1 == self.total_chunks
    }
}

/// A validated file upload request.
#[derive(Debug, Clone)]
pub enum UploadRequest {
    /// Whole file in a single request.
    WholeFile(FileUpload),
    /// One chunk of a larger file.
    Chunk(ChunkUpload),
}

impl UploadRequest {
    /// Shared metadata.
    pub fn meta(&self) -> &FileMeta {
        match self {
            UploadRequest::WholeFile(upload) => &upload.meta,
            UploadRequest::Chunk(chunk) => &chunk.meta,
        }
    }

    /// Validates flat form fields into a tagged request.
    pub fn from_fields(fields: &FormFields) -> OnboardingResult<Self> {
        let meta = FileMeta {
            logical_type: required(fields, field::TYPE)?.to_string(),
            index: parse_number(fields, field::INDEX)?
                .ok_or_else(|| OnboardingError::missing(field::INDEX))?,
            container_id: required(fields, field::FOLDER_ID)?.to_string(),
            file_name: required(fields, field::FILENAME)?.to_string(),
            content_type: fields
                .get(field::CONTENT_TYPE)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
        };

        let encoded = fields
            .get(field::FILE)
            .ok_or_else(|| OnboardingError::missing(field::FILE))?;
        let payload = decode_payload(encoded)?;

        let chunk_index: Option<usize> = parse_number(fields, field::CHUNK_INDEX)?;
        let total_chunks: Option<usize> = parse_number(fields, field::TOTAL_CHUNKS)?;
        let file_id = fields
            .get(field::FILE_ID)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        match (chunk_index, total_chunks) {
            (None, None) => {
                if file_id.is_some() {
                    return Err(invalid(field::FILE_ID, "only allowed on chunk uploads"));
                }
                Ok(UploadRequest::WholeFile(FileUpload { meta, payload }))
            }
            (Some(chunk_index), Some(total_chunks)) => {
                if total_chunks == 0 {
                    return Err(invalid(field::TOTAL_CHUNKS, "must be at least 1"));
                }
                if chunk_index >= total_chunks {
                    return Err(invalid(
                        field::CHUNK_INDEX,
                        format!("{} is not below total_chunks {}", chunk_index, total_chunks),
                    ));
                }
                match (chunk_index, &file_id) {
                    (0, Some(_)) => {
                        return Err(invalid(field::FILE_ID, "must be absent on the first chunk"))
                    }
                    (i, None) if i > 0 => return Err(OnboardingError::missing(field::FILE_ID)),
                    _ => {}
                }
                Ok(UploadRequest::Chunk(ChunkUpload {
                    meta,
                    chunk_index,
                    total_chunks,
                    continuation_file_id: file_id,
                    payload,
                }))
            }
            (Some(_), None) => Err(OnboardingError::missing(field::TOTAL_CHUNKS)),
            (None, Some(_)) => Err(OnboardingError::missing(field::CHUNK_INDEX)),
        }
    }

    /// Encodes the request as ordered form fields, `form_type` included.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let meta = self.meta();
        let mut out = vec![
            (field::TYPE, meta.logical_type.clone()),
            (field::INDEX, meta.index.to_string()),
            (field::FOLDER_ID, meta.container_id.clone()),
            (field::FILENAME, meta.file_name.clone()),
            (field::CONTENT_TYPE, meta.content_type.clone()),
            (field::FORM_TYPE, FormType::FileUpload.as_str().to_string()),
        ];

        match self {
            UploadRequest::WholeFile(upload) => {
                out.push((field::FILE, STANDARD.encode(&upload.payload)));
            }
            UploadRequest::Chunk(chunk) => {
                out.push((field::CHUNK_INDEX, chunk.chunk_index.to_string()));
                out.push((field::TOTAL_CHUNKS, chunk.total_chunks.to_string()));
                if let Some(file_id) = &chunk.continuation_file_id {
                    out.push((field::FILE_ID, file_id.clone()));
                }
                out.push((field::FILE, STANDARD.encode(&chunk.payload)));
            }
        }

        out
    }
}

/// Reply to a file upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadResponse {
    /// File (or chunk) stored.
    Success {
        /// Destination file id.
        #[serde(rename = "fileId")]
        file_id: String,
        /// Shareable link, only once the file is finalised.
        #[serde(rename = "fileUrl", default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
    },
    /// Request failed.
    Error {
        /// Error message.
        #[serde(default)]
        message: String,
    },
}

/// Reply to an onboarding submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubmissionResponse {
    /// Row stored and folder created.
    Success {
        /// Folder that receives the application's documents.
        #[serde(rename = "folderId")]
        folder_id: String,
    },
    /// Submission failed.
    Error {
        /// Error message.
        #[serde(default)]
        message: String,
    },
}

/// Extension of a file name, dot included.
///
/// Everything from the last `.` onward; names without a dot, or whose only
/// dot is the leading one, have no extension.
pub fn derive_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => "",
        Some(pos) => &file_name[pos..],
    }
}

/// Final stored name: `{logical_type}_{index}{extension}`.
pub fn final_file_name(logical_type: &str, index: u32, original_name: &str) -> String {
    format!("{}_{}{}", logical_type, index, derive_extension(original_name))
}

/// Decodes a standard base64 payload.
pub fn decode_payload(encoded: &str) -> OnboardingResult<Bytes> {
    STANDARD
        .decode(encoded.trim())
        .map(Bytes::from)
        .map_err(|e| RequestError::InvalidPayload(e.to_string()).into())
}

fn required<'a>(fields: &'a FormFields, name: &str) -> OnboardingResult<&'a str> {
    fields
        .get(name)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OnboardingError::missing(name))
}

fn parse_number<T: std::str::FromStr>(
    fields: &FormFields,
    name: &str,
) -> OnboardingResult<Option<T>> {
    match fields.get(name).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(name, format!("'{}' is not a non-negative integer", raw))),
    }
}

fn invalid(field: &str, message: impl Into<String>) -> OnboardingError {
    OnboardingError::Request(RequestError::InvalidParameter {
        field: field.to_string(),
        message: message.into(),
    })
}
