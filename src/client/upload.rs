//! Chunked file upload.
//!
//! Files no larger than one chunk go out as a single whole-file request.
//! Larger files are split into fixed-size chunks sent strictly in order;
//! the `fileId` returned for chunk 0 addresses every later chunk. Each
//! request is retried on its own with a fixed delay, and running out of
//! attempts on any chunk aborts the whole upload without touching what was
//! already stored.

use super::progress::{progress_percent, ProgressReporter, TracingReporter};
use crate::config::ClientConfig;
use crate::errors::{
    OnboardingError, OnboardingResult, ResponseError, ServerError, StorageError, UploadError,
};
use crate::resilience::RetryExecutor;
use crate::transport::FormTransport;
use crate::types::{ChunkUpload, FileMeta, FileUpload, UploadRequest, UploadResponse, DEFAULT_CONTENT_TYPE};
use bytes::Bytes;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Split of a file into fixed-size chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_len: usize,
    chunk_size: usize,
}

impl ChunkPlan {
    /// Plans `total_len` bytes in chunks of `chunk_size` (at least 1).
    pub fn new(total_len: usize, chunk_size: usize) -> Self {
        Self {
            total_len,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Number of requests; an empty file still takes one.
    pub fn total_chunks(&self) -> usize {
        self.total_len.div_ceil(self.chunk_size).max(1)
    }

    /// True if the file goes out as one whole-file request.
    pub fn is_single(&self) -> bool {
        self.total_chunks() == 1
    }

    /// Byte range of chunk `index`.
    pub fn range(&self, index: usize) -> Range<usize> {
        let start = (index * self.chunk_size).min(self.total_len);
        let end = (start + self.chunk_size).min(self.total_len);
        start..end
    }

    /// Byte ranges of every chunk, in order.
    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.total_chunks()).map(move |i| self.range(i))
    }
}

/// A file read fully into memory.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Original file name.
    pub name: String,
    /// Declared content type.
    pub content_type: String,
    /// File content.
    pub bytes: Bytes,
}

impl UploadFile {
    /// Creates a file from memory.
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Reads a file from disk, guessing its content type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> OnboardingResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(StorageError::from)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                OnboardingError::request(format!("{} has no file name", path.display()))
            })?;
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self::new(name, content_type, bytes))
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for an empty file.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Id of the stored file.
    pub file_id: String,
    /// Shareable link of the stored file.
    pub file_url: String,
    /// Original file name.
    pub file_name: String,
    /// Requests it took (1 for a whole-file upload).
    pub chunks: usize,
}

#[derive(Debug)]
struct Accepted {
    file_id: String,
    file_url: Option<String>,
}

/// Sends files to the receiver.
#[derive(Clone)]
pub struct UploadClient {
    transport: Arc<dyn FormTransport>,
    endpoint: Url,
    chunk_size: usize,
    retry: RetryExecutor,
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for UploadClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("chunk_size", &self.chunk_size)
            .field("retry", self.retry.config())
            .finish()
    }
}

impl UploadClient {
    /// Creates an upload client.
    pub fn new(config: &ClientConfig, transport: Arc<dyn FormTransport>) -> Self {
        Self {
            transport,
            endpoint: config.endpoint.clone(),
            chunk_size: config.chunk_size,
            retry: RetryExecutor::new(config.retry.clone()),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Replaces the notification sink.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Plan for a file of `len` bytes.
    pub fn plan(&self, len: usize) -> ChunkPlan {
        ChunkPlan::new(len, self.chunk_size)
    }

    /// Uploads one file into `container_id`.
    ///
    /// Fails only once some request ran out of attempts or hit a permanent
    /// error; already stored chunks stay where they are.
    pub async fn upload(
        &self,
        file: &UploadFile,
        logical_type: &str,
        index: u32,
        container_id: &str,
    ) -> OnboardingResult<UploadOutcome> {
        let result = self.run(file, logical_type, index, container_id).await;
        match &result {
            Ok(outcome) => self.reporter.on_complete(outcome),
            Err(error) => self.reporter.on_failure(&file.name, error),
        }
        result
    }

    async fn run(
        &self,
        file: &UploadFile,
        logical_type: &str,
        index: u32,
        container_id: &str,
    ) -> OnboardingResult<UploadOutcome> {
        let meta = FileMeta {
            logical_type: logical_type.to_string(),
            index,
            container_id: container_id.to_string(),
            file_name: file.name.clone(),
            content_type: if file.content_type.trim().is_empty() {
                DEFAULT_CONTENT_TYPE.to_string()
            } else {
                file.content_type.clone()
            },
        };
        let plan = self.plan(file.len());
        let total_chunks = plan.total_chunks();

        debug!(
            file_name = %file.name,
            size = file.len(),
            total_chunks,
            container_id,
            "Starting upload"
        );

        if plan.is_single() {
            let request = UploadRequest::WholeFile(FileUpload {
                meta,
                payload: file.bytes.clone(),
            });
            let accepted = self.send_with_retry(&request, &file.name, 0).await?;
            let file_url = accepted.file_url.ok_or_else(|| missing_url(&file.name))?;
            return Ok(UploadOutcome {
                file_id: accepted.file_id,
                file_url,
                file_name: file.name.clone(),
                chunks: 1,
            });
        }

        let mut file_id: Option<String> = None;
        let mut file_url = None;

        for (chunk_index, range) in plan.ranges().enumerate() {
            let request = UploadRequest::Chunk(ChunkUpload {
                meta: meta.clone(),
                chunk_index,
                total_chunks,
                continuation_file_id: file_id.clone(),
                payload: file.bytes.slice(range),
            });
            let accepted = self.send_with_retry(&request, &file.name, chunk_index).await?;

            match &file_id {
                None => file_id = Some(accepted.file_id),
                Some(expected) if *expected != accepted.file_id => {
                    return Err(UploadError::ProtocolViolation(format!(
                        "chunk {} of {} was stored as {} instead of {}",
                        chunk_index, file.name, accepted.file_id, expected
                    ))
                    .into());
                }
                Some(_) => {}
            }
            file_url = accepted.file_url;

            let uploaded = chunk_index + 1;
            self.reporter.on_progress(
                &file.name,
                uploaded,
                total_chunks,
                progress_percent(uploaded, total_chunks),
            );
        }

        let file_id = file_id.ok_or_else(|| {
            OnboardingError::from(UploadError::ProtocolViolation(
                "no chunk was sent".to_string(),
            ))
        })?;
        let file_url = file_url.ok_or_else(|| missing_url(&file.name))?;

        Ok(UploadOutcome {
            file_id,
            file_url,
            file_name: file.name.clone(),
            chunks: total_chunks,
        })
    }

    async fn send_with_retry(
        &self,
        request: &UploadRequest,
        file_name: &str,
        chunk_index: usize,
    ) -> OnboardingResult<Accepted> {
        let fields = request.to_fields();
        let fields = &fields;
        let reporter = &self.reporter;

        self.retry
            .execute(
                move |attempt| async move {
                    debug!(file_name, chunk_index, attempt, "Sending upload request");
                    self.send_once(fields).await
                },
                |attempt, error| reporter.on_retry(file_name, chunk_index, attempt, error),
            )
            .await
            .map_err(|failure| {
                if failure.error.is_retryable() {
                    UploadError::RetriesExhausted {
                        file_name: file_name.to_string(),
                        chunk_index,
                        attempts: failure.attempts,
                        source: Box::new(failure.error),
                    }
                    .into()
                } else {
                    failure.error
                }
            })
    }

    async fn send_once(&self, fields: &[(&'static str, String)]) -> OnboardingResult<Accepted> {
        let response = self.transport.post_form(&self.endpoint, fields).await?;

        if !response.status.is_success() {
            let message = match serde_json::from_slice::<UploadResponse>(&response.body) {
                Ok(UploadResponse::Error { message }) if !message.is_empty() => message,
                _ => response.body_text(),
            };
            return Err(ServerError::Status {
                status: response.status.as_u16(),
                message,
            }
            .into());
        }

        match serde_json::from_slice::<UploadResponse>(&response.body) {
            Ok(UploadResponse::Success { file_id, .. }) if file_id.is_empty() => Err(
                ResponseError::UnexpectedFormat("success reply without fileId".to_string()).into(),
            ),
            Ok(UploadResponse::Success { file_id, file_url }) => Ok(Accepted {
                file_id,
                file_url: file_url.filter(|u| !u.is_empty()),
            }),
            Ok(UploadResponse::Error { message }) => Err(ServerError::Rejected(message).into()),
            Err(e) => Err(OnboardingError::deserialization(e.to_string())),
        }
    }
}

fn missing_url(file_name: &str) -> OnboardingError {
    ResponseError::UnexpectedFormat(format!(
        "final reply for {} carries no fileUrl",
        file_name
    ))
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockFormTransport, MockResponse, ProgressEvent, RecordingReporter};
    use std::time::Duration;

    const KIB: usize = 1024;

    fn client(transport: &MockFormTransport) -> UploadClient {
        let config = ClientConfig::builder()
            .endpoint("http://receiver.test/")
            .build()
            .unwrap();
        UploadClient::new(&config, Arc::new(transport.clone()))
    }

    fn file(len: usize) -> UploadFile {
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        UploadFile::new("statement.pdf", "application/pdf", bytes)
    }

    #[test]
    fn test_chunk_plan() {
        let plan = ChunkPlan::new(1024 * KIB, 300 * KIB);
        assert_eq!(plan.total_chunks(), 4);
        let sizes: Vec<usize> = plan.ranges().map(|r| r.len()).collect();
        assert_eq!(sizes, vec![300 * KIB, 300 * KIB, 300 * KIB, 124 * KIB]);

        assert_eq!(ChunkPlan::new(300 * KIB, 300 * KIB).total_chunks(), 1);
        assert_eq!(ChunkPlan::new(300 * KIB + 1, 300 * KIB).total_chunks(), 2);
        assert!(ChunkPlan::new(0, 300 * KIB).is_single());
    }

    #[tokio::test]
    async fn test_small_file_single_request() {
        let transport = MockFormTransport::new()
            .add_response(MockResponse::upload_success("f1", Some("http://receiver.test/files/f1")));

        let outcome = client(&transport)
            .upload(&file(10 * KIB), "incorporation", 0, "folder-1")
            .await
            .unwrap();

        assert_eq!(outcome.file_id, "f1");
        assert_eq!(outcome.chunks, 1);
        let requests = transport.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].has_field("chunk_index"));
        assert!(!requests[0].has_field("total_chunks"));
        assert!(!requests[0].has_field("file_id"));
        assert_eq!(requests[0].field("form_type"), Some("file_upload"));
    }

    #[tokio::test]
    async fn test_chunks_carry_continuation_id() {
        let transport = MockFormTransport::new().add_responses(vec![
            MockResponse::upload_success("f9", None),
            MockResponse::upload_success("f9", None),
            MockResponse::upload_success("f9", Some("http://receiver.test/files/f9")),
        ]);
        let reporter = Arc::new(RecordingReporter::new());

        let outcome = client(&transport)
            .with_reporter(reporter.clone())
            .upload(&file(700 * KIB), "articles", 1, "folder-1")
            .await
            .unwrap();

        assert_eq!(outcome.file_id, "f9");
        assert_eq!(outcome.chunks, 3);

        let requests = transport.recorded_requests();
        assert_eq!(requests.len(), 3);
        for (i, request) in requests.iter().enumerate() {
            assert_eq!(request.field("chunk_index"), Some(i.to_string().as_str()));
            assert_eq!(request.field("total_chunks"), Some("3"));
        }
        assert!(!requests[0].has_field("file_id"));
        assert_eq!(requests[1].field("file_id"), Some("f9"));
        assert_eq!(requests[2].field("file_id"), Some("f9"));

        assert_eq!(reporter.percentages(), vec![33, 67, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_retried_then_succeeds() {
        let transport = MockFormTransport::new().add_responses(vec![
            MockResponse::upload_success("f1", None),
            MockResponse::status(503, "busy"),
            MockResponse::network_error("reset"),
            MockResponse::upload_success("f1", Some("http://receiver.test/files/f1")),
        ]);
        let started = tokio::time::Instant::now();

        let outcome = client(&transport)
            .upload(&file(400 * KIB), "articles", 0, "folder-1")
            .await
            .unwrap();

        assert_eq!(outcome.chunks, 2);
        assert_eq!(transport.request_count(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        let requests = transport.recorded_requests();
        assert_eq!(requests[3].field("chunk_index"), Some("1"));
        assert_eq!(requests[3].field("file_id"), Some("f1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_chunk_aborts_upload() {
        let transport = MockFormTransport::new()
            .add_response(MockResponse::upload_success("f1", None))
            .with_default_response(MockResponse::status(502, "bad gateway"));
        let reporter = Arc::new(RecordingReporter::new());

        let err = client(&transport)
            .with_reporter(reporter.clone())
            .upload(&file(1024 * KIB), "articles", 0, "folder-1")
            .await
            .unwrap_err();

        match err {
            OnboardingError::Upload(UploadError::RetriesExhausted {
                chunk_index,
                attempts,
                ..
            }) => {
                assert_eq!(chunk_index, 1);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // chunk 0 once, chunk 1 three times, nothing after.
        assert_eq!(transport.request_count(), 4);
        assert!(matches!(reporter.events().last(), Some(ProgressEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let transport = MockFormTransport::new()
            .add_response(MockResponse::status(400, r#"{"status":"error","message":"Missing parameter: folderId"}"#));

        let err = client(&transport)
            .upload(&file(KIB), "articles", 0, "")
            .await
            .unwrap_err();

        assert_eq!(transport.request_count(), 1);
        match err {
            OnboardingError::Server(ServerError::Status { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Missing parameter: folderId");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_storage_failure_not_retried() {
        let transport = MockFormTransport::new().add_responses(vec![
            MockResponse::status(
                507,
                r#"{"status":"error","message":"Storage error: Storage quota exceeded: full (limit: 10, used: 10)"}"#,
            ),
            MockResponse::upload_success("f1", Some("http://receiver.test/files/f1")),
        ]);

        let err = client(&transport)
            .upload(&file(KIB), "articles", 0, "folder-1")
            .await
            .unwrap_err();

        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.remaining_responses(), 1);
        match err {
            OnboardingError::Server(ServerError::Status { status, message }) => {
                assert_eq!(status, 507);
                assert!(message.contains("quota"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_reply_is_retried() {
        let transport = MockFormTransport::new().add_responses(vec![
            MockResponse::receiver_error("Service busy, please retry the submission"),
            MockResponse::upload_success("f1", Some("http://receiver.test/files/f1")),
        ]);

        let outcome = client(&transport)
            .upload(&file(KIB), "articles", 0, "folder-1")
            .await
            .unwrap();
        assert_eq!(outcome.file_id, "f1");
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_changed_file_id_is_protocol_violation() {
        let transport = MockFormTransport::new().add_responses(vec![
            MockResponse::upload_success("f1", None),
            MockResponse::upload_success("other", Some("http://receiver.test/files/other")),
        ]);

        let err = client(&transport)
            .upload(&file(400 * KIB), "articles", 0, "folder-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::Upload(UploadError::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_final_reply_without_url_fails() {
        let transport =
            MockFormTransport::new().add_response(MockResponse::upload_success("f1", None));

        let err = client(&transport)
            .upload(&file(KIB), "articles", 0, "folder-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::Response(ResponseError::UnexpectedFormat(_))
        ));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_file_is_single_request() {
        let transport = MockFormTransport::new()
            .add_response(MockResponse::upload_success("f0", Some("http://receiver.test/files/f0")));

        client(&transport)
            .upload(&file(0), "articles", 0, "folder-1")
            .await
            .unwrap();
        let request = transport.last_request().unwrap();
        assert_eq!(request.field("file"), Some(""));
        assert!(!request.has_field("chunk_index"));
    }

    #[tokio::test]
    async fn test_from_path_guesses_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passport.png");
        tokio::fs::write(&path, b"\x89PNG").await.unwrap();

        let file = UploadFile::from_path(&path).await.unwrap();
        assert_eq!(file.name, "passport.png");
        assert_eq!(file.content_type, "image/png");
        assert_eq!(file.len(), 4);
    }
}
