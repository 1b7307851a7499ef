//! Mock implementations for testing.
//!
//! Provides a recording form transport with queued responses and a
//! progress reporter that keeps every notification.

use crate::client::{ProgressReporter, UploadOutcome};
use crate::errors::{OnboardingError, TransportError};
use crate::transport::{FormTransport, HttpResponse};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use url::Url;

/// Mock response configuration
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Response body
    pub body: String,
    /// HTTP status code
    pub status: u16,
    /// Delay before response
    pub delay_ms: Option<u64>,
    /// Connection failure to return instead
    pub network_error: Option<String>,
}

impl MockResponse {
    /// Create a successful JSON response
    pub fn json<T: Serialize>(data: &T) -> Self {
        Self {
            body: serde_json::to_string(data).unwrap_or_default(),
            status: 200,
            delay_ms: None,
            network_error: None,
        }
    }

    /// Create a successful response with raw body
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            status: 200,
            delay_ms: None,
            network_error: None,
        }
    }

    /// Create a response with the given status
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            status,
            delay_ms: None,
            network_error: None,
        }
    }

    /// Create a connection failure
    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            body: String::new(),
            status: 0,
            delay_ms: None,
            network_error: Some(message.into()),
        }
    }

    /// Create an upload success reply
    pub fn upload_success(file_id: &str, file_url: Option<&str>) -> Self {
        Self::json(&crate::types::UploadResponse::Success {
            file_id: file_id.to_string(),
            file_url: file_url.map(str::to_string),
        })
    }

    /// Create an `{status: "error"}` reply
    pub fn receiver_error(message: &str) -> Self {
        Self::json(&crate::types::UploadResponse::Error {
            message: message.to_string(),
        })
    }

    /// Add delay to response
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = Some(ms);
        self
    }
}

/// Recorded request for verification
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request URL
    pub url: String,
    /// Form fields in send order
    pub fields: Vec<(String, String)>,
}

impl RecordedRequest {
    /// Value of a form field, if sent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// True if the field was sent.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// Mock form transport for testing
#[derive(Clone, Default)]
pub struct MockFormTransport {
    /// Queue of responses to return
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    /// Recorded requests
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Default response if queue is empty
    default_response: Option<MockResponse>,
}

impl MockFormTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a response to the queue
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.lock().push_back(response);
        self
    }

    /// Add multiple responses
    pub fn add_responses(self, responses: impl IntoIterator<Item = MockResponse>) -> Self {
        self.responses.lock().extend(responses);
        self
    }

    /// Set default response when queue is empty
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = Some(response);
        self
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Get the last recorded request
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().last().cloned()
    }

    /// Number of requests sent so far
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Get remaining response count
    pub fn remaining_responses(&self) -> usize {
        self.responses.lock().len()
    }

    fn next_response(&self) -> Option<MockResponse> {
        let mut queue = self.responses.lock();
        queue.pop_front().or_else(|| self.default_response.clone())
    }
}

#[async_trait]
impl FormTransport for MockFormTransport {
    async fn post_form(
        &self,
        url: &Url,
        fields: &[(&'static str, String)],
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(RecordedRequest {
            url: url.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });

        let response = self
            .next_response()
            .ok_or_else(|| TransportError::Network("No mock response queued".to_string()))?;

        if let Some(delay) = response.delay_ms {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        if let Some(message) = response.network_error {
            return Err(TransportError::Network(message));
        }

        let status = StatusCode::from_u16(response.status)
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(HttpResponse::new(status, Bytes::from(response.body)))
    }
}

/// Notification captured by [`RecordingReporter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Chunk progress
    Progress {
        /// Original file name
        file_name: String,
        /// Rounded percentage
        percent: u8,
    },
    /// Retry of a chunk
    Retry {
        /// Original file name
        file_name: String,
        /// 0-based chunk index
        chunk_index: usize,
        /// Failed attempt number
        attempt: u32,
    },
    /// Upload finished
    Completed {
        /// Original file name
        file_name: String,
        /// Stored file id
        file_id: String,
    },
    /// Upload abandoned
    Failed {
        /// Original file name
        file_name: String,
        /// Error text
        message: String,
    },
}

/// Progress reporter recording every notification
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications in order
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Reported percentages in order
    pub fn percentages(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn on_progress(&self, file_name: &str, _uploaded: usize, _total: usize, percent: u8) {
        self.events.lock().push(ProgressEvent::Progress {
            file_name: file_name.to_string(),
            percent,
        });
    }

    fn on_retry(&self, file_name: &str, chunk_index: usize, attempt: u32, _error: &OnboardingError) {
        self.events.lock().push(ProgressEvent::Retry {
            file_name: file_name.to_string(),
            chunk_index,
            attempt,
        });
    }

    fn on_complete(&self, outcome: &UploadOutcome) {
        self.events.lock().push(ProgressEvent::Completed {
            file_name: outcome.file_name.clone(),
            file_id: outcome.file_id.clone(),
        });
    }

    fn on_failure(&self, file_name: &str, error: &OnboardingError) {
        self.events.lock().push(ProgressEvent::Failed {
            file_name: file_name.to_string(),
            message: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_then_default() {
        let transport = MockFormTransport::new()
            .add_response(MockResponse::upload_success("f1", None))
            .with_default_response(MockResponse::status(503, "down"));
        let url = Url::parse("http://localhost/").unwrap();

        let first = transport
            .post_form(&url, &[("type", "articles".to_string())])
            .await
            .unwrap();
        assert_eq!(first.status, StatusCode::OK);

        let second = transport.post_form(&url, &[]).await.unwrap();
        assert_eq!(second.status, StatusCode::SERVICE_UNAVAILABLE);

        let recorded = transport.recorded_requests();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].url, "http://localhost/");
        assert_eq!(recorded[0].field("type"), Some("articles"));
        assert_eq!(transport.remaining_responses(), 0);
    }

    #[tokio::test]
    async fn test_network_error() {
        let transport = MockFormTransport::new().add_response(MockResponse::network_error("reset"));
        let url = Url::parse("http://localhost/").unwrap();
        let err = transport.post_form(&url, &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }
}
