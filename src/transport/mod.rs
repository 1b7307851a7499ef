//! HTTP transport layer for the form endpoint.

use crate::errors::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Content type of every request body.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP transport abstraction for testability.
#[async_trait]
pub trait FormTransport: Send + Sync {
    /// POSTs URL-encoded form fields and returns the raw response.
    async fn post_form(
        &self,
        url: &Url,
        fields: &[(&'static str, String)],
    ) -> Result<HttpResponse, TransportError>;
}

/// HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Response status code.
    pub status: StatusCode,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a new HTTP response.
    pub fn new(status: StatusCode, body: Bytes) -> Self {
        Self { status, body }
    }

    /// Body as lossy UTF-8, for error messages.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Encodes form fields as an `application/x-www-form-urlencoded` body.
pub fn encode_form(fields: &[(&'static str, String)]) -> Result<String, TransportError> {
    serde_urlencoded::to_string(fields).map_err(|e| TransportError::Serialization(e.to_string()))
}

/// Reqwest-based HTTP transport implementation.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// Creates a new reqwest transport.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    /// Creates a transport with its own client and an optional per-request timeout.
    pub fn with_timeout(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to create client: {}", e)))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl FormTransport for ReqwestTransport {
    async fn post_form(
        &self,
        url: &Url,
        fields: &[(&'static str, String)],
    ) -> Result<HttpResponse, TransportError> {
        let body = encode_form(fields)?;
        let mut req = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body);

        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        Ok(HttpResponse::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_form() {
        let fields = vec![
            ("form_type", "file_upload".to_string()),
            ("file", "YW+/Yw==".to_string()),
            ("filename", "my report.pdf".to_string()),
        ];
        let encoded = encode_form(&fields).unwrap();
        assert_eq!(
            encoded,
            "form_type=file_upload&file=YW%2B%2FYw%3D%3D&filename=my+report.pdf"
        );
    }

    #[test]
    fn test_body_text() {
        let response = HttpResponse::new(StatusCode::BAD_GATEWAY, Bytes::from_static(b"upstream"));
        assert_eq!(response.body_text(), "upstream");
    }
}
