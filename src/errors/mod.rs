//! Error types for the onboarding integration.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type for onboarding operations.
pub type OnboardingResult<T> = Result<T, OnboardingError>;

/// Top-level error type for the onboarding integration.
#[derive(Debug, Error)]
pub enum OnboardingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Request error (malformed or missing fields).
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// Resource error.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Upload error.
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Server error.
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Response error.
    #[error("Response error: {0}")]
    Response(#[from] ResponseError),

    /// Lock error.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Mail error.
    #[error("Mail error: {0}")]
    Mail(#[from] MailError),
}

impl OnboardingError {
    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        OnboardingError::Configuration(ConfigurationError::InvalidConfiguration(msg.into()))
    }

    /// Creates a request validation error.
    pub fn request(msg: impl Into<String>) -> Self {
        OnboardingError::Request(RequestError::ValidationError(msg.into()))
    }

    /// Creates a missing parameter error.
    pub fn missing(field: impl Into<String>) -> Self {
        OnboardingError::Request(RequestError::MissingParameter(field.into()))
    }

    /// Creates a container not found error.
    pub fn container_not_found(id: impl Into<String>) -> Self {
        OnboardingError::Resource(ResourceError::ContainerNotFound(id.into()))
    }

    /// Creates a file not found error.
    pub fn file_not_found(id: impl Into<String>) -> Self {
        OnboardingError::Resource(ResourceError::FileNotFound(id.into()))
    }

    /// Creates a storage I/O error.
    pub fn storage(msg: impl Into<String>) -> Self {
        OnboardingError::Storage(StorageError::Io(msg.into()))
    }

    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        OnboardingError::Network(NetworkError::ConnectionFailed(msg.into()))
    }

    /// Creates a deserialization error.
    pub fn deserialization(msg: impl Into<String>) -> Self {
        OnboardingError::Response(ResponseError::DeserializationError(msg.into()))
    }

    /// Returns true if the error is retryable.
    ///
    /// Only transport-level statuses are retried. Store failures (507, and
    /// 500 for I/O) are final, like request errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            OnboardingError::Network(_) => true,
            OnboardingError::Server(ServerError::Status { status, .. }) => {
                StatusCode::from_u16(*status).is_ok_and(is_transient_status)
            }
            OnboardingError::Server(ServerError::Rejected(_)) => true,
            OnboardingError::Response(_) => true,
            _ => false,
        }
    }

    /// Returns the HTTP status code the receiver answers with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OnboardingError::Request(_) => StatusCode::BAD_REQUEST,
            OnboardingError::Upload(UploadError::OutOfOrder { .. })
            | OnboardingError::Upload(UploadError::SessionMismatch(_)) => StatusCode::CONFLICT,
            OnboardingError::Resource(_) => StatusCode::NOT_FOUND,
            OnboardingError::Storage(StorageError::QuotaExceeded { .. }) => {
                StatusCode::INSUFFICIENT_STORAGE
            }
            OnboardingError::Storage(StorageError::PermissionDenied(_)) => StatusCode::FORBIDDEN,
            OnboardingError::Lock(_) => StatusCode::SERVICE_UNAVAILABLE,
            OnboardingError::Network(_) | OnboardingError::Server(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message exposed to callers in an error reply.
    ///
    /// Lock timeouts are reported generically; everything else is verbatim.
    pub fn public_message(&self) -> String {
        match self {
            OnboardingError::Lock(_) => "Service busy, please retry the submission".to_string(),
            other => other.to_string(),
        }
    }
}

/// Statuses a gateway or an overloaded receiver answers with.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Missing setting.
    #[error("Missing setting: {0}")]
    MissingSetting(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Request errors.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid parameter.
    #[error("Invalid parameter {field}: {message}")]
    InvalidParameter {
        /// Field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Missing parameter.
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// Unsupported form type.
    #[error("Unsupported form type: {0}")]
    UnsupportedFormType(String),

    /// Payload is not valid base64.
    #[error("Invalid payload encoding: {0}")]
    InvalidPayload(String),
}

/// Resource errors.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Destination container not found.
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Upload session not found or expired.
    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    /// Sheet not found.
    #[error("Sheet not found: {0}")]
    SheetNotFound(String),
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage quota exceeded.
    #[error("Storage quota exceeded: {message} (limit: {limit}, used: {used})")]
    QuotaExceeded {
        /// Error message.
        message: String,
        /// Storage limit in bytes.
        limit: u64,
        /// Storage used in bytes.
        used: u64,
    },

    /// Permission denied by the store.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Underlying I/O failure.
    #[error("I/O failure: {0}")]
    Io(String),

    /// Stored metadata could not be read.
    #[error("Corrupt metadata: {0}")]
    CorruptMetadata(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(err.to_string()),
            _ => StorageError::Io(err.to_string()),
        }
    }
}

/// Upload errors.
#[derive(Debug, Error)]
pub enum UploadError {
    /// A chunk failed on every attempt.
    #[error("Chunk {chunk_index} of {file_name} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Original file name.
        file_name: String,
        /// 0-based chunk index.
        chunk_index: usize,
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        #[source]
        source: Box<OnboardingError>,
    },

    /// Chunk arrived out of sequence.
    #[error("Chunk out of order for {file_id}: expected {expected}, got {received}")]
    OutOfOrder {
        /// Session file id.
        file_id: String,
        /// Next expected chunk index.
        expected: usize,
        /// Received chunk index.
        received: usize,
    },

    /// Chunk metadata disagrees with the session.
    #[error("Chunk does not match upload session: {0}")]
    SessionMismatch(String),

    /// Receiver reply broke the continuation protocol.
    #[error("Continuation protocol violated: {0}")]
    ProtocolViolation(String),
}

/// Network errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Timeout.
    #[error("Request timeout: {0}")]
    Timeout(String),
}

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Body or error message.
        message: String,
    },

    /// The receiver answered `{status: "error"}` with a success status.
    #[error("Receiver rejected request: {0}")]
    Rejected(String),
}

/// Response errors.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Unexpected format.
    #[error("Unexpected response format: {0}")]
    UnexpectedFormat(String),
}

/// Lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// The submission lock could not be acquired in time.
    #[error("Timed out after {0:?} waiting for the submission lock")]
    Timeout(std::time::Duration),
}

/// Mail errors.
#[derive(Debug, Error)]
pub enum MailError {
    /// Could not reach the relay.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Relay answered with a failure code.
    #[error("Relay rejected {command}: {code} {message}")]
    Rejected {
        /// Command that failed.
        command: String,
        /// SMTP reply code.
        code: u16,
        /// Reply text.
        message: String,
    },

    /// Protocol violation or timeout.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            TransportError::Network(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

impl From<TransportError> for OnboardingError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(msg) => OnboardingError::Network(NetworkError::Timeout(msg)),
            TransportError::Network(msg) | TransportError::Http(msg) => {
                OnboardingError::Network(NetworkError::ConnectionFailed(msg))
            }
            TransportError::Serialization(msg) => {
                OnboardingError::Request(RequestError::ValidationError(msg))
            }
        }
    }
}
