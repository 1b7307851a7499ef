//! Onboarding Intake
//!
//! Client and receiver for a multi-step onboarding application: form
//! submissions that append one sheet row per application, and document
//! uploads that are split into fixed-size chunks and reassembled by the
//! receiver.
//!
//! # Features
//!
//! - **Chunked uploads**: 300 KiB chunks, per-chunk retry, progress reports
//! - **Reassembly**: ordered, exactly-once appends with idle session expiry
//! - **Submissions**: folder per application, serialised sheet appends
//! - **Notifications**: plain SMTP relay or log-only mail
//! - **Storage**: in-memory or directory-backed drive and sheet
//! - **Wizards**: step validation of the onboarding form and the application questionnaire
//!
//! # Example
//!
//! ```no_run
//! use integrations_onboarding::{ClientConfig, OnboardingClient, UploadFile};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::builder()
//!     .endpoint("http://localhost:8080/")
//!     .build()?;
//! let client = OnboardingClient::new(config)?;
//!
//! let file = UploadFile::from_path("articles.pdf").await?;
//! let outcome = client.upload(&file, "articles", 0, "folder-id").await?;
//! println!("{}: {}", outcome.file_id, outcome.file_url);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod client;
pub mod config;
pub mod errors;
pub mod mail;
pub mod observability;
pub mod receiver;
pub mod resilience;
pub mod server;
pub mod storage;
pub mod submission;
pub mod transport;
pub mod types;
pub mod wizard;

// Internal modules (not part of public API)
#[cfg(test)]
mod mocks;

// Re-exports for convenience
pub use client::{Document, OnboardingClient, UploadClient, UploadFile, UploadOutcome};
pub use config::{ClientConfig, ClientConfigBuilder, ReceiverConfig, ReceiverConfigBuilder};
pub use errors::{OnboardingError, OnboardingResult};
pub use receiver::{UploadReceiver, UploadReply};
pub use submission::{OnboardingSubmission, SalesDirectory, SubmissionHandler};
pub use types::{UploadRequest, UploadResponse};
pub use wizard::{ApplicationWizard, OnboardingWizard};

/// Prelude module with commonly used types and traits.
///
/// ```no_run
/// use integrations_onboarding::prelude::*;
/// ```
pub mod prelude {
    // Client
    pub use crate::client::{
        Document, DocumentResult, OnboardingClient, ProgressReporter, UploadClient, UploadFile,
        UploadOutcome, WizardReceipt,
    };

    // Configuration
    pub use crate::config::{ClientConfig, ReceiverConfig, StorageBackend};

    // Receiver side
    pub use crate::mail::{MailMessage, Mailer};
    pub use crate::receiver::{SessionRegistry, UploadReceiver, UploadReply};
    pub use crate::storage::{DriveStore, SheetStore, StoredFile};
    pub use crate::submission::{OnboardingSubmission, SalesDirectory, SubmissionHandler};

    // Wire types
    pub use crate::types::{FormType, SubmissionResponse, UploadRequest, UploadResponse};

    // Wizards
    pub use crate::wizard::{ApplicationWizard, OnboardingWizard};

    // Errors
    pub use crate::errors::{OnboardingError, OnboardingResult};
}
