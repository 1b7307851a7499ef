//! Onboarding form client.
//!
//! [`OnboardingClient`] submits the application, then uploads its documents
//! into the folder the receiver created for it. Each file is its own
//! sequential chunk pipeline; several files may be in flight at once.

pub mod progress;
pub mod upload;

pub use progress::{progress_percent, ProgressReporter, TracingReporter};
pub use upload::{ChunkPlan, UploadClient, UploadFile, UploadOutcome};

use crate::config::ClientConfig;
use crate::errors::{OnboardingError, OnboardingResult, ServerError};
use crate::submission::OnboardingSubmission;
use crate::transport::{FormTransport, ReqwestTransport};
use crate::types::SubmissionResponse;
use crate::wizard::{OnboardingWizard, STEP_TITLES};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// A file tagged with the slot it belongs to.
#[derive(Debug, Clone)]
pub struct Document {
    /// Logical document type, e.g. `articles`.
    pub logical_type: String,
    /// Position among files of the same type.
    pub index: u32,
    /// File content.
    pub file: UploadFile,
}

impl Document {
    /// Creates a document.
    pub fn new(logical_type: impl Into<String>, index: u32, file: UploadFile) -> Self {
        Self {
            logical_type: logical_type.into(),
            index,
            file,
        }
    }
}

/// Outcome of one document upload.
#[derive(Debug)]
pub struct DocumentResult {
    /// Logical document type.
    pub logical_type: String,
    /// Position among files of the same type.
    pub index: u32,
    /// Original file name.
    pub file_name: String,
    /// Upload outcome.
    pub result: OnboardingResult<UploadOutcome>,
}

impl DocumentResult {
    /// True if the upload succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Result of [`OnboardingClient::submit_wizard`].
#[derive(Debug)]
pub struct WizardReceipt {
    /// Folder created for the application.
    pub folder_id: String,
    /// One entry per attached document, in completion order.
    pub documents: Vec<DocumentResult>,
}

impl WizardReceipt {
    /// Documents whose upload failed.
    pub fn failures(&self) -> impl Iterator<Item = &DocumentResult> {
        self.documents.iter().filter(|d| !d.is_success())
    }
}

/// Onboarding form client.
#[derive(Clone)]
pub struct OnboardingClient {
    transport: Arc<dyn FormTransport>,
    endpoint: Url,
    uploads: UploadClient,
    file_concurrency: usize,
}

impl std::fmt::Debug for OnboardingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnboardingClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("uploads", &self.uploads)
            .field("file_concurrency", &self.file_concurrency)
            .finish()
    }
}

impl OnboardingClient {
    /// Creates a client over HTTP.
    pub fn new(config: ClientConfig) -> OnboardingResult<Self> {
        config.validate()?;
        let transport = ReqwestTransport::with_timeout(config.timeout).map_err(|e| {
            OnboardingError::configuration(format!("Failed to create transport: {}", e))
        })?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates a client over the given transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn FormTransport>) -> Self {
        Self {
            uploads: UploadClient::new(&config, transport.clone()),
            transport,
            endpoint: config.endpoint,
            file_concurrency: config.file_concurrency.max(1),
        }
    }

    /// Replaces the upload notification sink.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.uploads = self.uploads.with_reporter(reporter);
        self
    }

    /// Underlying upload client.
    pub fn uploads(&self) -> &UploadClient {
        &self.uploads
    }

    /// Submits an application. Returns the id of its document folder.
    ///
    /// Submissions are sent once; a rejected or failed submission is left to
    /// the caller.
    pub async fn submit(&self, submission: &OnboardingSubmission) -> OnboardingResult<String> {
        let response = self
            .transport
            .post_form(&self.endpoint, &submission.to_fields())
            .await?;

        let parsed = serde_json::from_slice::<SubmissionResponse>(&response.body);
        if !response.status.is_success() {
            let message = match parsed {
                Ok(SubmissionResponse::Error { message }) if !message.is_empty() => message,
                _ => response.body_text(),
            };
            return Err(ServerError::Status {
                status: response.status.as_u16(),
                message,
            }
            .into());
        }

        match parsed {
            Ok(SubmissionResponse::Success { folder_id }) => {
                info!(project = submission.project_name(), folder_id = %folder_id, "Application submitted");
                Ok(folder_id)
            }
            Ok(SubmissionResponse::Error { message }) => Err(ServerError::Rejected(message).into()),
            Err(e) => Err(OnboardingError::deserialization(e.to_string())),
        }
    }

    /// Uploads one file into `container_id`.
    pub async fn upload(
        &self,
        file: &UploadFile,
        logical_type: &str,
        index: u32,
        container_id: &str,
    ) -> OnboardingResult<UploadOutcome> {
        self.uploads
            .upload(file, logical_type, index, container_id)
            .await
    }

    /// Uploads every document into `container_id`.
    ///
    /// Runs up to `file_concurrency` files at once. A failed file does not
    /// stop the others.
    pub async fn upload_all(&self, documents: &[Document], container_id: &str) -> Vec<DocumentResult> {
        stream::iter(documents)
            .map(|doc| async move {
                let result = self
                    .uploads
                    .upload(&doc.file, &doc.logical_type, doc.index, container_id)
                    .await;
                DocumentResult {
                    logical_type: doc.logical_type.clone(),
                    index: doc.index,
                    file_name: doc.file.name.clone(),
                    result,
                }
            })
            .buffer_unordered(self.file_concurrency)
            .collect()
            .await
    }

    /// Validates the wizard, submits it and uploads every attached file.
    pub async fn submit_wizard(
        &self,
        wizard: &OnboardingWizard,
        sale_name: &str,
    ) -> OnboardingResult<WizardReceipt> {
        if let Some(step) = wizard.first_invalid_step() {
            return Err(OnboardingError::request(format!(
                "step {} ({}) is incomplete",
                step + 1,
                STEP_TITLES[step]
            )));
        }

        let folder_id = self.submit(&wizard.to_submission(sale_name)).await?;
        let documents = self.upload_all(&wizard.documents(), &folder_id).await;

        let failed = documents.iter().filter(|d| !d.is_success()).count();
        if failed > 0 {
            warn!(folder_id = %folder_id, failed, total = documents.len(), "Some documents were not uploaded");
        }

        Ok(WizardReceipt {
            folder_id,
            documents,
        })
    }
}
