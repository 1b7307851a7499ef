//! Upload notifications.

use super::upload::UploadOutcome;
use crate::errors::OnboardingError;
use tracing::{info, warn};

/// Receives user-visible upload notifications.
///
/// Notifications are observational; a reporter cannot influence the upload.
pub trait ProgressReporter: Send + Sync {
    /// A chunk of a multi-chunk upload succeeded.
    fn on_progress(&self, file_name: &str, uploaded_chunks: usize, total_chunks: usize, percent: u8);

    /// A chunk send failed and will be retried.
    fn on_retry(&self, _file_name: &str, _chunk_index: usize, _attempt: u32, _error: &OnboardingError) {}

    /// The whole file was stored.
    fn on_complete(&self, outcome: &UploadOutcome);

    /// The upload was abandoned.
    fn on_failure(&self, file_name: &str, error: &OnboardingError);
}

/// Percentage of chunks uploaded, rounded half up.
pub fn progress_percent(uploaded_chunks: usize, total_chunks: usize) -> u8 {
    if total_chunks == 0 {
        return 100;
    }
    let ratio = uploaded_chunks.min(total_chunks) as f64 / total_chunks as f64;
    (ratio * 100.0).round() as u8
}

/// Reporter emitting `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn on_progress(&self, file_name: &str, uploaded_chunks: usize, total_chunks: usize, percent: u8) {
        info!(
            file_name,
            uploaded_chunks,
            total_chunks,
            percent,
            "Uploading {}: {}%",
            file_name,
            percent
        );
    }

    fn on_retry(&self, file_name: &str, chunk_index: usize, attempt: u32, error: &OnboardingError) {
        warn!(file_name, chunk_index, attempt, error = %error, "Retrying chunk");
    }

    fn on_complete(&self, outcome: &UploadOutcome) {
        info!(
            file_name = %outcome.file_name,
            file_id = %outcome.file_id,
            chunks = outcome.chunks,
            "File {} uploaded",
            outcome.file_name
        );
    }

    fn on_failure(&self, file_name: &str, error: &OnboardingError) {
        warn!(file_name, error = %error, "Upload of {} failed", file_name);
    }
}
