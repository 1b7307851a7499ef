//! Onboarding application intake.
//!
//! A submission creates one folder for the application's documents, appends
//! one row to the onboarding sheet and notifies the configured recipient.
//! Only the row append runs under the submission lock; file uploads never
//! take it.

use crate::config::ReceiverConfig;
use crate::errors::{LockError, OnboardingError, OnboardingResult, RequestError};
use crate::mail::{MailMessage, Mailer};
use crate::storage::{DriveStore, SheetStore};
use crate::types::{FormFields, FormType};
use chrono::{DateTime, Local, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Sheet columns in row order, the timestamp column excluded.
pub const COLUMNS: [&str; 54] = [
    "sale_name",
    "project_name",
    "telegram_group",
    "compliance_full_name",
    "compliance_position",
    "compliance_telegram",
    "compliance_email",
    "legal_full_name",
    "legal_position",
    "legal_telegram",
    "legal_email",
    "chargeback_full_name",
    "chargeback_position",
    "chargeback_telegram",
    "chargeback_email",
    "finance_full_name",
    "finance_position",
    "finance_telegram",
    "finance_email",
    "technical_full_name",
    "technical_position",
    "technical_telegram",
    "technical_email",
    "comments",
    "company_name",
    "legal_address",
    "registration_date",
    "registration_number",
    "license_jurisdiction",
    "license_number",
    "project_nature",
    "industries",
    "not_belongs_to_psp",
    "website",
    "ubo_country_citizenship",
    "ubo_country_residence",
    "director_country_citizenship",
    "director_country_residence",
    "shareholder_country_citizenship",
    "shareholder_country_residence",
    "urls",
    "processing_history",
    "chargeback_statistics",
    "incorporation",
    "incumbency",
    "articles",
    "ownershipChart",
    "boardOfDirectors",
    "shareholderRegister",
    "operatingLicense",
    "amlPolicy",
    "mlroInformation",
    "kycDocuments",
    "legalEntityDocuments",
];

/// Form field carrying the sales manager id.
pub const SALE_ID_FIELD: &str = "sale_id";

/// Format of the timestamp column.
pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Sales manager ids and display names.
///
/// Ids with an empty name exist but are unassigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SalesDirectory {
    managers: BTreeMap<String, String>,
}

impl SalesDirectory {
    /// Creates a directory from an id to name map.
    pub fn new(managers: BTreeMap<String, String>) -> Self {
        Self { managers }
    }

    /// Display name of an assigned manager.
    pub fn resolve(&self, id: &str) -> Option<&str> {
        self.managers
            .get(id.trim())
            .map(String::as_str)
            .filter(|name| !name.trim().is_empty())
    }

    /// True if the id exists, assigned or not.
    pub fn is_valid(&self, id: &str) -> bool {
        self.managers.contains_key(id.trim())
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    /// True if no id is configured.
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

/// One onboarding application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnboardingSubmission {
    values: BTreeMap<&'static str, String>,
}

impl OnboardingSubmission {
    /// Creates an empty submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column value. Names outside [`COLUMNS`] are ignored.
    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets a column value. Names outside [`COLUMNS`] are ignored.
    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        if let Some(known) = COLUMNS.iter().find(|c| **c == column) {
            self.values.insert(known, value.into());
        }
    }

    /// Value of a column, empty if unset.
    pub fn get(&self, column: &str) -> &str {
        self.values.get(column).map(String::as_str).unwrap_or("")
    }

    /// Project name.
    pub fn project_name(&self) -> &str {
        self.get("project_name")
    }

    /// Sales manager name.
    pub fn sale_name(&self) -> &str {
        self.get("sale_name")
    }

    /// Company name.
    pub fn company_name(&self) -> &str {
        self.get("company_name")
    }

    /// Parses form fields.
    ///
    /// `project_name` is required. The manager comes from `sale_name` or,
    /// when that is blank, from a `sale_id` known to `directory`.
    pub fn from_fields(fields: &FormFields, directory: &SalesDirectory) -> OnboardingResult<Self> {
        let mut submission = Self::new();
        for column in COLUMNS {
            if let Some(value) = fields.get(column) {
                submission.values.insert(column, value.trim().to_string());
            }
        }

        if submission.project_name().is_empty() {
            return Err(OnboardingError::missing("project_name"));
        }

        if submission.sale_name().is_empty() {
            let sale_id = fields
                .get(SALE_ID_FIELD)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| OnboardingError::missing("sale_name"))?;
            if !directory.is_valid(sale_id) {
                return Err(RequestError::InvalidParameter {
                    field: SALE_ID_FIELD.to_string(),
                    message: format!("unknown sales manager id '{}'", sale_id),
                }
                .into());
            }
            let name = directory.resolve(sale_id).unwrap_or("").to_string();
            submission.values.insert("sale_name", name);
        }

        Ok(submission)
    }

    /// Encodes the submission as ordered form fields, `form_type` included.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![("form_type", FormType::Onboarding.as_str().to_string())];
        out.extend(COLUMNS.iter().map(|c| (*c, self.get(c).to_string())));
        out
    }

    /// Sheet row: every column in order followed by the timestamp.
    pub fn row(&self, at: DateTime<Local>) -> Vec<String> {
        let mut row: Vec<String> = COLUMNS.iter().map(|c| self.get(c).to_string()).collect();
        row.push(at.format(TIMESTAMP_FORMAT).to_string());
        row
    }
}

/// Name of the folder created for an application.
pub fn folder_name(project_name: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", project_name, at.format("%Y-%m-%d"))
}

/// Handles `form_type=onboarding` requests.
pub struct SubmissionHandler {
    drive: Arc<dyn DriveStore>,
    sheets: Arc<dyn SheetStore>,
    mailer: Arc<dyn Mailer>,
    directory: SalesDirectory,
    root_container_id: String,
    sheet_name: String,
    recipient: Option<String>,
    lock: Mutex<()>,
    lock_wait: Duration,
}

impl std::fmt::Debug for SubmissionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionHandler")
            .field("root_container_id", &self.root_container_id)
            .field("sheet_name", &self.sheet_name)
            .field("recipient", &self.recipient)
            .field("lock_wait", &self.lock_wait)
            .finish()
    }
}

impl SubmissionHandler {
    /// Creates a handler over the given collaborators.
    pub fn new(
        config: &ReceiverConfig,
        drive: Arc<dyn DriveStore>,
        sheets: Arc<dyn SheetStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            drive,
            sheets,
            mailer,
            directory: SalesDirectory::new(config.sales_managers.clone()),
            root_container_id: config.root_container_id.clone(),
            sheet_name: config.sheet_name.clone(),
            recipient: config.recipient.clone(),
            lock: Mutex::new(()),
            lock_wait: config.lock_wait,
        }
    }

    /// Sales manager directory.
    pub fn directory(&self) -> &SalesDirectory {
        &self.directory
    }

    /// Parses and handles raw form fields. Returns the folder id.
    pub async fn handle_fields(&self, fields: &FormFields) -> OnboardingResult<String> {
        let submission = OnboardingSubmission::from_fields(fields, &self.directory)?;
        self.handle(&submission).await
    }

    /// Handles a parsed submission. Returns the folder id.
    pub async fn handle(&self, submission: &OnboardingSubmission) -> OnboardingResult<String> {
        let now = Utc::now();
        let folder_id = self
            .drive
            .create_container(
                &self.root_container_id,
                &folder_name(submission.project_name(), now),
            )
            .await?;
        debug!(folder_id = %folder_id, project = submission.project_name(), "Created application folder");

        let row = submission.row(now.with_timezone(&Local));
        let row_index = {
            let _guard = tokio::time::timeout(self.lock_wait, self.lock.lock())
                .await
                .map_err(|_| LockError::Timeout(self.lock_wait))?;
            self.sheets.append_row(&self.sheet_name, &row).await?
        };

        info!(
            project = submission.project_name(),
            folder_id = %folder_id,
            row_index,
            "Onboarding application stored"
        );

        if let Some(recipient) = &self.recipient {
            let message = MailMessage::onboarding_notification(
                recipient.clone(),
                submission.project_name(),
                submission.company_name(),
                submission.sale_name(),
            );
            self.mailer.send(&message).await?;
        }

        Ok(folder_id)
    }
}
