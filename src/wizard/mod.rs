//! Client-side state of the five-step onboarding form.
//!
//! The wizard holds what the applicant typed and attached, validates each
//! step and flattens the result into an [`OnboardingSubmission`] plus the
//! list of documents to upload once the application folder exists. The
//! shorter application questionnaire lives in [`application`].

pub mod application;

pub use application::ApplicationWizard;

use crate::client::{Document, UploadFile};
use crate::submission::OnboardingSubmission;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

static DATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}\.\d{2}\.\d{4}$").expect("date pattern is valid"));

/// Step titles in order.
pub const STEP_TITLES: [&str; 5] = [
    "Contact Information",
    "Company Information",
    "UBO and Corporate Structure",
    "URLs and Processing History",
    "Documents",
];

/// Project nature requiring a free-text description.
pub const OTHER_NATURE: &str = "Others";

/// Document slots of the last step, in column order.
pub const DOCUMENT_KINDS: [&str; 11] = [
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

/// Departments of the contact step, in column order.
pub const DEPARTMENTS: [&str; 5] = ["compliance", "legal", "chargeback", "finance", "technical"];

const NO: &str = "NO";
const YES: &str = "YES";

/// Contact person of one department.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepartmentContact {
    /// Department takes part in onboarding.
    pub enabled: bool,
    /// Contact name.
    pub full_name: String,
    /// Job title.
    pub position: String,
    /// Telegram handle.
    pub telegram: String,
    /// Email address.
    pub email: String,
}

impl DepartmentContact {
    fn is_valid(&self) -> bool {
        if !self.enabled {
            return true;
        }
        filled(&self.full_name)
            && filled(&self.position)
            && filled(&self.telegram)
            && EMAIL_PATTERN.is_match(&self.email)
    }
}

/// Step 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactStep {
    /// Project name.
    pub project_name: String,
    /// Shared Telegram group.
    pub telegram_group: String,
    /// One entry per [`DEPARTMENTS`] slot.
    pub departments: [DepartmentContact; 5],
    /// Free-text comments.
    pub comments: String,
}

impl ContactStep {
    /// Contact of a department by name.
    pub fn department_mut(&mut self, name: &str) -> Option<&mut DepartmentContact> {
        let slot = DEPARTMENTS.iter().position(|d| *d == name)?;
        self.departments.get_mut(slot)
    }

    fn is_valid(&self) -> bool {
        filled(&self.project_name)
            && filled(&self.telegram_group)
            && self.departments.iter().all(DepartmentContact::is_valid)
    }
}

/// Step 2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyStep {
    /// Legal entity name.
    pub company_name: String,
    /// Registered address.
    pub legal_address: String,
    /// `dd.mm.yyyy`.
    pub registration_date: String,
    /// Registry number.
    pub registration_number: String,
    /// Licensing jurisdiction, if licensed.
    pub license_jurisdiction: String,
    /// License number, if licensed.
    pub license_number: String,
    /// Business model.
    pub project_nature: String,
    /// Required when `project_nature` is [`OTHER_NATURE`].
    pub project_nature_other: String,
    /// Industries served.
    pub industries: String,
    /// Project is not a payment service provider.
    pub not_belong_to_category: bool,
    /// Optional website.
    pub website: String,
}

impl CompanyStep {
    fn is_valid(&self) -> bool {
        if !(filled(&self.company_name)
            && filled(&self.legal_address)
            && filled(&self.registration_number)
            && filled(&self.project_nature))
        {
            return false;
        }
        if !is_registration_date(&self.registration_date) {
            return false;
        }
        if self.project_nature == OTHER_NATURE && !filled(&self.project_nature_other) {
            return false;
        }
        let website = self.website.trim();
        website.is_empty() || Url::parse(website).is_ok()
    }

    fn nature(&self) -> &str {
        if self.project_nature == OTHER_NATURE {
            self.project_nature_other.trim()
        } else {
            self.project_nature.trim()
        }
    }
}

/// Step 3. Countries of the beneficial owner, director and shareholder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct OwnershipStep {
    pub ubo_country_citizenship: String,
    pub ubo_country_residence: String,
    pub director_country_citizenship: String,
    pub director_country_residence: String,
    pub shareholder_country_citizenship: String,
    pub shareholder_country_residence: String,
}

impl OwnershipStep {
    fn columns(&self) -> [(&'static str, &str); 6] {
        [
            ("ubo_country_citizenship", &self.ubo_country_citizenship),
            ("ubo_country_residence", &self.ubo_country_residence),
            ("director_country_citizenship", &self.director_country_citizenship),
            ("director_country_residence", &self.director_country_residence),
            ("shareholder_country_citizenship", &self.shareholder_country_citizenship),
            ("shareholder_country_residence", &self.shareholder_country_residence),
        ]
    }

    fn is_valid(&self) -> bool {
        self.columns().iter().all(|(_, v)| filled(v))
    }
}

/// A yes/no question answered with "no" or with attached files.
#[derive(Debug, Clone, Default)]
pub struct HistoryAnswer {
    /// Applicant answered "no".
    pub answered_no: bool,
    /// Attached files.
    pub files: Vec<UploadFile>,
}

impl HistoryAnswer {
    fn is_valid(&self) -> bool {
        self.answered_no || !self.files.is_empty()
    }

    fn status(&self) -> &'static str {
        if self.files.is_empty() {
            NO
        } else {
            YES
        }
    }
}

/// Step 4.
#[derive(Debug, Clone, Default)]
pub struct ProcessingStep {
    /// Processing URLs.
    pub urls: String,
    /// Prior processing history.
    pub processing_history: HistoryAnswer,
    /// Chargeback statistics.
    pub chargeback_statistics: HistoryAnswer,
}

impl ProcessingStep {
    fn is_valid(&self) -> bool {
        filled(&self.urls)
            && self.processing_history.is_valid()
            && self.chargeback_statistics.is_valid()
    }
}

/// One document slot of step 5.
#[derive(Debug, Clone, Default)]
pub struct DocumentSlot {
    /// Attached files.
    pub files: Vec<UploadFile>,
    /// Applicant's note.
    pub comment: String,
    /// Applicant has no such document.
    pub no_document: bool,
}

impl DocumentSlot {
    fn is_valid(&self) -> bool {
        self.no_document || !self.files.is_empty()
    }

    /// `YES`/`NO`, followed by the comment when there is one.
    fn status(&self) -> String {
        let status = if self.files.is_empty() { NO } else { YES };
        match self.comment.trim() {
            "" => status.to_string(),
            comment => format!("{} ({})", status, comment),
        }
    }
}

/// Step 5. One slot per [`DOCUMENT_KINDS`] entry.
#[derive(Debug, Clone, Default)]
pub struct DocumentsStep {
    /// Slots in kind order.
    pub slots: [DocumentSlot; 11],
}

impl DocumentsStep {
    /// Slot of a document kind.
    pub fn slot_mut(&mut self, kind: &str) -> Option<&mut DocumentSlot> {
        let slot = DOCUMENT_KINDS.iter().position(|k| *k == kind)?;
        self.slots.get_mut(slot)
    }

    fn is_valid(&self) -> bool {
        self.slots.iter().all(DocumentSlot::is_valid)
    }
}

/// Onboarding form state.
#[derive(Debug, Clone, Default)]
pub struct OnboardingWizard {
    current_step: usize,
    /// Step 1.
    pub contacts: ContactStep,
    /// Step 2.
    pub company: CompanyStep,
    /// Step 3.
    pub ownership: OwnershipStep,
    /// Step 4.
    pub processing: ProcessingStep,
    /// Step 5.
    pub documents: DocumentsStep,
}

impl OnboardingWizard {
    /// Empty form on the first step.
    pub fn new() -> Self {
        Self::default()
    }

    /// Step titles.
    pub fn step_titles() -> &'static [&'static str] {
        &STEP_TITLES
    }

    /// 0-based current step.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Moves forward, staying on the last step.
    pub fn next_step(&mut self) {
        if self.current_step + 1 < STEP_TITLES.len() {
            self.current_step += 1;
        }
    }

    /// Moves back, staying on the first step.
    pub fn previous_step(&mut self) {
        self.current_step = self.current_step.saturating_sub(1);
    }

    /// True on the first step.
    pub fn is_first_step(&self) -> bool {
        self.current_step == 0
    }

    /// True on the last step.
    pub fn is_last_step(&self) -> bool {
        self.current_step == STEP_TITLES.len() - 1
    }

    /// Validates one step. Unknown steps are invalid.
    pub fn validate_step(&self, step: usize) -> bool {
        match step {
            0 => self.contacts.is_valid(),
            1 => self.company.is_valid(),
            2 => self.ownership.is_valid(),
            3 => self.processing.is_valid(),
            4 => self.documents.is_valid(),
            _ => false,
        }
    }

    /// Index of the first invalid step.
    pub fn first_invalid_step(&self) -> Option<usize> {
        (0..STEP_TITLES.len()).find(|step| !self.validate_step(*step))
    }

    /// Validates every step.
    pub fn validate_form(&self) -> bool {
        self.first_invalid_step().is_none()
    }

    /// Clears every field and returns to the first step.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Flattens the form into submission columns.
    pub fn to_submission(&self, sale_name: &str) -> OnboardingSubmission {
        let contacts = &self.contacts;
        let company = &self.company;
        let processing = &self.processing;

        let mut submission = OnboardingSubmission::new()
            .with("sale_name", sale_name.trim())
            .with("project_name", contacts.project_name.trim())
            .with("telegram_group", contacts.telegram_group.trim());

        for (name, contact) in DEPARTMENTS.iter().zip(contacts.departments.iter()) {
            let values = [
                ("full_name", &contact.full_name),
                ("position", &contact.position),
                ("telegram", &contact.telegram),
                ("email", &contact.email),
            ];
            for (suffix, value) in values {
                let value = if contact.enabled { value.trim() } else { NO };
                submission.set(&format!("{}_{}", name, suffix), value);
            }
        }

        submission.set("comments", contacts.comments.trim());
        submission.set("company_name", company.company_name.trim());
        submission.set("legal_address", company.legal_address.trim());
        submission.set("registration_date", company.registration_date.trim());
        submission.set("registration_number", company.registration_number.trim());
        submission.set("license_jurisdiction", company.license_jurisdiction.trim());
        submission.set("license_number", company.license_number.trim());
        submission.set("project_nature", company.nature());
        submission.set("industries", company.industries.trim());
        submission.set(
            "not_belongs_to_psp",
            if company.not_belong_to_category { YES } else { NO },
        );
        submission.set("website", company.website.trim());

        for (column, value) in self.ownership.columns() {
            submission.set(column, value.trim());
        }

        submission.set("urls", processing.urls.trim());
        submission.set("processing_history", processing.processing_history.status());
        submission.set("chargeback_statistics", processing.chargeback_statistics.status());

        for (kind, slot) in DOCUMENT_KINDS.iter().zip(self.documents.slots.iter()) {
            submission.set(kind, slot.status());
        }

        submission
    }

    /// Every attached file, tagged with its logical type and position.
    pub fn documents(&self) -> Vec<Document> {
        let processing = &self.processing;
        let groups = [
            ("processing_history", &processing.processing_history.files),
            ("chargeback_statistics", &processing.chargeback_statistics.files),
        ]
        .into_iter()
        .chain(
            DOCUMENT_KINDS
                .iter()
                .copied()
                .zip(self.documents.slots.iter().map(|slot| &slot.files)),
        );

        groups
            .flat_map(|(kind, files)| {
                files.iter().enumerate().map(move |(index, file)| Document {
                    logical_type: kind.to_string(),
                    index: index as u32,
                    file: file.clone(),
                })
            })
            .collect()
    }
}

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

/// True for an existing calendar date written as `dd.mm.yyyy`.
pub fn is_registration_date(value: &str) -> bool {
    DATE_PATTERN.is_match(value) && NaiveDate::parse_from_str(value, "%d.%m.%Y").is_ok()
}
