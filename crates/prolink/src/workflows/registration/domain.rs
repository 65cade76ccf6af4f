use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Step recorded on the remote draft once the form is complete and finalize starts.
pub const READY_FOR_FINALIZE_STEP: u32 = 5;

/// Identifier of the gateway-side draft record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftId(pub i64);

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration fields collected across the form steps.
///
/// Every field is optional so a step can submit only what it edits; `merge`
/// lays a patch over the accumulated values field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profession: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years_of_experience: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
}

fn overlay<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

impl RegistrationForm {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    /// Last write wins per field; fields the patch leaves unset keep their value.
    pub fn merge(&mut self, patch: RegistrationForm) {
        let RegistrationForm {
            email,
            first_name,
            last_name,
            phone,
            profession,
            specialty,
            license_number,
            years_of_experience,
            city,
            postal_code,
            address,
            bio,
            website,
            languages,
        } = patch;

        overlay(&mut self.email, email);
        overlay(&mut self.first_name, first_name);
        overlay(&mut self.last_name, last_name);
        overlay(&mut self.phone, phone);
        overlay(&mut self.profession, profession);
        overlay(&mut self.specialty, specialty);
        overlay(&mut self.license_number, license_number);
        overlay(&mut self.years_of_experience, years_of_experience);
        overlay(&mut self.city, city);
        overlay(&mut self.postal_code, postal_code);
        overlay(&mut self.address, address);
        overlay(&mut self.bio, bio);
        overlay(&mut self.website, website);
        overlay(&mut self.languages, languages);
    }

    pub fn merged(mut self, patch: RegistrationForm) -> Self {
        self.merge(patch);
        self
    }
}

/// The single in-progress registration kept in the durable draft slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDraft {
    pub email: String,
    pub current_step: u32,
    pub form_data: RegistrationForm,
    pub last_saved: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<DraftId>,
}

impl LocalDraft {
    /// Fresh draft at step one carrying only the owner's email.
    pub fn start(email: impl Into<String>, now: DateTime<Utc>) -> Self {
        let email = email.into();
        Self {
            form_data: RegistrationForm::with_email(email.clone()),
            email,
            current_step: 1,
            last_saved: now,
            remote_id: None,
        }
    }

    pub fn belongs_to(&self, email: &str) -> bool {
        self.email == email
    }
}

/// Category tag the gateway files an uploaded document under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    ProfessionalLicense,
    Diploma,
    IdentityDocument,
    Insurance,
    Other,
}

impl DocumentType {
    pub const fn label(self) -> &'static str {
        match self {
            DocumentType::ProfessionalLicense => "professional_license",
            DocumentType::Diploma => "diploma",
            DocumentType::IdentityDocument => "identity_document",
            DocumentType::Insurance => "insurance",
            DocumentType::Other => "other",
        }
    }
}

/// A file attached in the form, held in memory until finalize consumes it.
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentToUpload {
    pub doc_type: DocumentType,
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl DocumentToUpload {
    pub fn new(
        doc_type: DocumentType,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            doc_type,
            file_name: file_name.into(),
            content_type: content_type.into(),
            content,
        }
    }

    pub fn pdf(doc_type: DocumentType, file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self::new(
            doc_type,
            file_name,
            mime::APPLICATION_PDF.essence_str(),
            content,
        )
    }

    /// Media-type check only; parameters such as `charset` are ignored.
    pub fn is_pdf(&self) -> bool {
        self.content_type
            .trim()
            .parse::<mime::Mime>()
            .map(|parsed| {
                parsed
                    .essence_str()
                    .eq_ignore_ascii_case(mime::APPLICATION_PDF.essence_str())
            })
            .unwrap_or(false)
    }
}

impl fmt::Debug for DocumentToUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentToUpload")
            .field("doc_type", &self.doc_type)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("bytes", &self.content.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAvailability {
    pub available: bool,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access: String,
    pub refresh: String,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens").finish_non_exhaustive()
    }
}

/// Snapshot of what the form pages render: the draft plus busy and error flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistrationState {
    pub local_draft: Option<LocalDraft>,
    pub is_saving: bool,
    pub is_uploading: bool,
    pub is_finalizing: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_saved: Option<DateTime<Utc>>,
}
