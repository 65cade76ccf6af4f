use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{
    DocumentToUpload, DocumentType, DraftId, EmailAvailability, RegistrationForm, SessionTokens,
};

/// Remote service owning draft records, document storage, and account creation.
///
/// Implementations are expected to upsert drafts by id/email so a failed finalize
/// can be retried from the top without duplicating records.
#[async_trait]
pub trait DraftGateway: Send + Sync {
    async fn check_email(&self, email: &str) -> Result<EmailAvailability, GatewayError>;
    async fn save_draft(&self, request: SaveDraftRequest) -> Result<RemoteDraft, GatewayError>;
    async fn upload_document(
        &self,
        request: UploadDocumentRequest,
    ) -> Result<RemoteDocument, GatewayError>;
    async fn delete_document(
        &self,
        draft_id: DraftId,
        document_id: DocumentId,
    ) -> Result<(), GatewayError>;
    async fn finalize_draft(
        &self,
        request: FinalizeDraftRequest,
    ) -> Result<RegistrationResult, GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub i64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveDraftRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DraftId>,
    pub email: String,
    pub current_step: u32,
    pub form_data: RegistrationForm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDraft {
    pub id: DraftId,
    pub email: String,
    #[serde(default)]
    pub current_step: u32,
}

#[derive(Debug, Clone)]
pub struct UploadDocumentRequest {
    pub draft_id: DraftId,
    pub email: String,
    pub document: DocumentToUpload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: DocumentId,
    pub doc_type: DocumentType,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Clone, Serialize)]
pub struct FinalizeDraftRequest {
    pub draft_id: DraftId,
    pub password: String,
    pub password_confirm: String,
}

impl fmt::Debug for FinalizeDraftRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizeDraftRequest")
            .field("draft_id", &self.draft_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub id: i64,
    pub email: String,
}

/// Credentials issued for the newly created account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub tokens: SessionTokens,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<RegisteredUser>,
}

/// Field-keyed validation messages as reported by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.into(), vec![message.into()]);
        Self(errors)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    /// Every message in field order, field names dropped.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.0.values().flatten().map(String::as_str)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut messages = self.messages();
        if let Some(first) = messages.next() {
            f.write_str(first)?;
        }
        for message in messages {
            write!(f, "; {message}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("validation failed: {0}")]
    Validation(FieldErrors),
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
    #[error("unexpected response payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_errors_flatten_in_field_order() {
        let mut map = BTreeMap::new();
        map.insert("password".to_string(), vec!["Passwords do not match.".to_string()]);
        map.insert(
            "email".to_string(),
            vec!["Enter a valid email.".to_string(), "Already taken.".to_string()],
        );
        let errors = FieldErrors(map);

        let messages: Vec<&str> = errors.messages().collect();
        assert_eq!(
            messages,
            vec![
                "Enter a valid email.",
                "Already taken.",
                "Passwords do not match."
            ]
        );
    }

    #[test]
    fn empty_lists_count_as_empty() {
        let mut map = BTreeMap::new();
        map.insert("email".to_string(), Vec::new());
        assert!(FieldErrors(map).is_empty());
        assert!(!FieldErrors::single("email", "taken").is_empty());
    }

    #[test]
    fn validation_display_lists_messages() {
        let err = GatewayError::Validation(FieldErrors::single(
            "password_confirm",
            "Passwords do not match.",
        ));
        let rendered = err.to_string();
        assert_eq!(rendered, "validation failed: Passwords do not match.");
        assert!(!rendered.contains("FieldErrors"));
    }

    #[test]
    fn finalize_request_hides_passwords() {
        let request = FinalizeDraftRequest {
            draft_id: DraftId(7),
            password: "Abc12345".to_string(),
            password_confirm: "Abc12345".to_string(),
        };
        let rendered = format!("{request:?}");
        assert!(rendered.contains("draft_id"));
        assert!(!rendered.contains("Abc12345"));
    }
}
