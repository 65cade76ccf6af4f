use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use prolink::workflows::registration::{
    DocumentId, DraftGateway, DraftId, EmailAvailability, FieldErrors, FinalizeDraftRequest,
    GatewayError, RegisteredUser, RegistrationForm, RegistrationResult, RemoteDocument,
    RemoteDraft, SaveDraftRequest, SessionTokens, UploadDocumentRequest,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone)]
struct StoredDraft {
    email: String,
    current_step: u32,
    form_data: RegistrationForm,
    documents: Vec<RemoteDocument>,
}

#[derive(Debug, Default)]
struct Ledger {
    last_draft_id: i64,
    last_document_id: i64,
    drafts: HashMap<DraftId, StoredDraft>,
    accounts: HashSet<String>,
}

/// Process-local stand-in for the practitioner draft backend, used by the demo.
#[derive(Default, Clone)]
pub(crate) struct InMemoryDraftGateway {
    ledger: Arc<Mutex<Ledger>>,
}

impl InMemoryDraftGateway {
    pub(crate) fn with_accounts<I, E>(emails: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        let gateway = Self::default();
        if let Ok(mut ledger) = gateway.ledger.lock() {
            ledger.accounts = emails
                .into_iter()
                .map(|email| email.into().to_ascii_lowercase())
                .collect();
        }
        gateway
    }

    pub(crate) fn draft_documents(&self, id: DraftId) -> Vec<RemoteDocument> {
        self.lock()
            .ok()
            .and_then(|ledger| ledger.drafts.get(&id).map(|draft| draft.documents.clone()))
            .unwrap_or_default()
    }

    pub(crate) fn draft_form(&self, id: DraftId) -> Option<(u32, RegistrationForm)> {
        let ledger = self.lock().ok()?;
        ledger
            .drafts
            .get(&id)
            .map(|draft| (draft.current_step, draft.form_data.clone()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>, GatewayError> {
        self.ledger.lock().map_err(|_| GatewayError::Status {
            status: 500,
            message: "draft ledger unavailable".to_string(),
        })
    }
}

fn not_found() -> GatewayError {
    GatewayError::Status {
        status: 404,
        message: "Not found.".to_string(),
    }
}

#[async_trait]
impl DraftGateway for InMemoryDraftGateway {
    async fn check_email(&self, email: &str) -> Result<EmailAvailability, GatewayError> {
        let ledger = self.lock()?;
        Ok(EmailAvailability {
            available: !ledger.accounts.contains(&email.to_ascii_lowercase()),
        })
    }

    async fn save_draft(&self, request: SaveDraftRequest) -> Result<RemoteDraft, GatewayError> {
        if !request.email.contains('@') {
            return Err(GatewayError::Validation(FieldErrors::single(
                "email",
                "Enter a valid email address.",
            )));
        }

        let mut ledger = self.lock()?;
        let existing = match request.id {
            Some(id) if ledger.drafts.contains_key(&id) => Some(id),
            Some(_) => return Err(not_found()),
            None => ledger
                .drafts
                .iter()
                .find(|(_, draft)| draft.email.eq_ignore_ascii_case(&request.email))
                .map(|(id, _)| *id),
        };
        let id = match existing {
            Some(id) => id,
            None => {
                ledger.last_draft_id += 1;
                DraftId(ledger.last_draft_id)
            }
        };

        let documents = ledger
            .drafts
            .remove(&id)
            .map(|draft| draft.documents)
            .unwrap_or_default();
        ledger.drafts.insert(
            id,
            StoredDraft {
                email: request.email.clone(),
                current_step: request.current_step,
                form_data: request.form_data,
                documents,
            },
        );

        Ok(RemoteDraft {
            id,
            email: request.email,
            current_step: request.current_step,
        })
    }

    async fn upload_document(
        &self,
        request: UploadDocumentRequest,
    ) -> Result<RemoteDocument, GatewayError> {
        if !request.document.is_pdf() {
            return Err(GatewayError::Validation(FieldErrors::single(
                "file",
                "Only PDF files are accepted.",
            )));
        }

        let mut ledger = self.lock()?;
        ledger.last_document_id += 1;
        let document = RemoteDocument {
            id: DocumentId(ledger.last_document_id),
            doc_type: request.document.doc_type,
            file_name: Some(request.document.file_name),
        };
        let draft = ledger
            .drafts
            .get_mut(&request.draft_id)
            .ok_or_else(not_found)?;
        draft.documents.push(document.clone());
        Ok(document)
    }

    async fn delete_document(
        &self,
        draft_id: DraftId,
        document_id: DocumentId,
    ) -> Result<(), GatewayError> {
        let mut ledger = self.lock()?;
        let draft = ledger.drafts.get_mut(&draft_id).ok_or_else(not_found)?;
        let before = draft.documents.len();
        draft.documents.retain(|document| document.id != document_id);
        if draft.documents.len() == before {
            return Err(not_found());
        }
        Ok(())
    }

    async fn finalize_draft(
        &self,
        request: FinalizeDraftRequest,
    ) -> Result<RegistrationResult, GatewayError> {
        if request.password != request.password_confirm {
            return Err(GatewayError::Validation(FieldErrors::single(
                "password_confirm",
                "Passwords do not match.",
            )));
        }
        if request.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(GatewayError::Validation(FieldErrors::single(
                "password",
                format!("Password must be at least {MIN_PASSWORD_LENGTH} characters."),
            )));
        }

        let mut ledger = self.lock()?;
        let email = ledger
            .drafts
            .get(&request.draft_id)
            .map(|draft| draft.email.to_ascii_lowercase())
            .ok_or_else(not_found)?;
        if ledger.accounts.contains(&email) {
            return Err(GatewayError::Validation(FieldErrors::single(
                "email",
                "A user with this email already exists.",
            )));
        }

        ledger.drafts.remove(&request.draft_id);
        ledger.accounts.insert(email.clone());
        let issued = Utc::now().timestamp();
        let user_id = ledger.accounts.len() as i64;

        Ok(RegistrationResult {
            tokens: SessionTokens {
                access: format!("local-access-{user_id}-{issued}"),
                refresh: format!("local-refresh-{user_id}-{issued}"),
            },
            user: Some(RegisteredUser { id: user_id, email }),
        })
    }
}
