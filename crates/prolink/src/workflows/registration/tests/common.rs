use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::workflows::registration::domain::{
    DocumentToUpload, DocumentType, DraftId, EmailAvailability, RegistrationForm, SessionTokens,
};
use crate::workflows::registration::gateway::{
    DocumentId, DraftGateway, FieldErrors, FinalizeDraftRequest, GatewayError,
    RegistrationResult, RemoteDocument, RemoteDraft, SaveDraftRequest, UploadDocumentRequest,
};
use crate::workflows::registration::service::{RegistrationService, ServiceOptions};
use crate::workflows::registration::store::{KeyValueStore, MemoryStore, StoreError};

pub(super) const REMOTE_DRAFT_ID: DraftId = DraftId(41);

#[derive(Debug, Clone, PartialEq)]
pub(super) enum GatewayCall {
    CheckEmail(String),
    SaveDraft {
        id: Option<DraftId>,
        email: String,
        current_step: u32,
    },
    Upload {
        draft_id: DraftId,
        file_name: String,
    },
    DeleteDocument(DraftId, DocumentId),
    Finalize(DraftId),
}

/// Gateway double that records every call and fails on demand.
#[derive(Default)]
pub(super) struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    saved_forms: Mutex<Vec<RegistrationForm>>,
    email_error: Option<GatewayError>,
    save_error: Option<GatewayError>,
    upload_failures: Mutex<VecDeque<Option<GatewayError>>>,
    finalize_error: Option<GatewayError>,
}

impl RecordingGateway {
    pub(super) fn failing_email_check(error: GatewayError) -> Self {
        Self {
            email_error: Some(error),
            ..Self::default()
        }
    }

    pub(super) fn failing_save(error: GatewayError) -> Self {
        Self {
            save_error: Some(error),
            ..Self::default()
        }
    }

    pub(super) fn failing_finalize(error: GatewayError) -> Self {
        Self {
            finalize_error: Some(error),
            ..Self::default()
        }
    }

    /// Upload outcomes in call order; calls past the end succeed.
    pub(super) fn with_upload_outcomes(outcomes: Vec<Option<GatewayError>>) -> Self {
        Self {
            upload_failures: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    pub(super) fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    pub(super) fn saved_forms(&self) -> Vec<RegistrationForm> {
        self.saved_forms.lock().expect("forms mutex poisoned").clone()
    }

    pub(super) fn uploads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Upload { file_name, .. } => Some(file_name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().expect("calls mutex poisoned").push(call);
    }
}

#[async_trait]
impl DraftGateway for RecordingGateway {
    async fn check_email(&self, email: &str) -> Result<EmailAvailability, GatewayError> {
        self.record(GatewayCall::CheckEmail(email.to_string()));
        match &self.email_error {
            Some(error) => Err(error.clone()),
            None => Ok(EmailAvailability {
                available: email != "taken@x.com",
            }),
        }
    }

    async fn save_draft(&self, request: SaveDraftRequest) -> Result<RemoteDraft, GatewayError> {
        self.record(GatewayCall::SaveDraft {
            id: request.id,
            email: request.email.clone(),
            current_step: request.current_step,
        });
        if let Some(error) = &self.save_error {
            return Err(error.clone());
        }
        self.saved_forms
            .lock()
            .expect("forms mutex poisoned")
            .push(request.form_data);
        Ok(RemoteDraft {
            id: request.id.unwrap_or(REMOTE_DRAFT_ID),
            email: request.email,
            current_step: request.current_step,
        })
    }

    async fn upload_document(
        &self,
        request: UploadDocumentRequest,
    ) -> Result<RemoteDocument, GatewayError> {
        self.record(GatewayCall::Upload {
            draft_id: request.draft_id,
            file_name: request.document.file_name.clone(),
        });
        let outcome = self
            .upload_failures
            .lock()
            .expect("upload mutex poisoned")
            .pop_front()
            .flatten();
        match outcome {
            Some(error) => Err(error),
            None => Ok(RemoteDocument {
                id: DocumentId(self.uploads().len() as i64),
                doc_type: request.document.doc_type,
                file_name: Some(request.document.file_name),
            }),
        }
    }

    async fn delete_document(
        &self,
        draft_id: DraftId,
        document_id: DocumentId,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::DeleteDocument(draft_id, document_id));
        Ok(())
    }

    async fn finalize_draft(
        &self,
        request: FinalizeDraftRequest,
    ) -> Result<RegistrationResult, GatewayError> {
        self.record(GatewayCall::Finalize(request.draft_id));
        if let Some(error) = &self.finalize_error {
            return Err(error.clone());
        }
        Ok(RegistrationResult {
            tokens: SessionTokens {
                access: "access-token".to_string(),
                refresh: "refresh-token".to_string(),
            },
            user: None,
        })
    }
}

/// Store whose writes always fail; reads see whatever was seeded.
#[derive(Default)]
pub(super) struct ReadOnlyStore {
    pub(super) inner: MemoryStore,
}

impl KeyValueStore for ReadOnlyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("quota exceeded".to_string()))
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("quota exceeded".to_string()))
    }
}

pub(super) fn options() -> ServiceOptions {
    ServiceOptions {
        staged_upload_delay: Duration::ZERO,
    }
}

pub(super) fn build_service(
    gateway: RecordingGateway,
) -> (
    RegistrationService<MemoryStore, RecordingGateway>,
    Arc<MemoryStore>,
    Arc<RecordingGateway>,
) {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(gateway);
    let service = RegistrationService::new(store.clone(), gateway.clone(), options());
    (service, store, gateway)
}

pub(super) fn profile_form(email: &str) -> RegistrationForm {
    RegistrationForm {
        email: Some(email.to_string()),
        first_name: Some("Ada".to_string()),
        last_name: Some("Foo".to_string()),
        profession: Some("Physiotherapist".to_string()),
        license_number: Some("PT-20931".to_string()),
        city: Some("Lyon".to_string()),
        ..RegistrationForm::default()
    }
}

pub(super) fn pdf(file_name: &str) -> DocumentToUpload {
    DocumentToUpload::pdf(
        DocumentType::ProfessionalLicense,
        file_name,
        b"%PDF-1.7".to_vec(),
    )
}

pub(super) fn image(file_name: &str) -> DocumentToUpload {
    DocumentToUpload::new(
        DocumentType::IdentityDocument,
        file_name,
        "image/jpeg",
        vec![0xff, 0xd8],
    )
}

pub(super) fn password_mismatch() -> GatewayError {
    GatewayError::Validation(FieldErrors::single(
        "password_confirm",
        "Passwords do not match.",
    ))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
