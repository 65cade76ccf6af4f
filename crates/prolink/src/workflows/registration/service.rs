use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::domain::{
    DocumentToUpload, DraftId, EmailAvailability, LocalDraft, RegistrationForm,
    RegistrationState, READY_FOR_FINALIZE_STEP,
};
use super::gateway::{
    DocumentId, DraftGateway, FinalizeDraftRequest, GatewayError, RegistrationResult,
    SaveDraftRequest, UploadDocumentRequest,
};
use super::store::{DraftStore, KeyValueStore, SessionStore};

const DEFAULT_STAGED_UPLOAD_DELAY: Duration = Duration::from_millis(500);
const GENERIC_GATEWAY_MESSAGE: &str = "Unable to reach the registration service";

/// Tunables for the registration service.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// How long the staged upload keeps `is_uploading` raised.
    pub staged_upload_delay: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            staged_upload_delay: DEFAULT_STAGED_UPLOAD_DELAY,
        }
    }
}

/// Outcome of a local save. Saving never blocks the form, so failures are
/// reported here instead of raised.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveStatus {
    Saved(LocalDraft),
    Failed { reason: String },
}

impl SaveStatus {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveStatus::Saved(_))
    }

    pub fn draft(&self) -> Option<&LocalDraft> {
        match self {
            SaveStatus::Saved(draft) => Some(draft),
            SaveStatus::Failed { .. } => None,
        }
    }
}

/// Gateway call a remote failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStage {
    SaveDraft,
    Finalize,
    DeleteDocument,
}

impl RemoteStage {
    pub const fn label(self) -> &'static str {
        match self {
            RemoteStage::SaveDraft => "saving the draft",
            RemoteStage::Finalize => "finalizing the registration",
            RemoteStage::DeleteDocument => "deleting the document",
        }
    }
}

impl fmt::Display for RemoteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("\"{file_name}\" is not a PDF; only PDF documents can be uploaded")]
    NotPdf { file_name: String },
    #[error("no remote draft exists for the current registration")]
    NoRemoteDraft,
    #[error("uploading \"{file_name}\" failed: {source}")]
    Upload {
        file_name: String,
        #[source]
        source: GatewayError,
    },
    #[error("{stage} failed: {source}")]
    Remote {
        stage: RemoteStage,
        #[source]
        source: GatewayError,
    },
}

impl RegistrationError {
    /// Message shown to the user in the `error` state field.
    pub fn display_message(&self) -> String {
        match self {
            RegistrationError::NotPdf { .. } | RegistrationError::NoRemoteDraft => self.to_string(),
            RegistrationError::Upload { file_name, source } => {
                format!("{file_name}: {}", gateway_message(source))
            }
            RegistrationError::Remote { source, .. } => gateway_message(source),
        }
    }

    pub fn gateway_error(&self) -> Option<&GatewayError> {
        match self {
            RegistrationError::Upload { source, .. } | RegistrationError::Remote { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

fn gateway_message(error: &GatewayError) -> String {
    match error {
        GatewayError::Validation(fields) if fields.is_empty() => {
            GENERIC_GATEWAY_MESSAGE.to_string()
        }
        GatewayError::Validation(fields) => fields.to_string(),
        GatewayError::Status { message, .. }
        | GatewayError::Transport(message)
        | GatewayError::Decode(message) => message.clone(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}

/// Owns the local registration draft and drives the finalize sequence.
pub struct RegistrationService<S, G> {
    drafts: DraftStore<S>,
    sessions: SessionStore<S>,
    gateway: Arc<G>,
    options: ServiceOptions,
    state: watch::Sender<RegistrationState>,
}

impl<S, G> RegistrationService<S, G>
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    /// Draft and session slots share one backing store.
    pub fn new(store: Arc<S>, gateway: Arc<G>, options: ServiceOptions) -> Self {
        Self::with_stores(
            DraftStore::new(store.clone()),
            SessionStore::new(store),
            gateway,
            options,
        )
    }

    pub fn with_stores(
        drafts: DraftStore<S>,
        sessions: SessionStore<S>,
        gateway: Arc<G>,
        options: ServiceOptions,
    ) -> Self {
        let (state, _) = watch::channel(RegistrationState::default());
        Self {
            drafts,
            sessions,
            gateway,
            options,
            state,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrationState> {
        self.state.subscribe()
    }

    fn update(&self, apply: impl FnOnce(&mut RegistrationState)) {
        self.state.send_modify(apply);
    }

    /// Resume the stored draft when it belongs to `email`, otherwise replace it
    /// with a fresh step-one draft. Never touches the gateway.
    pub fn init_local_draft(&self, email: &str) -> LocalDraft {
        let (draft, persisted) = match self.drafts.load() {
            Some(existing) if existing.belongs_to(email) => {
                info!(step = existing.current_step, "resuming registration draft");
                (existing, true)
            }
            previous => {
                if previous.is_some() {
                    info!("replacing registration draft owned by another email");
                }
                let fresh = LocalDraft::start(email, Utc::now());
                let persisted = match self.drafts.save(&fresh) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(error = %err, "failed to persist new registration draft");
                        false
                    }
                };
                info!("started registration draft");
                (fresh, persisted)
            }
        };

        self.update(|state| {
            state.last_saved = persisted.then_some(draft.last_saved);
            state.local_draft = Some(draft.clone());
        });
        draft
    }

    /// Merge `patch` over the stored draft and persist it at `step`.
    pub fn save_to_local(&self, step: u32, patch: RegistrationForm) -> SaveStatus {
        self.save_to_local_then(step, patch, |_| {})
    }

    /// Like [`save_to_local`](Self::save_to_local); `on_saved` runs only when
    /// the draft was persisted.
    pub fn save_to_local_then(
        &self,
        step: u32,
        patch: RegistrationForm,
        on_saved: impl FnOnce(&LocalDraft),
    ) -> SaveStatus {
        self.update(|state| state.is_saving = true);

        let existing = self.drafts.load();
        let email = non_empty(patch.email.clone())
            .or_else(|| existing.as_ref().map(|draft| draft.email.clone()))
            .unwrap_or_default();
        let (mut form_data, remote_id) = match existing {
            Some(draft) => (draft.form_data, draft.remote_id),
            None => (RegistrationForm::default(), None),
        };
        form_data.merge(patch);

        let draft = LocalDraft {
            email,
            current_step: step.max(1),
            form_data,
            last_saved: Utc::now(),
            remote_id,
        };

        match self.drafts.save(&draft) {
            Ok(()) => {
                debug!(step = draft.current_step, "registration step saved");
                self.update(|state| {
                    state.is_saving = false;
                    state.last_saved = Some(draft.last_saved);
                    state.local_draft = Some(draft.clone());
                });
                on_saved(&draft);
                SaveStatus::Saved(draft)
            }
            Err(err) => {
                warn!(step, error = %err, "failed to save registration step");
                self.update(|state| state.is_saving = false);
                SaveStatus::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn load_from_local(&self) -> Option<LocalDraft> {
        self.drafts.load()
    }

    pub fn clear_local_draft(&self) {
        if let Err(err) = self.drafts.clear() {
            warn!(error = %err, "failed to remove stored registration draft");
        }
        self.update(|state| {
            state.local_draft = None;
            state.last_saved = None;
        });
    }

    /// Availability check that fails open: an unreachable gateway reports the
    /// email as available and finalize rejects duplicates authoritatively.
    pub async fn check_email(&self, email: &str) -> EmailAvailability {
        self.update(|state| state.is_loading = true);
        let availability = match self.gateway.check_email(email).await {
            Ok(availability) => availability,
            Err(err) => {
                warn!(error = %err, "email availability check failed; treating as available");
                EmailAvailability { available: true }
            }
        };
        self.update(|state| state.is_loading = false);
        availability
    }

    /// Staged upload: only signals progress. Files are transmitted during
    /// finalize so no remote state exists before the user commits.
    pub async fn upload_document(&self, document: &DocumentToUpload) {
        self.update(|state| state.is_uploading = true);
        debug!(
            doc_type = document.doc_type.label(),
            file = %document.file_name,
            "document staged for finalize"
        );
        tokio::time::sleep(self.options.staged_upload_delay).await;
        self.update(|state| state.is_uploading = false);
    }

    /// Delete a document already attached to the remote draft record.
    pub async fn remove_document(&self, document_id: DocumentId) -> Result<(), RegistrationError> {
        let draft_id = self.remote_id().ok_or(RegistrationError::NoRemoteDraft)?;

        self.update(|state| {
            state.is_loading = true;
            state.error = None;
        });
        let outcome = self
            .gateway
            .delete_document(draft_id, document_id)
            .await
            .map_err(|source| RegistrationError::Remote {
                stage: RemoteStage::DeleteDocument,
                source,
            });

        let message = outcome.as_ref().err().map(RegistrationError::display_message);
        self.update(|state| {
            state.is_loading = false;
            state.error = message;
        });
        outcome
    }

    /// Commit the registration: save the remote draft, upload every document in
    /// order, then finalize with the password pair.
    ///
    /// Nothing is rolled back on failure. The remote draft and any uploaded
    /// documents stay in place and the local draft is kept, so calling this
    /// again resumes against the same remote record.
    pub async fn finalize_registration(
        &self,
        form_data: RegistrationForm,
        password: &str,
        password_confirm: &str,
        documents: Vec<DocumentToUpload>,
    ) -> Result<RegistrationResult, RegistrationError> {
        self.update(|state| {
            state.is_finalizing = true;
            state.error = None;
        });

        let outcome = self
            .run_finalize(form_data, password, password_confirm, documents)
            .await;

        let message = match &outcome {
            Ok(_) => None,
            Err(err) => {
                error!(error = %err, "registration finalize aborted");
                Some(err.display_message())
            }
        };
        self.update(|state| {
            state.is_finalizing = false;
            state.is_saving = false;
            state.is_uploading = false;
            state.error = message;
        });
        outcome
    }

    async fn run_finalize(
        &self,
        form_data: RegistrationForm,
        password: &str,
        password_confirm: &str,
        documents: Vec<DocumentToUpload>,
    ) -> Result<RegistrationResult, RegistrationError> {
        // Rejected before any network call so no partial remote state is created.
        if let Some(document) = documents.iter().find(|document| !document.is_pdf()) {
            return Err(RegistrationError::NotPdf {
                file_name: document.file_name.clone(),
            });
        }

        let email = non_empty(form_data.email.clone())
            .or_else(|| self.current_draft().map(|draft| draft.email))
            .unwrap_or_default();

        self.update(|state| state.is_saving = true);
        let remote = self
            .gateway
            .save_draft(SaveDraftRequest {
                id: self.remote_id(),
                email: email.clone(),
                current_step: READY_FOR_FINALIZE_STEP,
                form_data,
            })
            .await
            .map_err(|source| RegistrationError::Remote {
                stage: RemoteStage::SaveDraft,
                source,
            })?;
        self.update(|state| state.is_saving = false);
        self.remember_remote_id(remote.id);
        info!(draft_id = %remote.id, "remote draft saved");

        self.update(|state| state.is_uploading = true);
        let total = documents.len();
        for (index, document) in documents.into_iter().enumerate() {
            let file_name = document.file_name.clone();
            self.gateway
                .upload_document(UploadDocumentRequest {
                    draft_id: remote.id,
                    email: email.clone(),
                    document,
                })
                .await
                .map_err(|source| RegistrationError::Upload {
                    file_name: file_name.clone(),
                    source,
                })?;
            debug!(file = %file_name, position = index + 1, total, "document uploaded");
        }
        self.update(|state| state.is_uploading = false);

        let result = self
            .gateway
            .finalize_draft(FinalizeDraftRequest {
                draft_id: remote.id,
                password: password.to_string(),
                password_confirm: password_confirm.to_string(),
            })
            .await
            .map_err(|source| RegistrationError::Remote {
                stage: RemoteStage::Finalize,
                source,
            })?;

        if let Err(err) = self.sessions.persist(&result.tokens) {
            warn!(error = %err, "failed to persist session tokens");
        }
        self.clear_local_draft();
        info!(draft_id = %remote.id, "registration finalized");
        Ok(result)
    }

    fn current_draft(&self) -> Option<LocalDraft> {
        let in_memory = self.state.borrow().local_draft.clone();
        in_memory.or_else(|| self.drafts.load())
    }

    fn remote_id(&self) -> Option<DraftId> {
        self.current_draft().and_then(|draft| draft.remote_id)
    }

    fn remember_remote_id(&self, remote_id: DraftId) {
        let Some(mut draft) = self.current_draft() else {
            return;
        };
        if draft.remote_id == Some(remote_id) {
            return;
        }

        draft.remote_id = Some(remote_id);
        if let Err(err) = self.drafts.save(&draft) {
            warn!(error = %err, "failed to record remote draft id locally");
        }
        self.update(|state| state.local_draft = Some(draft));
    }
}
