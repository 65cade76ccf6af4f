//! Professional registration draft workflow.
//!
//! A registration is collected over several form steps into a local draft that
//! survives reloads, then committed in one ordered finalize sequence against the
//! remote draft gateway. The service owns the draft; storage and the gateway are
//! injected so each can be swapped for an in-memory fake.

pub mod domain;
pub mod gateway;
pub mod http;
pub mod router;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use domain::{
    DocumentToUpload, DocumentType, DraftId, EmailAvailability, LocalDraft, RegistrationForm,
    RegistrationState, SessionTokens, READY_FOR_FINALIZE_STEP,
};
pub use gateway::{
    DocumentId, DraftGateway, FieldErrors, FinalizeDraftRequest, GatewayError,
    RegisteredUser, RegistrationResult, RemoteDocument, RemoteDraft, SaveDraftRequest,
    UploadDocumentRequest,
};
pub use http::HttpDraftGateway;
pub use router::registration_router;
pub use service::{
    RegistrationError, RegistrationService, RemoteStage, SaveStatus, ServiceOptions,
};
pub use store::{
    DraftStore, FileStore, KeyValueStore, MemoryStore, SessionStore, StoreError,
    DEFAULT_DRAFT_STORAGE_KEY,
};
