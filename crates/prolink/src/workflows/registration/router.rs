use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{DocumentToUpload, DocumentType, LocalDraft, RegistrationForm};
use super::gateway::{DocumentId, DraftGateway, GatewayError};
use super::service::{RegistrationError, RegistrationService, SaveStatus};
use super::store::KeyValueStore;

#[derive(Debug, Deserialize)]
pub(crate) struct EmailPayload {
    pub(crate) email: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StagedDocumentPayload {
    pub(crate) doc_type: DocumentType,
    pub(crate) file_name: String,
    pub(crate) content_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocumentPayload {
    pub(crate) doc_type: DocumentType,
    pub(crate) file_name: String,
    pub(crate) content_type: String,
    pub(crate) content_base64: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FinalizePayload {
    pub(crate) form_data: RegistrationForm,
    pub(crate) password: String,
    pub(crate) password_confirm: String,
    #[serde(default)]
    pub(crate) documents: Vec<DocumentPayload>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SaveResponse {
    saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    draft: Option<LocalDraft>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<SaveStatus> for SaveResponse {
    fn from(status: SaveStatus) -> Self {
        match status {
            SaveStatus::Saved(draft) => Self {
                saved: true,
                draft: Some(draft),
                reason: None,
            },
            SaveStatus::Failed { reason } => Self {
                saved: false,
                draft: None,
                reason: Some(reason),
            },
        }
    }
}

/// Router exposing the registration draft operations to the form pages.
pub fn registration_router<S, G>(service: Arc<RegistrationService<S, G>>) -> Router
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    Router::new()
        .route(
            "/api/v1/registration/draft",
            post(init_handler::<S, G>)
                .get(load_handler::<S, G>)
                .delete(clear_handler::<S, G>),
        )
        .route(
            "/api/v1/registration/draft/steps/:step",
            put(save_handler::<S, G>),
        )
        .route("/api/v1/registration/state", get(state_handler::<S, G>))
        .route(
            "/api/v1/registration/email-availability",
            post(check_email_handler::<S, G>),
        )
        .route(
            "/api/v1/registration/documents",
            post(stage_document_handler::<S, G>),
        )
        .route(
            "/api/v1/registration/documents/:document_id",
            delete(remove_document_handler::<S, G>),
        )
        .route(
            "/api/v1/registration/finalize",
            post(finalize_handler::<S, G>),
        )
        .with_state(service)
}

pub(crate) async fn init_handler<S, G>(
    State(service): State<Arc<RegistrationService<S, G>>>,
    axum::Json(payload): axum::Json<EmailPayload>,
) -> Response
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    let draft = service.init_local_draft(payload.email.trim());
    (StatusCode::OK, axum::Json(draft)).into_response()
}

pub(crate) async fn load_handler<S, G>(
    State(service): State<Arc<RegistrationService<S, G>>>,
) -> Response
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    match service.load_from_local() {
        Some(draft) => (StatusCode::OK, axum::Json(draft)).into_response(),
        None => {
            let payload = json!({ "error": "no registration draft in progress" });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn clear_handler<S, G>(
    State(service): State<Arc<RegistrationService<S, G>>>,
) -> StatusCode
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    service.clear_local_draft();
    StatusCode::NO_CONTENT
}

pub(crate) async fn save_handler<S, G>(
    State(service): State<Arc<RegistrationService<S, G>>>,
    Path(step): Path<u32>,
    axum::Json(patch): axum::Json<RegistrationForm>,
) -> Response
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    let status = service.save_to_local(step, patch);
    (StatusCode::OK, axum::Json(SaveResponse::from(status))).into_response()
}

pub(crate) async fn state_handler<S, G>(
    State(service): State<Arc<RegistrationService<S, G>>>,
) -> Response
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    (StatusCode::OK, axum::Json(service.state())).into_response()
}

pub(crate) async fn check_email_handler<S, G>(
    State(service): State<Arc<RegistrationService<S, G>>>,
    axum::Json(payload): axum::Json<EmailPayload>,
) -> Response
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    let availability = service.check_email(payload.email.trim()).await;
    (StatusCode::OK, axum::Json(availability)).into_response()
}

pub(crate) async fn stage_document_handler<S, G>(
    State(service): State<Arc<RegistrationService<S, G>>>,
    axum::Json(payload): axum::Json<StagedDocumentPayload>,
) -> Response
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    let document = DocumentToUpload::new(
        payload.doc_type,
        payload.file_name,
        payload.content_type,
        Vec::new(),
    );
    service.upload_document(&document).await;
    let body = json!({
        "staged": true,
        "doc_type": document.doc_type.label(),
        "file_name": document.file_name,
    });
    (StatusCode::ACCEPTED, axum::Json(body)).into_response()
}

pub(crate) async fn remove_document_handler<S, G>(
    State(service): State<Arc<RegistrationService<S, G>>>,
    Path(document_id): Path<i64>,
) -> Response
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    match service.remove_document(DocumentId(document_id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn finalize_handler<S, G>(
    State(service): State<Arc<RegistrationService<S, G>>>,
    axum::Json(payload): axum::Json<FinalizePayload>,
) -> Response
where
    S: KeyValueStore + 'static,
    G: DraftGateway + 'static,
{
    let FinalizePayload {
        form_data,
        password,
        password_confirm,
        documents,
    } = payload;

    let mut decoded = Vec::with_capacity(documents.len());
    for document in documents {
        let content = match STANDARD.decode(document.content_base64.as_bytes()) {
            Ok(content) => content,
            Err(err) => {
                let payload = json!({
                    "error": format!("\"{}\" is not valid base64: {err}", document.file_name),
                });
                return (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response();
            }
        };
        decoded.push(DocumentToUpload::new(
            document.doc_type,
            document.file_name,
            document.content_type,
            content,
        ));
    }

    match service
        .finalize_registration(form_data, &password, &password_confirm, decoded)
        .await
    {
        Ok(result) => (StatusCode::CREATED, axum::Json(result)).into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &RegistrationError) -> Response {
    let status = match err {
        RegistrationError::NotPdf { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RegistrationError::NoRemoteDraft => StatusCode::CONFLICT,
        _ => match err.gateway_error() {
            Some(GatewayError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(GatewayError::Status { status, .. }) if *status == 404 => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_GATEWAY,
        },
    };
    let payload = json!({ "error": err.display_message() });
    (status, axum::Json(payload)).into_response()
}
