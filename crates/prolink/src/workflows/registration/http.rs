use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::domain::{DraftId, EmailAvailability};
use super::gateway::{
    DocumentId, DraftGateway, FieldErrors, FinalizeDraftRequest, GatewayError,
    RegistrationResult, RemoteDocument, RemoteDraft, SaveDraftRequest, UploadDocumentRequest,
};

/// REST client for the practitioner draft endpoints.
#[derive(Debug, Clone)]
pub struct HttpDraftGateway {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct CheckEmailBody<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct FinalizeBody<'a> {
    password: &'a str,
    password_confirm: &'a str,
}

impl HttpDraftGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl DraftGateway for HttpDraftGateway {
    async fn check_email(&self, email: &str) -> Result<EmailAvailability, GatewayError> {
        let response = self
            .http
            .post(self.url("auth/check-email/"))
            .json(&CheckEmailBody { email })
            .send()
            .await?;
        read_json(response).await
    }

    async fn save_draft(&self, request: SaveDraftRequest) -> Result<RemoteDraft, GatewayError> {
        let builder = match request.id {
            Some(id) => self.http.put(self.url(&format!("practitioner-drafts/{id}/"))),
            None => self.http.post(self.url("practitioner-drafts/")),
        };
        debug!(draft_id = ?request.id, step = request.current_step, "saving remote draft");
        let response = builder.json(&request).send().await?;
        read_json(response).await
    }

    async fn upload_document(
        &self,
        request: UploadDocumentRequest,
    ) -> Result<RemoteDocument, GatewayError> {
        let UploadDocumentRequest {
            draft_id,
            email,
            document,
        } = request;
        debug!(
            %draft_id,
            doc_type = document.doc_type.label(),
            file = %document.file_name,
            "uploading draft document"
        );

        let file = Part::bytes(document.content)
            .file_name(document.file_name)
            .mime_str(&document.content_type)?;
        let form = Form::new()
            .text("draft_id", draft_id.to_string())
            .text("email", email)
            .text("doc_type", document.doc_type.label())
            .part("file", file);

        let response = self
            .http
            .post(self.url(&format!("practitioner-drafts/{draft_id}/documents/")))
            .multipart(form)
            .send()
            .await?;
        read_json(response).await
    }

    async fn delete_document(
        &self,
        draft_id: DraftId,
        document_id: DocumentId,
    ) -> Result<(), GatewayError> {
        let response = self
            .http
            .delete(self.url(&format!(
                "practitioner-drafts/{draft_id}/documents/{document_id}/"
            )))
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    async fn finalize_draft(
        &self,
        request: FinalizeDraftRequest,
    ) -> Result<RegistrationResult, GatewayError> {
        let draft_id = request.draft_id;
        let response = self
            .http
            .post(self.url(&format!("practitioner-drafts/{draft_id}/finalize/")))
            .json(&FinalizeBody {
                password: &request.password,
                password_confirm: &request.password_confirm,
            })
            .send()
            .await?;
        read_json(response).await
    }
}

async fn ensure_success(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status.as_u16(), &body))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let response = ensure_success(response).await?;
    response.json::<T>().await.map_err(GatewayError::from)
}

/// Classifies an error body. A JSON object on a 4xx is a validation error even
/// when it carries no messages; a lone `detail` is a status error. Bodies that
/// are not JSON objects are never shown verbatim.
pub(crate) fn error_from_body(status: u16, body: &str) -> GatewayError {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return status_only(status);
    };

    let detail = map.get("detail").and_then(Value::as_str);
    if let (Some(detail), 1) = (detail, map.len()) {
        return GatewayError::Status {
            status,
            message: detail.to_string(),
        };
    }
    if !(400..500).contains(&status) {
        return status_only(status);
    }

    let mut fields = BTreeMap::new();
    for (field, value) in &map {
        let mut messages = Vec::new();
        collect_messages(value, &mut messages);
        if !messages.is_empty() {
            fields.insert(field.clone(), messages);
        }
    }
    GatewayError::Validation(FieldErrors(fields))
}

fn status_only(status: u16) -> GatewayError {
    GatewayError::Status {
        status,
        message: format!("request failed with status {status}"),
    }
}

fn collect_messages(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(message) => out.push(message.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_messages(item, out)),
        Value::Object(nested) => nested.values().for_each(|item| collect_messages(item, out)),
        _ => {}
    }
}
