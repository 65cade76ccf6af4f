use std::collections::BTreeMap;

use super::common::*;
use crate::workflows::registration::domain::READY_FOR_FINALIZE_STEP;
use crate::workflows::registration::gateway::{FieldErrors, GatewayError};
use crate::workflows::registration::service::RegistrationError;
use crate::workflows::registration::store::{KeyValueStore, SessionStore};

#[tokio::test]
async fn successful_finalize_runs_steps_in_order_and_clears_draft() {
    let (service, store, gateway) = build_service(RecordingGateway::default());
    service.init_local_draft("a@x.com");
    service.save_to_local(4, profile_form("a@x.com"));

    let result = service
        .finalize_registration(
            profile_form("a@x.com"),
            "Abc12345",
            "Abc12345",
            vec![pdf("license.pdf"), pdf("diploma.pdf")],
        )
        .await
        .expect("finalize succeeds");

    assert_eq!(
        gateway.calls(),
        vec![
            GatewayCall::SaveDraft {
                id: None,
                email: "a@x.com".to_string(),
                current_step: READY_FOR_FINALIZE_STEP,
            },
            GatewayCall::Upload {
                draft_id: REMOTE_DRAFT_ID,
                file_name: "license.pdf".to_string(),
            },
            GatewayCall::Upload {
                draft_id: REMOTE_DRAFT_ID,
                file_name: "diploma.pdf".to_string(),
            },
            GatewayCall::Finalize(REMOTE_DRAFT_ID),
        ]
    );
    assert_eq!(result.tokens.access, "access-token");

    assert!(service.load_from_local().is_none());
    let state = service.state();
    assert!(state.local_draft.is_none());
    assert!(state.error.is_none());
    assert!(!state.is_finalizing && !state.is_uploading && !state.is_saving);

    let sessions = SessionStore::new(store.clone());
    assert_eq!(
        sessions.access_token().expect("read"),
        Some("access-token".to_string())
    );
    assert_eq!(
        sessions.refresh_token().expect("read"),
        Some("refresh-token".to_string())
    );
    assert!(store.get("professional_registration_draft").expect("read").is_none());
}

#[tokio::test]
async fn non_pdf_document_aborts_before_any_upload() {
    let (service, _, gateway) = build_service(RecordingGateway::default());
    service.init_local_draft("a@x.com");

    let outcome = service
        .finalize_registration(
            profile_form("a@x.com"),
            "Abc12345",
            "Abc12345",
            vec![pdf("license.pdf"), image("passport.jpg"), pdf("diploma.pdf")],
        )
        .await;

    match outcome {
        Err(RegistrationError::NotPdf { file_name }) => assert_eq!(file_name, "passport.jpg"),
        other => panic!("expected non-pdf rejection, got {other:?}"),
    }
    assert!(gateway.uploads().is_empty());
    assert!(gateway.calls().is_empty(), "rejected before any network call");
    let error = service.state().error.expect("error surfaced");
    assert!(error.contains("passport.jpg"));
    assert!(service.load_from_local().is_some());
}

#[tokio::test]
async fn failed_upload_stops_the_sequence() {
    let (service, _, gateway) = build_service(RecordingGateway::with_upload_outcomes(vec![
        None,
        Some(GatewayError::Status {
            status: 413,
            message: "File too large.".to_string(),
        }),
    ]));
    service.init_local_draft("a@x.com");

    let outcome = service
        .finalize_registration(
            profile_form("a@x.com"),
            "Abc12345",
            "Abc12345",
            vec![pdf("license.pdf"), pdf("diploma.pdf"), pdf("insurance.pdf")],
        )
        .await;

    match outcome {
        Err(RegistrationError::Upload { file_name, .. }) => assert_eq!(file_name, "diploma.pdf"),
        other => panic!("expected upload failure, got {other:?}"),
    }
    assert_eq!(gateway.uploads(), vec!["license.pdf", "diploma.pdf"]);
    assert!(!gateway
        .calls()
        .iter()
        .any(|call| matches!(call, GatewayCall::Finalize(_))));
    assert_eq!(
        service.state().error.as_deref(),
        Some("diploma.pdf: File too large.")
    );
}

#[tokio::test]
async fn password_mismatch_keeps_the_local_draft() {
    let (service, _, gateway) = build_service(RecordingGateway::failing_finalize(
        password_mismatch(),
    ));
    service.init_local_draft("a@x.com");
    service.save_to_local(4, profile_form("a@x.com"));

    let outcome = service
        .finalize_registration(
            profile_form("a@x.com"),
            "Abc12345",
            "Abc99999",
            vec![pdf("license.pdf")],
        )
        .await;

    assert!(outcome.is_err());
    let state = service.state();
    let error = state.error.expect("error surfaced");
    assert!(error.contains("Passwords do not match"));
    assert!(!state.is_finalizing);

    let draft = service.load_from_local().expect("draft kept");
    assert_eq!(draft.remote_id, Some(REMOTE_DRAFT_ID));
    assert_eq!(draft.form_data.last_name.as_deref(), Some("Foo"));
    assert_eq!(gateway.uploads(), vec!["license.pdf"], "uploads are not rolled back");
}

#[tokio::test]
async fn retry_after_failure_reuses_the_remote_draft() {
    let (service, _, gateway) = build_service(RecordingGateway::failing_finalize(
        password_mismatch(),
    ));
    service.init_local_draft("a@x.com");

    for _ in 0..2 {
        let _ = service
            .finalize_registration(profile_form("a@x.com"), "Abc12345", "nope", Vec::new())
            .await;
    }

    let saves: Vec<_> = gateway
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            GatewayCall::SaveDraft { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(saves, vec![None, Some(REMOTE_DRAFT_ID)]);
}

#[tokio::test]
async fn remote_draft_failure_reports_flattened_field_errors() {
    let mut fields = BTreeMap::new();
    fields.insert("email".to_string(), vec!["Enter a valid email.".to_string()]);
    fields.insert(
        "license_number".to_string(),
        vec!["This field is required.".to_string()],
    );
    let (service, _, gateway) = build_service(RecordingGateway::failing_save(
        GatewayError::Validation(FieldErrors(fields)),
    ));

    let outcome = service
        .finalize_registration(profile_form("bad"), "Abc12345", "Abc12345", vec![pdf("a.pdf")])
        .await;

    assert!(matches!(outcome, Err(RegistrationError::Remote { .. })));
    assert_eq!(
        service.state().error.as_deref(),
        Some("Enter a valid email.; This field is required.")
    );
    assert!(gateway.uploads().is_empty());
}

#[tokio::test]
async fn empty_validation_payload_falls_back_to_generic_message() {
    let (service, _, _) = build_service(RecordingGateway::failing_save(GatewayError::Validation(
        FieldErrors::default(),
    )));

    let outcome = service
        .finalize_registration(profile_form("a@x.com"), "Abc12345", "Abc12345", Vec::new())
        .await;

    let error = outcome.expect_err("save fails");
    assert_eq!(
        error.display_message(),
        "Unable to reach the registration service"
    );
}

#[tokio::test]
async fn finalize_without_local_draft_still_commits() {
    let (service, _, gateway) = build_service(RecordingGateway::default());

    let result = service
        .finalize_registration(profile_form("a@x.com"), "Abc12345", "Abc12345", Vec::new())
        .await;

    assert!(result.is_ok());
    assert_eq!(gateway.saved_forms(), vec![profile_form("a@x.com")]);
}

#[tokio::test]
async fn transport_errors_surface_raw_text() {
    let (service, _, _) = build_service(RecordingGateway::failing_finalize(
        GatewayError::Transport("error sending request: connection reset".to_string()),
    ));

    let _ = service
        .finalize_registration(profile_form("a@x.com"), "Abc12345", "Abc12345", Vec::new())
        .await;

    assert_eq!(
        service.state().error.as_deref(),
        Some("error sending request: connection reset")
    );
}
