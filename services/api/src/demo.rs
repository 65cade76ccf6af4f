use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use prolink::config::AppConfig;
use prolink::error::AppError;
use prolink::workflows::registration::{
    DocumentToUpload, DocumentType, DraftStore, FileStore, LocalDraft, MemoryStore,
    RegistrationForm, RegistrationService, SaveStatus, ServiceOptions, SessionStore, StoreError,
};
use serde::Serialize;

use crate::cli::DraftArgs;
use crate::infra::InMemoryDraftGateway;

const DEMO_PASSWORD: &str = "Pr0fessional!";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Email address the demo registers.
    #[arg(long, default_value = "ada.lovelace@example.com")]
    pub(crate) email: String,
    /// Submit a mismatched password first to show that a failed finalize can be resumed.
    #[arg(long)]
    pub(crate) with_retry: bool,
    /// Attach a JPEG next to the PDFs to show the upfront document type check.
    #[arg(long)]
    pub(crate) with_image: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        email,
        with_retry,
        with_image,
    } = args;

    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(InMemoryDraftGateway::with_accounts(["taken@example.com"]));
    let service = RegistrationService::new(
        store.clone(),
        gateway.clone(),
        ServiceOptions {
            staged_upload_delay: Duration::from_millis(50),
        },
    );

    println!("Professional registration demo");
    let availability = service.check_email(&email).await;
    println!("  Email {email} available: {}", yes_no(availability.available));
    if !availability.available {
        println!("  Continuing anyway; finalize rejects the duplicate account");
    }

    let draft = service.init_local_draft(&email);
    println!(
        "  Draft started at step {} ({})",
        draft.current_step,
        draft.last_saved.format("%Y-%m-%d %H:%M:%S UTC")
    );

    for (step, patch) in demo_steps() {
        match service.save_to_local(step, patch) {
            SaveStatus::Saved(draft) => println!(
                "  Step {step} saved, {} fields filled",
                filled_fields(&draft.form_data)
            ),
            SaveStatus::Failed { reason } => println!("  Step {step} not saved: {reason}"),
        }
    }
    let form = service
        .load_from_local()
        .map(|draft| draft.form_data)
        .unwrap_or_default();

    let documents = vec![
        DocumentToUpload::pdf(
            DocumentType::ProfessionalLicense,
            "license.pdf",
            b"%PDF-1.7 license".to_vec(),
        ),
        DocumentToUpload::pdf(DocumentType::Diploma, "diploma.pdf", b"%PDF-1.7 diploma".to_vec()),
    ];
    for document in &documents {
        service.upload_document(document).await;
        println!(
            "  Staged {} as {}",
            document.file_name,
            document.doc_type.label()
        );
    }

    if with_image {
        let mut attempt = documents.clone();
        attempt.push(DocumentToUpload::new(
            DocumentType::IdentityDocument,
            "passport.jpg",
            "image/jpeg",
            vec![0xff, 0xd8, 0xff],
        ));
        if let Err(err) = service
            .finalize_registration(form.clone(), DEMO_PASSWORD, DEMO_PASSWORD, attempt)
            .await
        {
            println!("  Finalize rejected: {}", err.display_message());
        }
    }

    if with_retry {
        if let Err(err) = service
            .finalize_registration(form.clone(), DEMO_PASSWORD, "mismatch", documents.clone())
            .await
        {
            println!("  Finalize failed: {}", err.display_message());
        }
        if let Some(remote_id) = service.load_from_local().and_then(|draft| draft.remote_id) {
            let step = gateway
                .draft_form(remote_id)
                .map(|(step, _)| step.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "  Local draft kept; remote draft {remote_id} at step {step} holds {} documents",
                gateway.draft_documents(remote_id).len()
            );
        }
    }

    let result = service
        .finalize_registration(form, DEMO_PASSWORD, DEMO_PASSWORD, documents)
        .await?;
    let user = result
        .user
        .map(|user| format!("#{} {}", user.id, user.email))
        .unwrap_or_else(|| "(no user returned)".to_string());
    println!("  Registered {user}");

    let sessions = SessionStore::new(store);
    println!(
        "  Session tokens stored: {}",
        yes_no(sessions.access_token()?.is_some())
    );
    println!(
        "  Local draft cleared: {}",
        yes_no(service.load_from_local().is_none())
    );
    Ok(())
}

fn demo_steps() -> Vec<(u32, RegistrationForm)> {
    vec![
        (
            1,
            RegistrationForm {
                first_name: Some("Ada".to_string()),
                last_name: Some("Lovelace".to_string()),
                phone: Some("+33 4 72 00 00 00".to_string()),
                ..RegistrationForm::default()
            },
        ),
        (
            2,
            RegistrationForm {
                profession: Some("Physiotherapist".to_string()),
                specialty: Some("Sports rehabilitation".to_string()),
                license_number: Some("PT-20931".to_string()),
                years_of_experience: Some(9),
                ..RegistrationForm::default()
            },
        ),
        (
            3,
            RegistrationForm {
                city: Some("Lyon".to_string()),
                postal_code: Some("69003".to_string()),
                address: Some("12 rue Garibaldi".to_string()),
                ..RegistrationForm::default()
            },
        ),
        (
            4,
            RegistrationForm {
                bio: Some("Post-operative knee and shoulder rehabilitation.".to_string()),
                languages: Some(vec!["fr".to_string(), "en".to_string()]),
                ..RegistrationForm::default()
            },
        ),
    ]
}

fn filled_fields(form: &RegistrationForm) -> usize {
    serde_json::to_value(form)
        .ok()
        .and_then(|value| value.as_object().map(|fields| fields.len()))
        .unwrap_or(0)
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[derive(Serialize)]
struct StoredDraftView<'a> {
    key: &'a str,
    location: String,
    draft: &'a LocalDraft,
}

fn open_draft_store(args: DraftArgs) -> Result<(DraftStore<FileStore>, PathBuf), AppError> {
    let DraftArgs { dir, key } = args;
    let (dir, key) = match (dir, key) {
        (Some(dir), Some(key)) => (dir, key),
        (dir, key) => {
            let config = AppConfig::load()?;
            (
                dir.unwrap_or(config.drafts.dir),
                key.unwrap_or(config.drafts.key),
            )
        }
    };
    let store = Arc::new(FileStore::new(dir.clone()));
    Ok((DraftStore::with_key(store, key), dir))
}

fn render_stored_draft(drafts: &DraftStore<FileStore>, dir: &Path) -> Result<String, AppError> {
    match drafts.load() {
        Some(draft) => {
            let view = StoredDraftView {
                key: drafts.key(),
                location: dir.display().to_string(),
                draft: &draft,
            };
            Ok(serde_json::to_string_pretty(&view).map_err(StoreError::from)?)
        }
        None => Ok(format!(
            "No registration draft under '{}' in {}",
            drafts.key(),
            dir.display()
        )),
    }
}

pub(crate) fn show_draft(args: DraftArgs) -> Result<(), AppError> {
    let (drafts, dir) = open_draft_store(args)?;
    println!("{}", render_stored_draft(&drafts, &dir)?);
    Ok(())
}

pub(crate) fn clear_draft(args: DraftArgs) -> Result<(), AppError> {
    let (drafts, dir) = open_draft_store(args)?;
    drafts.clear()?;
    println!(
        "Removed registration draft '{}' from {}",
        drafts.key(),
        dir.display()
    );
    Ok(())
}
