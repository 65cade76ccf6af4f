use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use prolink::error::AppError;

use crate::demo::{clear_draft, run_demo, show_draft, DemoArgs};
use crate::server;

#[derive(Parser, Debug)]
#[command(
    name = "ProLink Registration",
    about = "Run and inspect the professional registration draft service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk through a full registration against an in-memory backend
    Demo(DemoArgs),
    /// Inspect or discard the locally stored registration draft
    Draft {
        #[command(subcommand)]
        command: DraftCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DraftCommand {
    /// Print the stored draft as JSON
    Show(DraftArgs),
    /// Remove the stored draft
    Clear(DraftArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the practitioner draft backend base URL
    #[arg(long)]
    pub(crate) backend: Option<String>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DraftArgs {
    /// Directory holding the draft files (defaults to DRAFT_STORE_DIR)
    #[arg(long)]
    pub(crate) dir: Option<PathBuf>,
    /// Storage key of the draft slot (defaults to DRAFT_STORAGE_KEY)
    #[arg(long)]
    pub(crate) key: Option<String>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Draft {
            command: DraftCommand::Show(args),
        } => show_draft(args),
        Command::Draft {
            command: DraftCommand::Clear(args),
        } => clear_draft(args),
    }
}
