// Entrypoint for the CLI application.
// - Parses flags into explicit configuration, acquires a session, then
//   runs the transfer.
// - Any error is logged here and the process still exits normally.

use anyhow::{Context, Result};
use clap::Parser;
use drive_transfer::api::DriveClient;
use drive_transfer::auth::CredentialManager;
use drive_transfer::config::{AuthConfig, Endpoints, FailurePolicy, TransferConfig, DEFAULT_CHUNK_SIZE};
use drive_transfer::oauth::InstalledAppFlow;
use drive_transfer::transfer;
use drive_transfer::ui::{print_summary, ConsoleReporter};
use std::path::PathBuf;
use tracing::error;

#[derive(Debug, Parser)]
#[command(author, version, about = "Copy every file of one Drive folder into another")]
struct Cli {
    /// Folder whose files are copied.
    #[arg(long, env = "DRIVE_SOURCE_FOLDER")]
    source: String,
    /// Folder the copies are created in.
    #[arg(long, env = "DRIVE_DESTINATION_FOLDER")]
    destination: String,
    /// OAuth client registration file.
    #[arg(long, default_value = "credentials.json")]
    credentials: PathBuf,
    /// Token store; defaults to ~/.drive_transfer_token.json.
    #[arg(long)]
    token: Option<PathBuf>,
    /// Directory files are staged in between download and upload.
    #[arg(long, default_value = ".")]
    download_dir: PathBuf,
    /// OAuth scope to request; repeat for several.
    #[arg(long = "scope")]
    scopes: Vec<String>,
    /// Download chunk size in bytes.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,
    /// What to do when one file fails.
    #[arg(long, value_enum, default_value_t = FailurePolicy::Abort)]
    on_error: FailurePolicy,
    /// Delete staged copies after a successful upload.
    #[arg(long)]
    remove_local: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = copy_folder(cli) {
        error!("{e:#}");
    }
    Ok(())
}

fn copy_folder(cli: Cli) -> Result<()> {
    let auth_config = AuthConfig::new(
        cli.credentials,
        cli.token.unwrap_or_else(AuthConfig::default_token_path),
        cli.scopes,
    );
    let flow = InstalledAppFlow::new(auth_config.credentials_path.clone())?;
    let session = CredentialManager::new(&auth_config, flow)
        .acquire_session()
        .context("authorization failed")?;

    let drive = DriveClient::new(&session, Endpoints::from_env())?;
    let mut config = TransferConfig::new(cli.source, cli.destination);
    config.download_dir = cli.download_dir;
    config.chunk_size = cli.chunk_size;
    config.on_failure = cli.on_error;
    config.remove_local = cli.remove_local;

    let mut reporter = ConsoleReporter::new();
    let report = transfer::run(&drive, &config, &mut reporter)?;
    print_summary(&report);
    Ok(())
}
