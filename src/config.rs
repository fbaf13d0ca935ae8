// Configuration passed explicitly into the credential manager and the
// transfer sequencer. Nothing here is process-wide; `main.rs` builds
// these values from command-line flags.

use std::path::PathBuf;

/// Full read/write access to the user's Drive.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Default download chunk, matching the size the Google client libraries use.
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

pub const DEFAULT_API_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";

/// Inputs of the credential manager.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Client registration file, read only when interactive authorization runs.
    pub credentials_path: PathBuf,
    /// Where the token is persisted between runs.
    pub token_path: PathBuf,
    pub scopes: Vec<String>,
}

impl AuthConfig {
    pub fn new(credentials_path: PathBuf, token_path: PathBuf, scopes: Vec<String>) -> Self {
        let scopes = if scopes.is_empty() {
            vec![DRIVE_SCOPE.to_string()]
        } else {
            scopes
        };
        AuthConfig {
            credentials_path,
            token_path,
            scopes,
        }
    }

    /// Token file in the user's home directory, next to other dotfiles.
    pub fn default_token_path() -> PathBuf {
        let dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        dir.join(".drive_transfer_token.json")
    }
}

/// What the sequencer does after a single file fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Stop at the first failure; remaining files are not attempted.
    #[default]
    Abort,
    /// Record the failure and move on to the next file.
    Continue,
    /// Ask the observer (the console prompt in the binary).
    Ask,
}

/// Inputs of the transfer sequencer.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub source_container_id: String,
    pub destination_container_id: String,
    /// Directory downloaded files are staged in before upload.
    pub download_dir: PathBuf,
    pub chunk_size: u64,
    pub on_failure: FailurePolicy,
    /// Delete the staged copy once its upload succeeded.
    pub remove_local: bool,
}

impl TransferConfig {
    pub fn new(source_container_id: impl Into<String>, destination_container_id: impl Into<String>) -> Self {
        TransferConfig {
            source_container_id: source_container_id.into(),
            destination_container_id: destination_container_id.into(),
            download_dir: PathBuf::from("."),
            chunk_size: DEFAULT_CHUNK_SIZE,
            on_failure: FailurePolicy::Abort,
            remove_local: false,
        }
    }
}

/// Base URLs of the storage API.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_url: String,
    pub upload_url: String,
}

impl Endpoints {
    /// Read `DRIVE_API_URL` / `DRIVE_UPLOAD_URL`, falling back to Google's
    /// public endpoints.
    pub fn from_env() -> Self {
        let api_url = std::env::var("DRIVE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let upload_url =
            std::env::var("DRIVE_UPLOAD_URL").unwrap_or_else(|_| DEFAULT_UPLOAD_URL.into());
        Endpoints {
            api_url: api_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            api_url: DEFAULT_API_URL.into(),
            upload_url: DEFAULT_UPLOAD_URL.into(),
        }
    }
}
