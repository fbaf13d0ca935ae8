// Error types for every operation the library performs. The binary wraps
// these with `anyhow` at the top level; inside the crate each operation
// returns its own enum so callers can decide what to do per file.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to obtain a usable session. Always terminal for the run.
#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("failed to read client credentials {path}: {source}")]
    CredentialsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid client configuration: {0}")]
    InvalidClientConfig(String),
    #[error("oauth callback failed: {0}")]
    Callback(String),
    #[error("oauth callback state mismatch")]
    StateMismatch,
    #[error("authorization denied: {error}")]
    Denied {
        error: String,
        description: Option<String>,
    },
    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error("token endpoint response invalid: {0}")]
    TokenResponse(String),
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to write token store {path}: {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A failed call against the storage API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("drive api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected drive response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
#[error("failed to list folder {container_id}: {source}")]
pub struct ListError {
    pub container_id: String,
    #[source]
    pub source: ApiError,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download of {name} ({file_id}) failed: {source}")]
    Remote {
        file_id: String,
        name: String,
        #[source]
        source: ApiError,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("upload of {name} failed: {source}")]
    Remote {
        name: String,
        #[source]
        source: ApiError,
    },
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    List(#[from] ListError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}
