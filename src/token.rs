// Token model and its file-backed store. The on-disk layout is the Google
// "authorized user" JSON, so a token written by the official client
// libraries can be reused and vice versa.

use crate::error::AuthorizationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Tokens are treated as expired slightly before their real expiry.
const CLOCK_SKEW_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub token_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl Token {
    /// Without an expiry the token is assumed to never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now >= expiry - Duration::seconds(CLOCK_SKEW_SECS),
            None => false,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && !self.is_expired(now)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether every requested scope was granted to this token.
    pub fn covers(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|s| self.scopes.contains(s))
    }
}

/// Persists a single token as JSON at a fixed path.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored token. A missing file yields `None`; an unreadable or
    /// malformed one is logged and also yields `None`, which sends the
    /// caller through a fresh authorization.
    pub fn load(&self) -> Option<Token> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored token");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token store unreadable");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token store malformed");
                None
            }
        }
    }

    /// Overwrite the stored token.
    pub fn save(&self, token: &Token) -> Result<(), AuthorizationError> {
        let write_err = |source| AuthorizationError::StoreWrite {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(token)
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        write_private(&self.path, json.as_bytes()).map_err(write_err)?;
        debug!(path = %self.path.display(), "token persisted");
        Ok(())
    }
}

/// Write `bytes` to a file readable by the owner only. A new file is
/// created 0600; an existing one is narrowed before it is truncated.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        if path.exists() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
    }
    let mut file = options.open(path)?;
    file.set_len(0)?;
    file.write_all(bytes)?;
    file.flush()
}
