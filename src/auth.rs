// Credential manager: turns the persisted token (if any) into a usable
// session, refreshing or re-authorizing only when it has to.

use crate::config::AuthConfig;
use crate::error::AuthorizationError;
use crate::oauth::AuthorizationFlow;
use crate::token::{Token, TokenStore};
use chrono::Utc;
use tracing::{info, warn};

/// An authorized session. Holds a token that was valid when acquired.
#[derive(Debug, Clone)]
pub struct Session {
    token: Token,
}

impl Session {
    pub fn new(token: Token) -> Self {
        Session { token }
    }

    pub fn access_token(&self) -> &str {
        &self.token.access_token
    }

    pub fn token(&self) -> &Token {
        &self.token
    }
}

/// How the session was obtained; mostly useful for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    Cached,
    Refreshed,
    Authorized,
}

pub struct CredentialManager<F> {
    store: TokenStore,
    flow: F,
    scopes: Vec<String>,
}

impl<F: AuthorizationFlow> CredentialManager<F> {
    pub fn new(config: &AuthConfig, flow: F) -> Self {
        CredentialManager {
            store: TokenStore::new(config.token_path.clone()),
            flow,
            scopes: config.scopes.clone(),
        }
    }

    pub fn acquire_session(&mut self) -> Result<Session, AuthorizationError> {
        self.acquire().map(|(session, _)| session)
    }

    /// Load, refresh or authorize, then persist whatever changed.
    pub fn acquire(&mut self) -> Result<(Session, SessionSource), AuthorizationError> {
        let now = Utc::now();
        let stored = self.store.load();

        let (token, source) = match stored {
            Some(token) if !token.covers(&self.scopes) => {
                warn!(
                    granted = ?token.scopes,
                    requested = ?self.scopes,
                    "stored token lacks requested scopes; re-authorizing"
                );
                (self.flow.authorize(&self.scopes)?, SessionSource::Authorized)
            }
            Some(token) if token.is_valid(now) => {
                info!("using stored token");
                return Ok((Session::new(token), SessionSource::Cached));
            }
            Some(token) if token.is_expired(now) && token.can_refresh() => {
                info!("stored token expired; refreshing");
                (self.flow.refresh(&token)?, SessionSource::Refreshed)
            }
            _ => {
                info!("no usable stored token; starting interactive authorization");
                (self.flow.authorize(&self.scopes)?, SessionSource::Authorized)
            }
        };

        self.store.save(&token)?;
        info!(path = %self.store.path().display(), ?source, "token saved");
        Ok((Session::new(token), source))
    }
}
