// Client registration data (`credentials.json` as downloaded from the
// Google Cloud console). Only needed when a fresh interactive
// authorization has to run.

use crate::error::AuthorizationError;
use serde::Deserialize;
use std::path::Path;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// The OAuth client an installed application authorizes as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: Option<String>,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl ClientSecrets {
    pub fn from_file(path: &Path) -> Result<Self, AuthorizationError> {
        let data = std::fs::read_to_string(path).map_err(|source| {
            AuthorizationError::CredentialsRead {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_json(&data)
    }

    /// Parse either the "installed" or the "web" client layout.
    pub fn from_json(data: &str) -> Result<Self, AuthorizationError> {
        let file: ClientSecretsFile = serde_json::from_str(data)
            .map_err(|e| AuthorizationError::InvalidClientConfig(e.to_string()))?;
        let section = file.installed.or(file.web).ok_or_else(|| {
            AuthorizationError::InvalidClientConfig(
                "expected an \"installed\" or \"web\" client section".into(),
            )
        })?;
        if section.client_id.trim().is_empty() {
            return Err(AuthorizationError::InvalidClientConfig(
                "client_id is empty".into(),
            ));
        }
        Ok(ClientSecrets {
            client_id: section.client_id,
            client_secret: section.client_secret.filter(|s| !s.is_empty()),
            auth_uri: section.auth_uri.unwrap_or_else(|| DEFAULT_AUTH_URI.into()),
            token_uri: section.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_installed_client() {
        let json = r#"{"installed":{"client_id":"abc.apps.googleusercontent.com","project_id":"p",
            "auth_uri":"https://accounts.google.com/o/oauth2/auth","token_uri":"https://oauth2.googleapis.com/token",
            "client_secret":"shh","redirect_uris":["http://localhost"]}}"#;
        let secrets = ClientSecrets::from_json(json).expect("secrets");
        assert_eq!(secrets.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(secrets.client_secret.as_deref(), Some("shh"));
        assert_eq!(secrets.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn web_client_without_uris_gets_defaults() {
        let secrets = ClientSecrets::from_json(r#"{"web":{"client_id":"id"}}"#).expect("secrets");
        assert_eq!(secrets.auth_uri, DEFAULT_AUTH_URI);
        assert!(secrets.client_secret.is_none());
    }

    #[test]
    fn rejects_file_without_client_section() {
        let err = ClientSecrets::from_json(r#"{"other":{}}"#).unwrap_err();
        assert!(matches!(err, AuthorizationError::InvalidClientConfig(_)));
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let err = ClientSecrets::from_file(Path::new("/nonexistent/credentials.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/credentials.json"));
    }
}
