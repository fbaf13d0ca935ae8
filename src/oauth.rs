//! Installed-application OAuth flow: PKCE authorization-code grant with a
//! one-shot loopback callback listener, plus the refresh-token grant.

use crate::credentials::ClientSecrets;
use crate::error::AuthorizationError;
use crate::token::Token;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const SUCCESS_HTML: &str = "<html><body><h1>Authentication successful</h1><p>The authentication flow has completed. You may close this window.</p></body></html>";
const ERROR_HTML: &str =
    "<html><body><h1>Authentication failed</h1><p>You may close this window.</p></body></html>";

/// The two ways the credential manager can obtain a fresh token.
pub trait AuthorizationFlow {
    /// Run the interactive flow and return a newly granted token.
    fn authorize(&mut self, scopes: &[String]) -> Result<Token, AuthorizationError>;
    /// Exchange the token's refresh component for a new access token.
    fn refresh(&mut self, token: &Token) -> Result<Token, AuthorizationError>;
}

/// Blocking implementation against Google's OAuth endpoints.
pub struct InstalledAppFlow {
    client: Client,
    credentials_path: PathBuf,
}

impl InstalledAppFlow {
    pub fn new(credentials_path: impl Into<PathBuf>) -> Result<Self, AuthorizationError> {
        let client = Client::builder().build()?;
        Ok(InstalledAppFlow {
            client,
            credentials_path: credentials_path.into(),
        })
    }
}

impl AuthorizationFlow for InstalledAppFlow {
    fn authorize(&mut self, scopes: &[String]) -> Result<Token, AuthorizationError> {
        let secrets = ClientSecrets::from_file(&self.credentials_path)?;
        let listener = CallbackListener::bind()?;
        let redirect_uri = listener.redirect_uri();
        let pkce = PkcePair::generate();
        let state = random_state();

        let url = authorization_url(&secrets, &redirect_uri, scopes, &state, &pkce.code_challenge)?;
        println!("Please visit this URL to authorize this application: {url}");
        info!(port = listener.port(), "waiting for oauth callback");

        let payload = listener.wait_for_callback(&state)?;
        if let Some(error) = payload.error {
            return Err(AuthorizationError::Denied {
                error,
                description: payload.error_description,
            });
        }
        let code = payload
            .code
            .ok_or_else(|| AuthorizationError::Callback("callback carried no code".into()))?;

        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", secrets.client_id.clone()),
            ("code_verifier", pkce.code_verifier),
        ];
        if let Some(secret) = &secrets.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        let response = post_token_form(&self.client, &secrets.token_uri, &form)?;

        let token = Token {
            access_token: String::new(),
            refresh_token: None,
            expiry: None,
            scopes: scopes.to_vec(),
            token_uri: secrets.token_uri,
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
        };
        let token = apply_token_response(token, response, Utc::now())?;
        if !token.can_refresh() {
            warn!("authorization server returned no refresh token");
        }
        Ok(token)
    }

    fn refresh(&mut self, token: &Token) -> Result<Token, AuthorizationError> {
        let refresh_token = token.refresh_token.clone().unwrap_or_default();
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token),
            ("client_id", token.client_id.clone()),
        ];
        if let Some(secret) = &token.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        let response = post_token_form(&self.client, &token.token_uri, &form)?;
        apply_token_response(token.clone(), response, Utc::now())
    }
}

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

fn post_token_form(
    client: &Client,
    token_uri: &str,
    form: &[(&str, String)],
) -> Result<TokenResponse, AuthorizationError> {
    let res = client.post(token_uri).form(form).send()?;
    let status = res.status();
    let body = res.text()?;
    if !status.is_success() {
        return Err(AuthorizationError::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|e| AuthorizationError::TokenResponse(e.to_string()))
}

/// Fold a token endpoint response into `base`. Fields the response omits
/// (refresh token, scope) keep their previous values.
pub(crate) fn apply_token_response(
    mut base: Token,
    response: TokenResponse,
    now: DateTime<Utc>,
) -> Result<Token, AuthorizationError> {
    base.access_token = response.access_token;
    base.expiry = match response.expires_in {
        Some(secs) => Some(
            Duration::try_seconds(secs)
                .and_then(|lifetime| now.checked_add_signed(lifetime))
                .ok_or_else(|| {
                    AuthorizationError::TokenResponse(format!("expires_in out of range: {secs}"))
                })?,
        ),
        None => None,
    };
    if let Some(refresh) = response.refresh_token.filter(|r| !r.is_empty()) {
        base.refresh_token = Some(refresh);
    }
    if let Some(scope) = response.scope {
        base.scopes = scope.split_whitespace().map(str::to_string).collect();
    }
    Ok(base)
}

pub(crate) fn authorization_url(
    secrets: &ClientSecrets,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    code_challenge: &str,
) -> Result<Url, AuthorizationError> {
    let scope = scopes.join(" ");
    Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("response_type", "code"),
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
            ("state", state),
            ("access_type", "offline"),
            ("code_challenge", code_challenge),
            ("code_challenge_method", "S256"),
        ],
    )
    .map_err(|e| AuthorizationError::InvalidClientConfig(format!("auth_uri: {e}")))
}

#[derive(Debug, Clone)]
pub(crate) struct PkcePair {
    pub(crate) code_verifier: String,
    pub(crate) code_challenge: String,
}

impl PkcePair {
    pub(crate) fn generate() -> Self {
        let mut random = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut random);
        let code_verifier = URL_SAFE_NO_PAD.encode(random);
        let code_challenge = code_challenge_s256(&code_verifier);
        PkcePair {
            code_verifier,
            code_challenge,
        }
    }
}

pub(crate) fn code_challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_state() -> String {
    let mut random = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut random);
    URL_SAFE_NO_PAD.encode(random)
}

/// Query parameters of the redirect back from the authorization server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallbackPayload {
    pub(crate) code: Option<String>,
    pub(crate) state: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) error_description: Option<String>,
}

/// Loopback listener on an ephemeral port.
pub(crate) struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    pub(crate) fn bind() -> Result<Self, AuthorizationError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .map_err(|e| AuthorizationError::Callback(format!("bind failed: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthorizationError::Callback(format!("local_addr failed: {e}")))?
            .port();
        Ok(CallbackListener { listener, port })
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Block until the browser delivers the redirect. Requests that are not
    /// the redirect (a favicon lookup, say) get a 404 and are skipped, and
    /// connections without a readable GET line (preconnects) get a 400.
    pub(crate) fn wait_for_callback(
        self,
        expected_state: &str,
    ) -> Result<CallbackPayload, AuthorizationError> {
        loop {
            let (mut socket, peer) = self
                .listener
                .accept()
                .map_err(|e| AuthorizationError::Callback(format!("accept failed: {e}")))?;
            debug!(%peer, "oauth callback connection");

            let Some(target) = read_request_target(&socket) else {
                respond(&mut socket, "HTTP/1.1 400 Bad Request", "");
                continue;
            };
            let payload = match parse_callback_target(&target) {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    respond(&mut socket, "HTTP/1.1 404 Not Found", "");
                    continue;
                }
                Err(e) => {
                    debug!(error = %e, "ignoring unparsable callback request");
                    respond(&mut socket, "HTTP/1.1 400 Bad Request", "");
                    continue;
                }
            };

            if !state_matches(payload.state.as_deref(), expected_state) {
                respond(&mut socket, "HTTP/1.1 400 Bad Request", ERROR_HTML);
                return Err(AuthorizationError::StateMismatch);
            }
            if payload.error.is_some() {
                respond(&mut socket, "HTTP/1.1 400 Bad Request", ERROR_HTML);
            } else {
                respond(&mut socket, "HTTP/1.1 200 OK", SUCCESS_HTML);
            }
            return Ok(payload);
        }
    }
}

fn state_matches(received: Option<&str>, expected: &str) -> bool {
    received.is_some_and(|state| state.as_bytes().ct_eq(expected.as_bytes()).into())
}

/// Target of a GET request line; `None` for empty, unreadable or non-GET
/// connections.
fn read_request_target(socket: &TcpStream) -> Option<String> {
    let mut reader = BufReader::new(socket);
    let mut request_line = String::new();
    if let Err(e) = reader.read_line(&mut request_line) {
        debug!(error = %e, "oauth callback read failed");
        return None;
    }
    // Drain the headers so closing the socket does not reset the connection.
    let mut header = String::new();
    while matches!(reader.read_line(&mut header), Ok(n) if n > 0) && !header.trim_end().is_empty() {
        header.clear();
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" || target.is_empty() {
        debug!(request_line = request_line.trim_end(), "ignoring non-callback request");
        return None;
    }
    Some(target.to_string())
}

fn respond(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "{status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    // The browser closing early does not affect the flow.
    let _ = socket.write_all(response.as_bytes());
    let _ = socket.flush();
}

/// `None` when the request carries neither a code nor an error.
pub(crate) fn parse_callback_target(
    target: &str,
) -> Result<Option<CallbackPayload>, AuthorizationError> {
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| AuthorizationError::Callback(format!("invalid callback target: {e}")))?;

    let mut payload = CallbackPayload {
        code: None,
        state: None,
        error: None,
        error_description: None,
    };
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => payload.code = Some(value.into_owned()),
            "state" => payload.state = Some(value.into_owned()),
            "error" => payload.error = Some(value.into_owned()),
            "error_description" => payload.error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if payload.code.is_none() && payload.error.is_none() {
        return Ok(None);
    }
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Read;

    fn secrets() -> ClientSecrets {
        ClientSecrets {
            client_id: "client-id".into(),
            client_secret: Some("secret".into()),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".into(),
            token_uri: "https://oauth2.googleapis.com/token".into(),
        }
    }

    fn stored_token() -> Token {
        Token {
            access_token: "old".into(),
            refresh_token: Some("refresh".into()),
            expiry: None,
            scopes: vec!["scope-a".into()],
            token_uri: "https://oauth2.googleapis.com/token".into(),
            client_id: "client-id".into(),
            client_secret: None,
        }
    }

    #[test]
    fn pkce_challenge_matches_verifier() {
        let pair = PkcePair::generate();
        assert!(pair.code_verifier.len() >= 43 && pair.code_verifier.len() <= 128);
        assert_eq!(pair.code_challenge, code_challenge_s256(&pair.code_verifier));
    }

    #[test]
    fn rfc7636_challenge_vector() {
        assert_eq!(
            code_challenge_s256("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn authorization_url_carries_all_parameters() {
        let scopes = vec!["scope-a".to_string(), "scope-b".to_string()];
        let url = authorization_url(&secrets(), "http://127.0.0.1:9000/", &scopes, "st", "ch")
            .expect("url");
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-id");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:9000/");
        assert_eq!(params["scope"], "scope-a scope-b");
        assert_eq!(params["state"], "st");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["access_type"], "offline");
    }

    #[test]
    fn parse_callback_target_extracts_code_and_state() {
        let payload = parse_callback_target("/?code=abc123&state=xyz")
            .expect("parse")
            .expect("payload");
        assert_eq!(payload.code.as_deref(), Some("abc123"));
        assert_eq!(payload.state.as_deref(), Some("xyz"));
        assert!(payload.error.is_none());
    }

    #[test]
    fn parse_callback_target_accepts_provider_error() {
        let payload = parse_callback_target("/?error=access_denied&error_description=nope&state=xyz")
            .expect("parse")
            .expect("payload");
        assert_eq!(payload.error.as_deref(), Some("access_denied"));
        assert_eq!(payload.error_description.as_deref(), Some("nope"));
    }

    #[test]
    fn parse_callback_target_skips_unrelated_requests() {
        assert!(parse_callback_target("/favicon.ico").expect("parse").is_none());
    }

    #[test]
    fn refresh_response_keeps_previous_refresh_token_and_scopes() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"new","expires_in":3599,"token_type":"Bearer"}"#)
                .expect("response");
        let token = apply_token_response(stored_token(), response, now).expect("token");
        assert_eq!(token.access_token, "new");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(token.scopes, vec!["scope-a".to_string()]);
        assert_eq!(token.expiry, Some(now + Duration::seconds(3599)));
    }

    #[test]
    fn granted_scope_replaces_requested_scopes() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r2","scope":"scope-a scope-b"}"#,
        )
        .expect("response");
        let token = apply_token_response(stored_token(), response, Utc::now()).expect("token");
        assert_eq!(token.refresh_token.as_deref(), Some("r2"));
        assert_eq!(token.scopes, vec!["scope-a".to_string(), "scope-b".to_string()]);
        assert!(token.expiry.is_none());
    }

    #[test]
    fn out_of_range_expires_in_is_rejected() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","expires_in":9223372036854775807}"#,
        )
        .expect("response");
        let err = apply_token_response(stored_token(), response, Utc::now()).unwrap_err();
        assert!(matches!(err, AuthorizationError::TokenResponse(_)));
    }

    #[test]
    fn state_comparison() {
        assert!(state_matches(Some("abc"), "abc"));
        assert!(!state_matches(Some("abd"), "abc"));
        assert!(!state_matches(Some("ab"), "abc"));
        assert!(!state_matches(None, "abc"));
    }

    fn send(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        let request = format!("GET {target} HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n");
        stream.write_all(request.as_bytes()).expect("write");
        let mut response = String::new();
        stream.read_to_string(&mut response).expect("read");
        response
    }

    #[test]
    fn listener_receives_redirect_after_skipping_favicon() {
        let listener = CallbackListener::bind().expect("bind");
        let port = listener.port();
        let browser = std::thread::spawn(move || {
            let favicon = send(port, "/favicon.ico");
            let redirect = send(port, "/?state=s1&code=c1");
            (favicon, redirect)
        });

        let payload = listener.wait_for_callback("s1").expect("payload");
        assert_eq!(payload.code.as_deref(), Some("c1"));

        let (favicon, redirect) = browser.join().expect("browser thread");
        assert!(favicon.starts_with("HTTP/1.1 404"));
        assert!(redirect.starts_with("HTTP/1.1 200"));
    }

    #[test]
    fn listener_rejects_state_mismatch() {
        let listener = CallbackListener::bind().expect("bind");
        let port = listener.port();
        let browser = std::thread::spawn(move || send(port, "/?state=other&code=c1"));

        let err = listener.wait_for_callback("expected").unwrap_err();
        assert!(matches!(err, AuthorizationError::StateMismatch));
        assert!(browser.join().expect("browser thread").starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn listener_survives_preconnects_and_non_get_requests() {
        let listener = CallbackListener::bind().expect("bind");
        let port = listener.port();
        let browser = std::thread::spawn(move || {
            drop(TcpStream::connect(("127.0.0.1", port)).expect("preconnect"));

            let mut post = TcpStream::connect(("127.0.0.1", port)).expect("connect");
            post.write_all(b"POST /?code=x&state=s1 HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
                .expect("write");
            let mut rejected = String::new();
            post.read_to_string(&mut rejected).expect("read");

            (rejected, send(port, "/?state=s1&code=c1"))
        });

        let payload = listener.wait_for_callback("s1").expect("payload");
        assert_eq!(payload.code.as_deref(), Some("c1"));

        let (rejected, redirect) = browser.join().expect("browser thread");
        assert!(rejected.starts_with("HTTP/1.1 400"));
        assert!(redirect.starts_with("HTTP/1.1 200"));
    }
}
