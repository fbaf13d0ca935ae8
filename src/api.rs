// API client module: a small blocking HTTP client for the Drive v3 REST
// API. Only the three calls the transfer needs are implemented: listing a
// folder page, fetching a byte range of a file's media, and creating a
// file with content.
//
// The calls sit behind the `DriveApi` trait so the transfer sequencer can
// be driven by an in-memory fake in tests.

use crate::auth::Session;
use crate::config::Endpoints;
use crate::error::ApiError;
use rand::RngCore;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fields requested from the listing call.
const LIST_FIELDS: &str = "nextPageToken, files(id, name)";

/// Identity of a file as returned by the listing call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    #[serde(default)]
    pub files: Vec<RemoteFile>,
    pub next_page_token: Option<String>,
}

/// Metadata sent alongside uploaded content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    pub name: String,
    pub parents: Vec<String>,
}

/// A slice of a file's media starting at the requested offset.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub bytes: Vec<u8>,
    /// Full size of the file, when the server reported it.
    pub total_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedFile {
    pub id: String,
}

/// The storage operations the transfer sequencer depends on.
pub trait DriveApi {
    /// List one page of the files whose parent is `parent_id`.
    fn list_files(&self, parent_id: &str, page_token: Option<&str>) -> Result<FilePage, ApiError>;

    /// Fetch up to `chunk_size` bytes of `file_id` starting at `offset`.
    fn download_chunk(
        &self,
        file_id: &str,
        offset: u64,
        chunk_size: u64,
    ) -> Result<MediaChunk, ApiError>;

    /// Create a file with the given metadata and content, returning its id.
    fn create_file(
        &self,
        metadata: &FileMetadata,
        media: &[u8],
        mime_type: &str,
    ) -> Result<CreatedFile, ApiError>;
}

/// Drive client bound to one session's access token.
#[derive(Clone)]
pub struct DriveClient {
    client: Client,
    endpoints: Endpoints,
    access_token: String,
}

impl DriveClient {
    pub fn new(session: &Session, endpoints: Endpoints) -> Result<Self, ApiError> {
        let client = Client::builder().build()?;
        Ok(DriveClient {
            client,
            endpoints,
            access_token: session.access_token().to_string(),
        })
    }
}

impl DriveApi for DriveClient {
    fn list_files(&self, parent_id: &str, page_token: Option<&str>) -> Result<FilePage, ApiError> {
        let url = format!("{}/files", self.endpoints.api_url);
        let query = parent_query(parent_id);
        let mut params = vec![("q", query.as_str()), ("fields", LIST_FIELDS)];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let res = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&params)
            .send()?;
        let res = check_status(res)?;
        res.json()
            .map_err(|e| ApiError::Malformed(format!("listing response: {e}")))
    }

    fn download_chunk(
        &self,
        file_id: &str,
        offset: u64,
        chunk_size: u64,
    ) -> Result<MediaChunk, ApiError> {
        let url = format!("{}/files/{}", self.endpoints.api_url, file_id);
        let end = offset + chunk_size.max(1) - 1;
        let res = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .header(RANGE, format!("bytes={offset}-{end}"))
            .send()?;

        // Ranged reads of an empty file are answered with 416.
        if res.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(MediaChunk {
                bytes: Vec::new(),
                total_size: Some(offset),
            });
        }

        let res = check_status(res)?;
        let status = res.status();
        let content_range = res
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = res.bytes()?.to_vec();
        let total_size = match (status, content_range) {
            (StatusCode::PARTIAL_CONTENT, range) => {
                range.as_deref().and_then(parse_content_range_total)
            }
            // A plain 200 carries the whole file, which only lines up with a
            // read from the start.
            _ if offset == 0 => Some(bytes.len() as u64),
            _ => {
                return Err(ApiError::Malformed(format!(
                    "range from offset {offset} answered with {status} and no Content-Range"
                )))
            }
        };
        debug!(file_id, offset, len = bytes.len(), ?total_size, "media chunk");
        Ok(MediaChunk { bytes, total_size })
    }

    fn create_file(
        &self,
        metadata: &FileMetadata,
        media: &[u8],
        mime_type: &str,
    ) -> Result<CreatedFile, ApiError> {
        let url = format!("{}/files", self.endpoints.upload_url);
        let metadata_json = serde_json::to_vec(metadata)
            .map_err(|e| ApiError::Malformed(format!("metadata: {e}")))?;
        let boundary = random_boundary();
        let body = multipart_related_body(&boundary, &metadata_json, mime_type, media);

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(body)
            .send()?;
        let res = check_status(res)?;
        res.json()
            .map_err(|e| ApiError::Malformed(format!("create response: {e}")))
    }
}

/// Turn a non-success response into an error carrying the body text.
fn check_status(res: Response) -> Result<Response, ApiError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().unwrap_or_default();
    Err(ApiError::Status { status, body })
}

/// Search expression selecting the children of a folder.
pub(crate) fn parent_query(parent_id: &str) -> String {
    let escaped = parent_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}' in parents")
}

/// Total size from `Content-Range: bytes a-b/total`; `None` when the total
/// is `*`.
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

fn random_boundary() -> String {
    let mut random = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut random);
    let hex: String = random.iter().map(|b| format!("{b:02x}")).collect();
    format!("drive-transfer-{hex}")
}

/// Two-part `multipart/related` body: JSON metadata, then the content.
pub(crate) fn multipart_related_body(
    boundary: &str,
    metadata_json: &[u8],
    mime_type: &str,
    media: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(media.len() + metadata_json.len() + 256);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(metadata_json);
    body.extend_from_slice(format!("\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
