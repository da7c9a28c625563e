//! JSON-over-HTTP remote store client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::RemoteStore;
use crate::models::{now_millis, MediaRef, OwnerId, Record, RecordId, RecordKind};
use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(4);
const ERROR_EXCERPT_CHARS: usize = 180;

/// HTTP client for the inspection backend.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    /// Builds a client for an explicit API base URL.
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Result<Self> {
        Self::with_timeout(base_url, access_token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                Error::InvalidInput(format!("Failed to construct HTTP client: {error}"))
            })?;
        Ok(Self {
            base_url,
            access_token: access_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            client,
        })
    }

    /// Returns the base URL this client was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Cheap reachability check used to feed the connectivity monitor.
    pub async fn probe(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/v1/health", self.base_url))
            .timeout(PROBE_TIMEOUT);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!("Remote probe failed: {error}");
                false
            }
        }
    }

    fn collection_url(&self, kind: RecordKind) -> String {
        format!("{}/v1/{}s", self.base_url, kind.as_str())
    }

    fn record_url(&self, kind: RecordKind, id: &RecordId) -> String {
        format!(
            "{}/{}",
            self.collection_url(kind),
            urlencoding::encode(id.as_str())
        )
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| Error::RemoteRejected(format!("{what} request failed: {error}")))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::RemoteRejected(format!(
            "{what} failed: {}",
            parse_api_error(status, &body)
        )))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create(&self, record: &Record) -> Result<RecordId> {
        let mut request = self
            .client
            .post(self.collection_url(record.kind))
            .json(&RecordBody::from_record(record));
        // Lets the backend collapse duplicate submissions of the same local record
        if record.id.is_temporary() {
            request = request.header("Idempotency-Key", record.id.as_str());
        }

        let response = self.send(request, "Create").await?;
        let created = response
            .json::<CreatedResponse>()
            .await
            .map_err(|error| Error::RemoteRejected(format!("Invalid create response: {error}")))?;
        RecordId::from_server(created.id)
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let request = self
            .client
            .put(self.record_url(record.kind, &record.id))
            .json(&RecordBody::from_record(record));
        self.send(request, "Update").await?;
        Ok(())
    }

    async fn get(&self, kind: RecordKind, id: &RecordId) -> Result<Option<Record>> {
        let response = self
            .authorized(self.client.get(self.record_url(kind, id)))
            .send()
            .await
            .map_err(|error| Error::RemoteRejected(format!("Get request failed: {error}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteRejected(format!(
                "Get failed: {}",
                parse_api_error(status, &body)
            )));
        }

        let remote = response
            .json::<RemoteRecord>()
            .await
            .map_err(|error| Error::RemoteRejected(format!("Invalid record payload: {error}")))?;
        remote.into_record(kind).map(Some)
    }

    async fn list_by_owner(&self, kind: RecordKind, owner: &OwnerId) -> Result<Vec<Record>> {
        let url = format!(
            "{}?owner_id={}",
            self.collection_url(kind),
            urlencoding::encode(owner.as_str())
        );
        let response = self.send(self.client.get(url), "List").await?;
        let remote = response
            .json::<Vec<RemoteRecord>>()
            .await
            .map_err(|error| Error::RemoteRejected(format!("Invalid list payload: {error}")))?;

        remote
            .into_iter()
            .map(|record| record.into_record(kind))
            .collect()
    }

    async fn upload_media(&self, media: &MediaRef) -> Result<String> {
        let Some(local_path) = media.local_path.as_deref() else {
            return Err(Error::MediaUpload(
                "attachment has no local file to upload".to_string(),
            ));
        };

        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|error| Error::MediaUpload(format!("{local_path}: {error}")))?;
        let file_name = std::path::Path::new(local_path)
            .file_name()
            .map_or_else(|| "upload".to_string(), |name| name.to_string_lossy().to_string());

        let url = format!(
            "{}/v1/media?file_name={}",
            self.base_url,
            urlencoding::encode(&file_name)
        );
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, media.mime_type.as_str())
            .body(bytes);

        let response = self
            .send(request, "Media upload")
            .await
            .map_err(|error| Error::MediaUpload(error.to_string()))?;
        let uploaded = response
            .json::<UploadedResponse>()
            .await
            .map_err(|error| Error::MediaUpload(format!("Invalid upload response: {error}")))?;
        Ok(uploaded.url)
    }
}

#[derive(Debug, Serialize)]
struct RecordBody<'a> {
    owner_id: &'a str,
    payload: &'a serde_json::Value,
    media: Vec<MediaBody<'a>>,
    created_at: i64,
}

#[derive(Debug, Serialize)]
struct MediaBody<'a> {
    url: &'a str,
    mime_type: &'a str,
}

impl<'a> RecordBody<'a> {
    fn from_record(record: &'a Record) -> Self {
        Self {
            owner_id: record.owner_id.as_str(),
            payload: &record.payload,
            media: record
                .media
                .iter()
                .filter_map(|media| {
                    media.remote_url.as_deref().map(|url| MediaBody {
                        url,
                        mime_type: media.mime_type.as_str(),
                    })
                })
                .collect(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadedResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct RemoteRecord {
    id: String,
    owner_id: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    media: Vec<RemoteMedia>,
    created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RemoteMedia {
    url: String,
    #[serde(default = "default_mime_type")]
    mime_type: String,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

impl RemoteRecord {
    fn into_record(self, kind: RecordKind) -> Result<Record> {
        let id = RecordId::from_server(self.id)?;
        let owner_id = self
            .owner_id
            .parse::<OwnerId>()
            .map_err(|error| Error::RemoteRejected(error.to_string()))?;
        let now = now_millis();
        let media = self
            .media
            .into_iter()
            .map(|media| MediaRef::remote(media.url, media.mime_type))
            .collect();

        let mut record = Record::new(kind, owner_id, self.payload).with_media(media);
        record.mark_synced(id, now);
        record.last_sync_attempt = None;
        record.created_at = self.created_at.unwrap_or(now);
        Ok(record)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = error_excerpt(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

/// Leading slice of an unstructured error body, enough to log
fn error_excerpt(body: &str) -> String {
    body.trim().chars().take(ERROR_EXCERPT_CHARS).collect()
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = raw.trim();
    if base_url.is_empty() {
        return Err(Error::InvalidInput("API base URL must not be empty".to_string()));
    }
    if is_http_url(base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}
