//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so tests and
//! embedders can swap it. [`ReqwestClient`] is the default implementation.
//! [`HttpEventRemote`] speaks the events API on top of any client and maps
//! error statuses onto [`SyncError`].

use crate::config::{IntegrationIssuePredicate, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::stream::spawn_record_stream;
use crate::transport::{EventRemoteDataSource, EventStream, UploadResult};
use crate::SYNC_LOG_TARGET;
use async_trait::async_trait;
use bytes::Bytes;
use fieldsync_events::{EventCount, RemoteEventQuery, UploadEventsBody};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the number of records of a download.
pub const EVENT_COUNT_HEADER: &str = "x-event-count";
/// Header telling whether the count is a lower bound.
pub const EVENT_COUNT_LOWER_BOUND_HEADER: &str = "x-event-count-is-lower-bound";
/// Header carrying the server request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAINTENANCE_ERROR_CODE: &str = "002";
const MAX_ERROR_BODY: usize = 512;

/// A response whose body is read lazily.
pub struct HttpResponse {
    /// HTTP status.
    pub status: u16,
    /// Headers with lower-case names.
    pub headers: HashMap<String, String>,
    /// Body chunks.
    pub body: BoxStream<'static, SyncResult<Bytes>>,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// Creates a response with a body already in memory.
    pub fn from_bytes(status: u16, headers: HashMap<String, String>, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            headers,
            body: futures::stream::once(async move { Ok::<_, SyncError>(body) }).boxed(),
        }
    }

    /// Returns a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Reads the whole body.
    pub async fn bytes(mut self) -> SyncResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

/// HTTP client abstraction.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    async fn get(&self, url: &str, query: &[(&'static str, String)]) -> SyncResult<HttpResponse>;

    /// Sends a POST request with a gzip-compressed JSON body.
    async fn post(
        &self,
        url: &str,
        query: &[(&'static str, String)],
        body: Vec<u8>,
    ) -> SyncResult<HttpResponse>;
}

/// [`HttpClient`] on reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestClient {
    /// Creates a client.
    ///
    /// `timeout` bounds connecting and uploads. Downloads are streamed and
    /// only bounded by the connect timeout.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(map_reqwest_error)?;
        Ok(Self { client, timeout })
    }

    /// Wraps an existing reqwest client.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> SyncResult<HttpResponse> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error))
            .boxed();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::network(err.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, query: &[(&'static str, String)]) -> SyncResult<HttpResponse> {
        self.send(self.client.get(url).query(query)).await
    }

    async fn post(
        &self,
        url: &str,
        query: &[(&'static str, String)],
        body: Vec<u8>,
    ) -> SyncResult<HttpResponse> {
        let request = self
            .client
            .post(url)
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::CONTENT_ENCODING, "gzip")
            .timeout(self.timeout)
            .body(body);
        self.send(request).await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: Option<String>,
    estimated_outage: Option<u64>,
}

/// Maps an error status and its body onto a [`SyncError`].
pub fn classify_status(
    status: u16,
    body: &[u8],
    integration_issue: &IntegrationIssuePredicate,
) -> SyncError {
    if status == 503 {
        if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
            if parsed.error.as_deref() == Some(MAINTENANCE_ERROR_CODE) {
                return SyncError::BackendMaintenance {
                    estimated_outage_secs: parsed.estimated_outage,
                };
            }
        }
    }
    match status {
        401 | 403 => SyncError::Unauthorized { status },
        429 => SyncError::TooManyRequests,
        s if s >= 500 => SyncError::http(s, truncated(body)),
        s if integration_issue.is_integration_issue(s) => SyncError::CloudIntegration { status: s },
        s => SyncError::http(s, truncated(body)),
    }
}

/// Serialises `value` to JSON and gzips it.
fn gzip_json<T: Serialize + ?Sized>(value: &T) -> SyncResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, value)?;
    let compressed = encoder.finish().map_err(serde_json::Error::io)?;
    Ok(compressed)
}

fn truncated(body: &[u8]) -> String {
    let end = body.len().min(MAX_ERROR_BODY);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// The events API over HTTP.
pub struct HttpEventRemote<C: HttpClient> {
    base_url: String,
    client: C,
    integration_issue: IntegrationIssuePredicate,
    channel_capacity: usize,
}

impl<C: HttpClient> fmt::Debug for HttpEventRemote<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEventRemote")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpEventRemote<ReqwestClient> {
    /// Creates a remote on reqwest from a sync configuration.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Ok(Self::new(config, ReqwestClient::new(config.timeout)?))
    }
}

impl<C: HttpClient> HttpEventRemote<C> {
    /// Creates a remote on a client.
    pub fn new(config: &SyncConfig, client: C) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            integration_issue: config.integration_issue.clone(),
            channel_capacity: config.channel_capacity,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, project_id: &str, path: &str) -> String {
        format!("{}/projects/{}/{}", self.base_url, project_id, path)
    }

    async fn checked(&self, response: HttpResponse) -> SyncResult<HttpResponse> {
        if response.is_success() {
            return Ok(response);
        }
        let status = response.status;
        let body = response.bytes().await.unwrap_or_default();
        let err = classify_status(status, &body, &self.integration_issue);
        warn!(target: SYNC_LOG_TARGET, status, error = %err, "events API request failed");
        Err(err)
    }
}

#[async_trait]
impl<C: HttpClient> EventRemoteDataSource for HttpEventRemote<C> {
    async fn count(&self, query: &RemoteEventQuery) -> SyncResult<Vec<EventCount>> {
        let url = self.url(&query.project_id, "events/count");
        let response = self.client.get(&url, &query.query_pairs()).await?;
        let body = self.checked(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_events(&self, query: &RemoteEventQuery) -> SyncResult<EventStream> {
        let url = self.url(&query.project_id, "events");
        let response = self.checked(self.client.get(&url, &query.query_pairs()).await?).await?;
        let total_count = response
            .header(EVENT_COUNT_HEADER)
            .and_then(|v| v.trim().parse().ok());
        let is_lower_bound = response
            .header(EVENT_COUNT_LOWER_BOUND_HEADER)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        let request_id = response.header(REQUEST_ID_HEADER).map(str::to_string);
        debug!(
            target: SYNC_LOG_TARGET,
            project_id = %query.project_id,
            total_count = ?total_count,
            "download opened"
        );
        Ok(EventStream {
            receiver: spawn_record_stream(response.body, self.channel_capacity),
            total_count,
            is_lower_bound,
            request_id,
        })
    }

    async fn post(
        &self,
        project_id: &str,
        body: &UploadEventsBody,
        accept_invalid_events: bool,
    ) -> SyncResult<UploadResult> {
        let url = self.url(project_id, "events");
        let payload = gzip_json(body)?;
        let query = [("acceptInvalidEvents", accept_invalid_events.to_string())];
        let response = self.checked(self.client.post(&url, &query, payload).await?).await?;
        Ok(UploadResult {
            status: response.status,
            request_id: response.header(REQUEST_ID_HEADER).map(str::to_string),
        })
    }

    async fn dump_invalid_events(&self, project_id: &str, events: Vec<String>) -> SyncResult<()> {
        let url = self.url(project_id, "dump");
        let payload = gzip_json(&events)?;
        let query = [("type", "CORRUPTED_EVENTS".to_string())];
        self.checked(self.client.post(&url, &query, payload).await?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_is_recognised() {
        let predicate = IntegrationIssuePredicate::default();
        let err = classify_status(503, br#"{"error":"002","estimatedOutage":600}"#, &predicate);
        assert!(matches!(
            err,
            SyncError::BackendMaintenance {
                estimated_outage_secs: Some(600)
            }
        ));

        let err = classify_status(503, b"<html>down</html>", &predicate);
        assert!(matches!(err, SyncError::Http { status: 503, .. }));
    }

    #[test]
    fn status_mapping() {
        let predicate = IntegrationIssuePredicate::default();
        assert!(matches!(
            classify_status(401, b"", &predicate),
            SyncError::Unauthorized { status: 401 }
        ));
        assert!(matches!(
            classify_status(429, b"", &predicate),
            SyncError::TooManyRequests
        ));
        assert!(matches!(
            classify_status(400, b"", &predicate),
            SyncError::CloudIntegration { status: 400 }
        ));
        assert!(matches!(
            classify_status(400, b"bad", &IntegrationIssuePredicate::never()),
            SyncError::Http { status: 400, .. }
        ));
        assert!(matches!(
            classify_status(502, b"", &predicate),
            SyncError::Http { status: 502, .. }
        ));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = vec![b'x'; MAX_ERROR_BODY * 2];
        match classify_status(500, &body, &IntegrationIssuePredicate::default()) {
            SyncError::Http { body, .. } => assert_eq!(body.len(), MAX_ERROR_BODY),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bodies_are_gzipped_json() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let payload = gzip_json(&["a", "b"]).unwrap();
        assert_eq!(&payload[..2], &[0x1f, 0x8b]);
        let mut json = String::new();
        GzDecoder::new(payload.as_slice())
            .read_to_string(&mut json)
            .unwrap();
        assert_eq!(json, r#"["a","b"]"#);
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("x-request-id".to_string(), "r1".to_string());
        let response = HttpResponse::from_bytes(200, headers, Bytes::new());
        assert_eq!(response.header("X-Request-Id"), Some("r1"));
        assert!(response.is_success());
    }
}
