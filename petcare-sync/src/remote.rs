//! The remote seam: list/create/perform/delete against the sheet-backed functions.

use std::time::Duration;

use async_trait::async_trait;
use petcare_core::ScheduleKind;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::wire::{
    AssignmentRecord, CreateResponse, DeleteResponse, ListBody, PerformRequest,
    PerformResponse, delete_body,
};

#[async_trait]
pub trait ScheduleRemote: Send + Sync {
    async fn list(&self, kind: ScheduleKind, pet_id: &str) -> Result<Vec<AssignmentRecord>>;

    /// `body` is the create request as built by [`crate::wire::NewSchedule::to_json`].
    async fn create(&self, kind: ScheduleKind, body: &Value) -> Result<CreateResponse>;

    async fn perform(&self, kind: ScheduleKind, req: &PerformRequest) -> Result<PerformResponse>;

    async fn delete(&self, kind: ScheduleKind, entity_id: &str) -> Result<DeleteResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// e.g. "https://petcare.example/.netlify/functions"
    pub base_url: String,
    /// Bearer token; `None` makes every call fail with `Unauthorized`.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl HttpRemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// `ScheduleRemote` over HTTP/JSON.
///
/// Endpoints, relative to `base_url`:
/// - `GET  /{routines|medications}/list?pet_id=..`
/// - `POST /{routines|medications}/create`
/// - `POST /{routines|medications}/perform`
/// - `POST /{routines|medications}/delete`
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    config: HttpRemoteConfig,
}

impl HttpRemote {
    pub fn new(config: HttpRemoteConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self, kind: ScheduleKind, action: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            kind.collection(),
            action
        )
    }

    fn headers(&self, endpoint: &str) -> Result<HeaderMap> {
        let token = self
            .config
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SyncError::Unauthorized {
                endpoint: endpoint.to_string(),
            })?;

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            SyncError::Unauthorized {
                endpoint: endpoint.to_string(),
            }
        })?;
        headers.insert(reqwest::header::AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Send the request and return the body of a success response.
    async fn fetch(&self, endpoint: &str, request: reqwest::RequestBuilder) -> Result<String> {
        let headers = self.headers(endpoint)?;
        let resp = request
            .headers(headers)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| SyncError::RemoteUnavailable {
                endpoint: endpoint.to_string(),
                status: None,
                body: e.to_string(),
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| SyncError::RemoteUnavailable {
            endpoint: endpoint.to_string(),
            status: Some(status.as_u16()),
            body: e.to_string(),
        })?;
        tracing::debug!(%endpoint, status = status.as_u16(), "remote response");

        if !status.is_success() {
            let endpoint = endpoint.to_string();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    SyncError::Unauthorized { endpoint }
                }
                StatusCode::NOT_FOUND => SyncError::NotFound { endpoint, body },
                _ => SyncError::RemoteUnavailable {
                    endpoint,
                    status: Some(status.as_u16()),
                    body,
                },
            });
        }
        Ok(body)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: String,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let body = self.fetch(&endpoint, request).await?;
        decode(endpoint, &body)
    }
}

fn decode<T: DeserializeOwned>(endpoint: String, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| SyncError::Decode {
        endpoint,
        message: format!("{e}; body: {body}"),
    })
}

#[async_trait]
impl ScheduleRemote for HttpRemote {
    async fn list(&self, kind: ScheduleKind, pet_id: &str) -> Result<Vec<AssignmentRecord>> {
        let endpoint = self.endpoint(kind, "list");
        let request = self.client.get(&endpoint).query(&[("pet_id", pet_id)]);
        let body: ListBody = self.call(endpoint, request).await?;
        Ok(body.into_rows())
    }

    async fn create(&self, kind: ScheduleKind, body: &Value) -> Result<CreateResponse> {
        let endpoint = self.endpoint(kind, "create");
        let request = self.client.post(&endpoint).json(body);
        self.call(endpoint, request).await
    }

    async fn perform(&self, kind: ScheduleKind, req: &PerformRequest) -> Result<PerformResponse> {
        let endpoint = self.endpoint(kind, "perform");
        let request = self.client.post(&endpoint).json(&req.to_json(kind));
        self.call(endpoint, request).await
    }

    async fn delete(&self, kind: ScheduleKind, entity_id: &str) -> Result<DeleteResponse> {
        let endpoint = self.endpoint(kind, "delete");
        let request = self.client.post(&endpoint).json(&delete_body(kind, entity_id));
        let body = self.fetch(&endpoint, request).await?;
        if body.trim().is_empty() {
            return Ok(DeleteResponse::default());
        }
        decode(endpoint, &body)
    }
}
