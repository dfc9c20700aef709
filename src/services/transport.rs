use crate::api::error::WorkflowError;
use crate::config::WorkflowConfig;
use crate::models::UploadTask;
use crate::services::progress::{ProgressTracker, counting_stream};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use url::Url;

/// Raw response handed back to the controller for classification
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Request/response boundary to the chat backend
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether `upload` reports byte-level progress to the tracker
    fn supports_progress(&self) -> bool;

    /// Sends `task.file` as multipart field `file` plus `task.fields`
    async fn upload(
        &self,
        task: &UploadTask,
        progress: Arc<ProgressTracker>,
    ) -> Result<TransportResponse, WorkflowError>;

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<TransportResponse, WorkflowError>;

    async fn get_json(&self, path: &str) -> Result<TransportResponse, WorkflowError>;
}

/// Header carrying the CSRF token on mutating requests
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Form field carrying the CSRF token on uploads
pub const CSRF_FIELD: &str = "csrf_token";

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    csrf_token: Option<String>,
    progress_events: bool,
}

impl HttpTransport {
    pub fn new(config: &WorkflowConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base URL '{}'", config.base_url))?;
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            csrf_token: config.csrf_token.clone(),
            progress_events: true,
        })
    }

    /// Turns off byte counting so the controller falls back to the ramp
    pub fn without_progress_events(mut self) -> Self {
        self.progress_events = false;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, WorkflowError> {
        self.base_url
            .join(path)
            .map_err(|e| WorkflowError::Network(format!("Invalid endpoint '{}': {}", path, e)))
    }

    fn with_csrf(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.csrf_token {
            Some(token) => request.header(CSRF_HEADER, token),
            None => request,
        }
    }

    async fn finish(response: reqwest::Response) -> Result<TransportResponse, WorkflowError> {
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn supports_progress(&self) -> bool {
        self.progress_events
    }

    async fn upload(
        &self,
        task: &UploadTask,
        progress: Arc<ProgressTracker>,
    ) -> Result<TransportResponse, WorkflowError> {
        let url = self.endpoint(&task.endpoint)?;
        let file = &task.file;

        let part = if self.progress_events {
            let body = reqwest::Body::wrap_stream(counting_stream(file.bytes.clone(), progress));
            Part::stream_with_length(body, file.size())
        } else {
            Part::bytes(file.bytes.to_vec())
        };
        let part = part
            .file_name(file.name.clone())
            .mime_str(file.content_type().as_ref())?;

        let mut form = Form::new().part("file", part);
        for (name, value) in &task.fields {
            form = form.text(name.clone(), value.clone());
        }
        if let Some(token) = &self.csrf_token {
            form = form.text(CSRF_FIELD, token.clone());
        }

        tracing::debug!(
            request_id = %task.request_id,
            "POST {} ({} bytes)",
            url,
            file.size()
        );

        let request = self
            .client
            .post(url)
            .header("x-request-id", &task.request_id)
            .multipart(form);
        let response = self.with_csrf(request).send().await?;
        Self::finish(response).await
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<TransportResponse, WorkflowError> {
        let url = self.endpoint(path)?;
        let request = self.client.post(url).json(body);
        let response = self.with_csrf(request).send().await?;
        Self::finish(response).await
    }

    async fn get_json(&self, path: &str) -> Result<TransportResponse, WorkflowError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        Self::finish(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_base_url() {
        let config = WorkflowConfig::default().with_base_url("not a url");
        assert!(HttpTransport::new(&config).is_err());
    }

    #[test]
    fn test_endpoint_join() {
        let config = WorkflowConfig::default().with_base_url("http://localhost:5000/app/");
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(
            transport.endpoint("/chat/upload").unwrap().as_str(),
            "http://localhost:5000/chat/upload"
        );
        assert_eq!(
            transport.endpoint("chat/upload").unwrap().as_str(),
            "http://localhost:5000/app/chat/upload"
        );
    }

    #[test]
    fn test_progress_capability() {
        let transport = HttpTransport::new(&WorkflowConfig::default()).unwrap();
        assert!(transport.supports_progress());
        assert!(!transport.without_progress_events().supports_progress());
    }

    #[test]
    fn test_response_success_range() {
        assert!(TransportResponse::new(200, "{}").is_success());
        assert!(TransportResponse::new(204, "").is_success());
        assert!(!TransportResponse::new(302, "").is_success());
        assert!(!TransportResponse::new(400, "").is_success());
    }
}
