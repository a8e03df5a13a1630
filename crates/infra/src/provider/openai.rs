//! OpenAI Batch API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use tracing::instrument;

use batchline_core::{BatchId, BatchStatus, FileId, RequestCounts};

use super::r#trait::{BatchError, BatchProvider, CreateBatch, ProviderError, RemoteBatch};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// HTTP client for the OpenAI files and batches endpoints.
///
/// One request per call, no retry. Errors carry the HTTP status so callers can
/// tell rate limiting apart from rejected input.
#[derive(Clone)]
pub struct OpenAiBatchProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl core::fmt::Debug for OpenAiBatchProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenAiBatchProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl OpenAiBatchProvider {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Configuration(
                "API key must not be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let resp = req
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn send_batch(&self, req: reqwest::RequestBuilder) -> Result<RemoteBatch, ProviderError> {
        let wire: WireBatch = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        wire.into_remote()
    }
}

#[async_trait]
impl BatchProvider for OpenAiBatchProvider {
    #[instrument(skip(self, bytes), fields(size = bytes.len()), err)]
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<FileId, ProviderError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        let form = multipart::Form::new().text("purpose", "batch").part("file", part);

        let file: WireFile = self
            .send(self.client.post(self.url("/files")).multipart(form))
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        FileId::parse(file.id).map_err(|e| ProviderError::Decode(e.to_string()))
    }

    #[instrument(skip(self), fields(input_file_id = %request.input_file_id), err)]
    async fn create(&self, request: &CreateBatch) -> Result<RemoteBatch, ProviderError> {
        self.send_batch(self.client.post(self.url("/batches")).json(request))
            .await
    }

    #[instrument(skip(self), fields(batch_id = %batch_id), err)]
    async fn status(&self, batch_id: &BatchId) -> Result<RemoteBatch, ProviderError> {
        let path = format!("/batches/{batch_id}");
        self.send_batch(self.client.get(self.url(&path))).await
    }

    #[instrument(skip(self), fields(batch_id = %batch_id), err)]
    async fn cancel(&self, batch_id: &BatchId) -> Result<RemoteBatch, ProviderError> {
        let path = format!("/batches/{batch_id}/cancel");
        self.send_batch(self.client.post(self.url(&path))).await
    }

    #[instrument(skip(self), fields(file_id = %file_id), err)]
    async fn fetch(&self, file_id: &FileId) -> Result<Vec<u8>, ProviderError> {
        let path = format!("/files/{file_id}/content");
        let bytes = self
            .send(self.client.get(self.url(&path)))
            .await?
            .bytes()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct WireFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireBatch {
    id: String,
    status: String,
    #[serde(default)]
    errors: Option<WireErrors>,
    #[serde(default)]
    request_counts: Option<RequestCounts>,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    error_file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrors {
    #[serde(default)]
    data: Vec<BatchError>,
}

impl WireBatch {
    fn into_remote(self) -> Result<RemoteBatch, ProviderError> {
        let id = BatchId::parse(self.id).map_err(|e| ProviderError::Decode(e.to_string()))?;
        let mut remote = RemoteBatch::new(id, BatchStatus::from(self.status));
        remote.errors = self.errors.map(|e| e.data).unwrap_or_default();
        remote.request_counts = self.request_counts;
        // An empty id is treated as absent.
        remote.output_file_id = self.output_file_id.and_then(|v| FileId::parse(v).ok());
        remote.error_file_id = self.error_file_id.and_then(|v| FileId::parse(v).ok());
        Ok(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_in_progress_batch() {
        let json = r#"{
            "id": "batch_abc",
            "object": "batch",
            "status": "in_progress",
            "errors": null,
            "request_counts": {"total": 10, "completed": 4, "failed": 1},
            "output_file_id": null
        }"#;
        let remote = serde_json::from_str::<WireBatch>(json)
            .unwrap()
            .into_remote()
            .unwrap();

        assert_eq!(remote.id.as_str(), "batch_abc");
        assert_eq!(remote.status, BatchStatus::InProgress);
        assert_eq!(remote.request_counts, Some(RequestCounts::new(4, 1, 10)));
        assert!(remote.output_file_id.is_none());
        assert!(remote.error_summary().is_none());
    }

    #[test]
    fn decodes_validation_errors() {
        let json = r#"{
            "id": "batch_abc",
            "status": "failed",
            "errors": {"object": "list", "data": [
                {"code": "invalid_json_line", "message": "bad line", "param": null, "line": 3}
            ]}
        }"#;
        let remote = serde_json::from_str::<WireBatch>(json)
            .unwrap()
            .into_remote()
            .unwrap();

        assert_eq!(remote.status, BatchStatus::Failed);
        assert_eq!(
            remote.error_summary().as_deref(),
            Some("invalid_json_line: bad line (line 3)")
        );
    }

    #[test]
    fn rejects_empty_api_key() {
        let err = OpenAiBatchProvider::new("  ", DEFAULT_BASE_URL, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn debug_redacts_key() {
        let provider =
            OpenAiBatchProvider::new("sk-secret", "http://localhost/v1/", Duration::from_secs(1))
                .unwrap();
        let rendered = format!("{provider:?}");
        assert!(!rendered.contains("sk-secret"));
        assert_eq!(provider.base_url(), "http://localhost/v1");
    }
}
