//! PixelDrain provider

use super::{Uploader, file_body};
use crate::error::UploadError;
use crate::types::UploadProvider;
use async_trait::async_trait;
use std::path::Path;
use url::Url;

const PROVIDER: UploadProvider = UploadProvider::PixelDrain;

/// Uploads with `PUT /api/file/{name}` using the account API key
#[derive(Clone, Debug)]
pub struct PixelDrainUploader {
    client: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

impl PixelDrainUploader {
    /// Create a provider for `base` (e.g. `https://pixeldrain.com`)
    pub fn new(client: reqwest::Client, base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self, file_name: &str) -> Result<Url, UploadError> {
        let unavailable = |reason: String| UploadError::Unavailable {
            provider: PROVIDER,
            reason,
        };
        let mut url = Url::parse(&self.base).map_err(|e| unavailable(format!("bad base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| unavailable("base URL cannot have a path".into()))?
            .pop_if_empty()
            .extend(["api", "file", file_name]);
        Ok(url)
    }
}

#[async_trait]
impl Uploader for PixelDrainUploader {
    fn provider(&self) -> UploadProvider {
        PROVIDER
    }

    async fn upload(&self, path: &Path) -> Result<String, UploadError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(UploadError::Unavailable {
                provider: PROVIDER,
                reason: "API key missing".into(),
            });
        };

        let (body, len, file_name) = file_body(path).await?;
        let url = self.endpoint(&file_name)?;
        tracing::info!(provider = %PROVIDER, file = %file_name, bytes = len, "uploading");

        let transport = |source| UploadError::Transport {
            provider: PROVIDER,
            source,
        };
        let response = self
            .client
            .put(url)
            .basic_auth("", Some(api_key))
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            return Err(UploadError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let json: serde_json::Value = response.json().await.map_err(transport)?;
        let id = json
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or(UploadError::MissingField {
                provider: PROVIDER,
                field: "id",
            })?;
        Ok(format!("{}/u/{id}", self.base))
    }
}
