//! GoFile provider
//!
//! Uploading is two requests: ask the API for a server, then POST the file
//! as multipart to that server.

use super::{Uploader, file_body};
use crate::error::UploadError;
use crate::types::UploadProvider;
use async_trait::async_trait;
use reqwest::multipart;
use serde_json::Value;
use std::path::Path;

const PROVIDER: UploadProvider = UploadProvider::GoFile;

/// Anonymous GoFile uploads
#[derive(Clone, Debug)]
pub struct GoFileUploader {
    client: reqwest::Client,
    api_base: String,
    upload_url: String,
}

impl GoFileUploader {
    /// Create a provider
    ///
    /// `upload_url` may contain `{server}`, replaced by the discovered server name.
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        upload_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_url: upload_url.into(),
        }
    }

    fn transport(source: reqwest::Error) -> UploadError {
        UploadError::Transport {
            provider: PROVIDER,
            source,
        }
    }

    async fn pick_server(&self) -> Result<String, UploadError> {
        let response = self
            .client
            .get(format!("{}/servers", self.api_base))
            .send()
            .await
            .map_err(Self::transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let json: Value = response.json().await.map_err(Self::transport)?;
        if json.get("status").and_then(Value::as_str) != Some("ok") {
            return Err(UploadError::Unavailable {
                provider: PROVIDER,
                reason: format!("server lookup answered {}", json["status"]),
            });
        }
        json.pointer("/data/servers/0/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(UploadError::MissingField {
                provider: PROVIDER,
                field: "data.servers[0].name",
            })
    }
}

#[async_trait]
impl Uploader for GoFileUploader {
    fn provider(&self) -> UploadProvider {
        PROVIDER
    }

    async fn upload(&self, path: &Path) -> Result<String, UploadError> {
        let (body, len, file_name) = file_body(path).await?;
        let server = self.pick_server().await?;
        let url = self.upload_url.replace("{server}", &server);
        tracing::info!(provider = %PROVIDER, server = %server, file = %file_name, bytes = len, "uploading");

        let part = multipart::Part::stream_with_length(body, len).file_name(file_name);
        let form = multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(Self::transport)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(UploadError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let json: Value = response.json().await.map_err(Self::transport)?;
        json.pointer("/data/downloadPage")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(UploadError::MissingField {
                provider: PROVIDER,
                field: "data.downloadPage",
            })
    }
}
