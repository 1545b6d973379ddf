//! Telegram Bot API client
//!
//! Calls are form-encoded POSTs to `{api_base}/bot{token}/{method}`, retried
//! on transient failures. The `try_*` methods surface errors for tests and
//! callers that care; the [`Notifier`] impl logs and swallows them.

use super::Notifier;
use super::attachment::{self, MAX_DOCUMENT_BYTES};
use super::render::inline_keyboard;
use crate::config::{RetryConfig, TelegramConfig};
use crate::error::{Error, NotifyError};
use crate::retry::with_retry;
use crate::types::{Button, MessageHandle};
use async_trait::async_trait;
use reqwest::multipart;
use serde_json::Value;
use std::path::Path;

const NOT_MODIFIED: &str = "message is not modified";

/// Notifier backed by the Telegram Bot API
#[derive(Clone, Debug)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    token: String,
    retry: RetryConfig,
    document_limit: u64,
}

impl TelegramNotifier {
    /// Create a client from configuration
    pub fn new(config: &TelegramConfig, retry: &RetryConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(Error::Network)?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
            retry: retry.clone(),
            document_limit: MAX_DOCUMENT_BYTES,
        })
    }

    /// Largest document sent as-is; bigger logs are zipped or cut to their tail
    pub fn with_document_limit(mut self, bytes: u64) -> Self {
        self.document_limit = bytes;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn read_response(response: reqwest::Response) -> Result<Value, NotifyError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>().await?)
    }

    async fn call(&self, method: &str, form: &[(&str, String)]) -> Result<Value, NotifyError> {
        let response = self
            .client
            .post(self.method_url(method))
            .form(form)
            .send()
            .await?;
        Self::read_response(response).await
    }

    fn message_form(
        chat: &str,
        text: &str,
        buttons: &[Vec<Button>],
        message_id: Option<i64>,
    ) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("chat_id", chat.to_string()),
            ("text", text.to_string()),
            ("parse_mode", "html".to_string()),
            ("disable_web_page_preview", "true".to_string()),
        ];
        if let Some(id) = message_id {
            form.push(("message_id", id.to_string()));
        }
        if !buttons.is_empty() {
            form.push(("reply_markup", inline_keyboard(buttons).to_string()));
        }
        form
    }

    /// `sendMessage`; returns the handle of the new message
    pub async fn try_send(
        &self,
        chat: &str,
        text: &str,
        buttons: &[Vec<Button>],
    ) -> Result<MessageHandle, NotifyError> {
        let form = Self::message_form(chat, text, buttons, None);
        let form = &form;
        let value = with_retry(&self.retry, move || self.call("sendMessage", form)).await?;
        let id = value
            .pointer("/result/message_id")
            .and_then(Value::as_i64)
            .ok_or(NotifyError::MissingResult("result.message_id"))?;
        tracing::debug!(chat, message_id = id, "status message created");
        Ok(MessageHandle {
            id,
            chat: chat.to_string(),
        })
    }

    /// `editMessageText`; an unchanged text counts as success
    pub async fn try_edit(
        &self,
        handle: &MessageHandle,
        text: &str,
        buttons: &[Vec<Button>],
    ) -> Result<(), NotifyError> {
        let form = Self::message_form(&handle.chat, text, buttons, Some(handle.id));
        let form = &form;
        with_retry(&self.retry, move || async move {
            match self.call("editMessageText", form).await {
                Ok(_) => Ok(()),
                Err(NotifyError::Api { status: 400, body }) if body.contains(NOT_MODIFIED) => {
                    tracing::trace!(message_id = handle.id, "status message unchanged");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// `sendDocument` as multipart upload of `path`
    ///
    /// Files over the document limit are sent zipped, or as their tail when
    /// the zip is still too large.
    pub async fn try_send_document(&self, chat: &str, path: &Path) -> Result<(), NotifyError> {
        let document_err = |source| NotifyError::Document {
            path: path.to_path_buf(),
            source,
        };
        let (owned, limit) = (path.to_path_buf(), self.document_limit);
        let attachment = tokio::task::spawn_blocking(move || attachment::prepare(&owned, limit))
            .await
            .map_err(|e| document_err(std::io::Error::other(e)))?
            .map_err(document_err)?;
        let (bytes, file_name) = (&attachment.bytes, &attachment.file_name);

        with_retry(&self.retry, move || async move {
            let part = multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
            let form = multipart::Form::new()
                .text("chat_id", chat.to_string())
                .text("parse_mode", "html")
                .part("document", part);
            let response = self
                .client
                .post(self.method_url("sendDocument"))
                .multipart(form)
                .send()
                .await?;
            Self::read_response(response).await.map(|_| ())
        })
        .await?;

        tracing::info!(chat, file = %path.display(), sent_as = %file_name, "log document sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat: &str, text: &str, buttons: &[Vec<Button>]) -> Option<MessageHandle> {
        if chat.is_empty() {
            return None;
        }
        match self.try_send(chat, text, buttons).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, chat, "failed to send status message");
                None
            }
        }
    }

    async fn edit(&self, handle: &MessageHandle, text: &str, buttons: &[Vec<Button>]) {
        if let Err(e) = self.try_edit(handle, text, buttons).await {
            tracing::warn!(error = %e, message_id = handle.id, "failed to edit status message");
        }
    }

    async fn send_document(&self, chat: &str, path: &Path) {
        if chat.is_empty() {
            return;
        }
        if !path.exists() {
            tracing::warn!(file = %path.display(), "document to send does not exist");
            return;
        }
        if let Err(e) = self.try_send_document(chat, path).await {
            tracing::warn!(error = %e, chat, file = %path.display(), "failed to send document");
        }
    }
}
