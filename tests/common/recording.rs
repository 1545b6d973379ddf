//! Test doubles: a notifier that records every call and scripted uploaders

use async_trait::async_trait;
use build_bot::{Button, MessageHandle, Notifier, UploadError, UploadProvider, Uploader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One observed notifier call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    /// `send(chat, text)`
    Send { chat: String, text: String },
    /// `edit(message id, text, buttons)`
    Edit {
        id: i64,
        text: String,
        buttons: Vec<Vec<Button>>,
    },
    /// `send_document(chat, path)`
    Document { chat: String, path: PathBuf },
}

/// Notifier that records every call with the time it was made
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(Instant, Call)>>,
    next_id: Mutex<i64>,
}

#[allow(clippy::unwrap_used)]
impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Times of all edits, in order
    pub fn edit_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| matches!(c, Call::Edit { .. }))
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn sends(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn documents(&self) -> Vec<(String, PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Document { chat, path } => Some((chat, path)),
                _ => None,
            })
            .collect()
    }

    /// Buttons attached to the last edit
    pub fn last_buttons(&self) -> Vec<Vec<Button>> {
        self.calls()
            .into_iter()
            .rev()
            .find_map(|c| match c {
                Call::Edit { buttons, .. } => Some(buttons),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push((Instant::now(), call));
    }
}

#[allow(clippy::unwrap_used)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, chat: &str, text: &str, _buttons: &[Vec<Button>]) -> Option<MessageHandle> {
        self.push(Call::Send {
            chat: chat.to_string(),
            text: text.to_string(),
        });
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Some(MessageHandle {
            id: *id,
            chat: chat.to_string(),
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str, buttons: &[Vec<Button>]) {
        self.push(Call::Edit {
            id: handle.id,
            text: text.to_string(),
            buttons: buttons.to_vec(),
        });
    }

    async fn send_document(&self, chat: &str, path: &Path) {
        self.push(Call::Document {
            chat: chat.to_string(),
            path: path.to_path_buf(),
        });
    }
}

/// Uploader with a fixed outcome
pub struct ScriptedUploader {
    provider: UploadProvider,
    link: Option<String>,
    fail_for: Option<String>,
}

impl ScriptedUploader {
    pub fn ok(provider: UploadProvider, link: &str) -> Arc<dyn Uploader> {
        Arc::new(Self {
            provider,
            link: Some(link.to_string()),
            fail_for: None,
        })
    }

    /// Succeeds for every file except the one named `file_name`
    pub fn ok_except(provider: UploadProvider, link: &str, file_name: &str) -> Arc<dyn Uploader> {
        Arc::new(Self {
            provider,
            link: Some(link.to_string()),
            fail_for: Some(file_name.to_string()),
        })
    }

    pub fn failing(provider: UploadProvider) -> Arc<dyn Uploader> {
        Arc::new(Self {
            provider,
            link: None,
            fail_for: None,
        })
    }
}

#[async_trait]
impl Uploader for ScriptedUploader {
    fn provider(&self) -> UploadProvider {
        self.provider
    }

    async fn upload(&self, path: &Path) -> Result<String, UploadError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let name = build_bot::utils::file_name(path);
        let excluded = self.fail_for.as_deref() == Some(name.as_str());
        match &self.link {
            Some(link) if !excluded => Ok(format!("{link}/{name}")),
            _ => Err(UploadError::Status {
                provider: self.provider,
                status: 503,
                body: "service unavailable".into(),
            }),
        }
    }
}
