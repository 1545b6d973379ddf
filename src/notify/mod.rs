//! Status notifications
//!
//! [`Notifier`] is the boundary to the messaging service. Implementations
//! degrade gracefully: transport problems are logged and reported as an
//! absent handle, never as an error that could abort a build.
//!
//! [`StatusNotifier`] owns the single status message of a build attempt. It
//! is created once and every later render edits it in place.

mod attachment;
pub mod render;
mod telegram;

pub use telegram::TelegramNotifier;

use crate::types::{Button, MessageHandle};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Messaging service boundary
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a new message; `None` when it could not be delivered
    async fn send(&self, chat: &str, text: &str, buttons: &[Vec<Button>]) -> Option<MessageHandle>;

    /// Replace the text (and buttons) of an existing message
    async fn edit(&self, handle: &MessageHandle, text: &str, buttons: &[Vec<Button>]);

    /// Attach a file to `chat`; a missing file is skipped
    async fn send_document(&self, chat: &str, path: &Path);
}

/// Notifier that drops everything
///
/// Useful for running the pipelines without a messaging backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpNotifier;

#[async_trait]
impl Notifier for NoOpNotifier {
    async fn send(&self, chat: &str, _text: &str, _buttons: &[Vec<Button>]) -> Option<MessageHandle> {
        tracing::debug!(chat, "notifications disabled, message dropped");
        None
    }

    async fn edit(&self, _handle: &MessageHandle, _text: &str, _buttons: &[Vec<Button>]) {}

    async fn send_document(&self, chat: &str, path: &Path) {
        tracing::debug!(chat, file = %path.display(), "notifications disabled, document dropped");
    }
}

/// Lifecycle of one remote status message
///
/// `update` before a successful `create` is a no-op, which tolerates a
/// failed initial send without special cases at call sites.
pub struct StatusNotifier {
    notifier: Arc<dyn Notifier>,
    chat: String,
    handle: Option<MessageHandle>,
}

impl StatusNotifier {
    /// New notifier targeting `chat`, with no message yet
    pub fn new(notifier: Arc<dyn Notifier>, chat: impl Into<String>) -> Self {
        Self {
            notifier,
            chat: chat.into(),
            handle: None,
        }
    }

    /// Reuse a message created elsewhere (e.g. by an earlier phase)
    pub fn with_handle(notifier: Arc<dyn Notifier>, handle: Option<MessageHandle>) -> Self {
        let chat = handle.as_ref().map(|h| h.chat.clone()).unwrap_or_default();
        Self {
            notifier,
            chat,
            handle,
        }
    }

    /// Create the status message
    ///
    /// A live message is never recreated: a second call edits it instead.
    pub async fn create(&mut self, text: &str) -> Option<&MessageHandle> {
        if self.handle.is_some() {
            tracing::debug!("status message already exists, editing instead");
            self.update(text, &[]).await;
        } else {
            self.handle = self.notifier.send(&self.chat, text, &[]).await;
        }
        self.handle.as_ref()
    }

    /// Render new text into the status message, if one exists
    pub async fn update(&self, text: &str, buttons: &[Vec<Button>]) {
        match &self.handle {
            Some(handle) => self.notifier.edit(handle, text, buttons).await,
            None => tracing::trace!("no status message, update skipped"),
        }
    }

    /// Handle of the live message
    pub fn handle(&self) -> Option<&MessageHandle> {
        self.handle.as_ref()
    }

    /// Give up ownership of the handle (for the next phase)
    pub fn into_handle(self) -> Option<MessageHandle> {
        self.handle
    }

    /// Underlying notifier, for documents and messages to other chats
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }
}

impl std::fmt::Debug for StatusNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusNotifier")
            .field("chat", &self.chat)
            .field("handle", &self.handle)
            .finish()
    }
}
