//! Mail provider boundary: message model, client trait and processed action.
//!
//! The dispatcher only ever talks to a `MailClient`; the IMAP
//! implementation lives in [`imap`] and is wrapped in [`SessionLimited`].

pub mod imap;
pub mod limit;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MailError};

pub use imap::{ImapConfig, ImapMailClient};
pub use limit::SessionLimited;

/// A file attached to a message.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name as given by the sender; may be empty.
    pub name: String,
    /// Decoded attachment bytes.
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Size of the decoded content in bytes.
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("size", &self.content.len())
            .finish()
    }
}

/// An unread message fetched from the mailbox. Immutable once fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Provider-specific identifier used to mark the message processed.
    pub id: String,
    /// Sender address.
    pub sender: String,
    /// Recipient addresses, in header order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl MailMessage {
    /// Short, single-line preview of the body for log output.
    pub fn body_preview(&self, max_chars: usize) -> String {
        let mut preview: String = self
            .body
            .chars()
            .take(max_chars)
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        if self.body.chars().count() > max_chars {
            preview.push_str("...");
        }
        preview
    }
}

/// Mailbox capability consumed by the dispatcher.
///
/// `mark_read` and `delete` are called concurrently from per-message tasks.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Fetch every unread message with full content and attachments.
    async fn list_unread(&self) -> Result<Vec<MailMessage>, MailError>;

    /// Mark a message as read.
    async fn mark_read(&self, message: &MailMessage) -> Result<(), MailError>;

    /// Delete a message.
    async fn delete(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// What happens to a message after its callback was delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProcessedAction {
    #[default]
    MarkRead,
    Delete,
}

impl ProcessedAction {
    /// Apply the action to `message` through `client`.
    pub async fn apply(
        &self,
        client: &dyn MailClient,
        message: &MailMessage,
    ) -> Result<(), MailError> {
        match self {
            Self::MarkRead => client.mark_read(message).await,
            Self::Delete => client.delete(message).await,
        }
    }
}

impl fmt::Display for ProcessedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MarkRead => "markRead",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ProcessedAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "markread" | "mark_read" => Ok(Self::MarkRead),
            "delete" => Ok(Self::Delete),
            _ => Err(ConfigError::InvalidValue {
                key: "processing.processedAction".into(),
                message: format!("'{s}' is not supported (supported: markRead, delete)"),
            }),
        }
    }
}
