//! Source adapters: where reservation messages come from.
//!
//! Every adapter lists messages on demand (a finite, freshly re-queried
//! batch) and fetches a message's content by reference. Connections are
//! opened per call and always torn down before the call returns.

pub mod mailbox;
pub mod mock;
pub mod vendor_api;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

pub use mailbox::{MailboxAdapter, MailboxConfig};
pub use mock::MockAdapter;
pub use vendor_api::{VendorApiAdapter, VendorApiConfig};

/// The kind of channel a message arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    Mailbox,
    VendorApi,
    FilesystemMock,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mailbox => "mailbox",
            Self::VendorApi => "vendor-api",
            Self::FilesystemMock => "filesystem-mock",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel-native handle for fetching a message's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef(String);

impl MessageRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single attachment part.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn is_pdf(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        content_type.contains("pdf")
            || ((content_type.is_empty() || content_type == "application/octet-stream")
                && self.filename.to_ascii_lowercase().ends_with(".pdf"))
    }
}

/// Body text plus attachment parts of one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageContent {
    /// Plain text, or HTML when the message had no text part.
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    /// First PDF attachment, if any.
    pub fn first_pdf(&self) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.is_pdf())
    }

    /// No body text and no attachment bytes.
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty() && self.attachments.iter().all(|a| a.bytes.is_empty())
    }
}

/// How widely a message's dedup key is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupScope {
    /// A transport-wide id such as `Message-ID` or `X-GM-MSGID`.
    Global,
    /// Only unique within one channel account (file names, API ids, UIDs).
    Channel,
}

/// One raw message as listed by an adapter.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: ChannelKind,
    /// Global message id when the channel has one, else a channel-local id.
    pub dedup_key: String,
    pub dedup_scope: DedupScope,
    pub reference: MessageRef,
    pub subject: String,
    pub sender: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    /// Present when listing already produced the content.
    pub content: Option<MessageContent>,
}

/// Narrowing options for `SourceAdapter::list_messages`.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub sender: Option<String>,
    /// Channel-native query, used verbatim when set.
    pub raw_query: Option<String>,
    /// Also list messages a previous run has already seen.
    pub include_seen: bool,
    /// Maximum number of messages, newest first.
    pub limit: Option<usize>,
}

/// A source of reservation messages.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter name for logging (e.g. "mailbox").
    fn name(&self) -> &str;

    fn kind(&self) -> ChannelKind;

    /// List the messages currently matching `filter`.
    async fn list_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<InboundMessage>, ChannelError>;

    /// Fetch body text and attachments for a listed message.
    async fn fetch_body(&self, reference: &MessageRef) -> Result<MessageContent, ChannelError>;

    /// Called once per sweep with every message that got a ledger entry.
    async fn acknowledge(&self, _references: &[MessageRef]) -> Result<(), ChannelError> {
        Ok(())
    }
}
