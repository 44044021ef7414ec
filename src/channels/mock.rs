//! Filesystem mock adapter: every `.txt` file in a directory is one message.
//!
//! The file name is both the dedup key and the fetch reference; the first
//! non-blank line is the subject. Files are listed in name order.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::channels::{
    ChannelKind, DedupScope, InboundMessage, MessageContent, MessageFilter, MessageRef,
    SourceAdapter,
};
use crate::error::ChannelError;

const NAME: &str = "filesystem-mock";
const DEFAULT_SUBJECT: &str = "Reservation";

/// Directory-backed message source for local runs and tests.
pub struct MockAdapter {
    dir: PathBuf,
}

impl MockAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read(&self, file_name: &str) -> Result<String, ChannelError> {
        fs::read_to_string(self.dir.join(file_name))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ChannelError::NotFound {
                    name: NAME.into(),
                    reference: file_name.to_string(),
                },
                _ => ChannelError::QueryFailed {
                    name: NAME.into(),
                    reason: format!("read {file_name}: {e}"),
                },
            })
    }
}

/// First non-blank line, trimmed.
pub fn subject_of(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}

fn is_message_file(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".txt")
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::FilesystemMock
    }

    async fn list_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<InboundMessage>, ChannelError> {
        let query_failed = |e: std::io::Error| ChannelError::QueryFailed {
            name: NAME.into(),
            reason: format!("{}: {e}", self.dir.display()),
        };

        fs::create_dir_all(&self.dir).await.map_err(query_failed)?;
        let mut entries = fs::read_dir(&self.dir).await.map_err(query_failed)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(query_failed)? {
            let Ok(name) = entry.file_name().into_string() else {
                warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                continue;
            };
            if is_message_file(&name) && entry.file_type().await.is_ok_and(|t| t.is_file()) {
                names.push(name);
            }
        }
        names.sort();
        if let Some(limit) = filter.limit {
            names.truncate(limit);
        }

        let mut messages = Vec::with_capacity(names.len());
        for name in names {
            // Unreadable files are still listed so the fetch failure reaches
            // the ledger.
            let body = match self.read(&name).await {
                Ok(body) => Some(body),
                Err(e) => {
                    warn!(file = %name, error = %e, "Mock message unreadable at listing");
                    None
                }
            };
            messages.push(InboundMessage {
                channel: ChannelKind::FilesystemMock,
                dedup_key: name.clone(),
                dedup_scope: DedupScope::Channel,
                reference: MessageRef::new(name.as_str()),
                subject: body
                    .as_deref()
                    .and_then(subject_of)
                    .unwrap_or(DEFAULT_SUBJECT)
                    .to_string(),
                sender: None,
                received_at: None,
                content: body.map(MessageContent::text),
            });
        }
        debug!(dir = %self.dir.display(), count = messages.len(), "Mock listing");
        Ok(messages)
    }

    async fn fetch_body(&self, reference: &MessageRef) -> Result<MessageContent, ChannelError> {
        Ok(MessageContent::text(self.read(reference.as_str()).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_is_first_non_blank_line() {
        assert_eq!(subject_of("\n  \n  Booking #42 \nCustomer: X"), Some("Booking #42"));
        assert_eq!(subject_of(" \n"), None);
    }

    #[tokio::test]
    async fn lists_txt_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "Second\nbody").unwrap();
        std::fs::write(dir.path().join("a.TXT"), "\nFirst\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();

        let adapter = MockAdapter::new(dir.path());
        let messages = adapter.list_messages(&MessageFilter::default()).await.unwrap();
        let keys: Vec<&str> = messages.iter().map(|m| m.dedup_key.as_str()).collect();
        assert_eq!(keys, vec!["a.TXT", "b.txt", "empty.txt"]);

        assert_eq!(messages[0].subject, "First");
        assert_eq!(messages[2].subject, DEFAULT_SUBJECT);
        assert_eq!(messages[1].channel, ChannelKind::FilesystemMock);
        assert_eq!(messages[1].content.as_ref().unwrap().body, "Second\nbody");
    }

    #[tokio::test]
    async fn unreadable_file_is_listed_without_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("latin1.txt"), [0x43, 0x61, 0x66, 0xe9]).unwrap();

        let adapter = MockAdapter::new(dir.path());
        let messages = adapter.list_messages(&MessageFilter::default()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].dedup_key, "latin1.txt");
        assert_eq!(messages[0].dedup_scope, DedupScope::Channel);
        assert!(messages[0].content.is_none());
        assert!(matches!(
            adapter.fetch_body(&messages[0].reference).await,
            Err(ChannelError::QueryFailed { .. })
        ));
    }

    #[tokio::test]
    async fn listing_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            std::fs::write(dir.path().join(format!("{i}.txt")), "x").unwrap();
        }
        let adapter = MockAdapter::new(dir.path());
        let filter = MessageFilter {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(adapter.list_messages(&filter).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = MockAdapter::new(dir.path().join("inbox"));
        assert!(adapter.list_messages(&MessageFilter::default()).await.unwrap().is_empty());
        assert!(dir.path().join("inbox").is_dir());
    }

    #[tokio::test]
    async fn fetch_body_reads_file_or_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.txt"), "hello").unwrap();
        let adapter = MockAdapter::new(dir.path());

        let content = adapter.fetch_body(&MessageRef::new("m.txt")).await.unwrap();
        assert_eq!(content.body, "hello");
        assert!(matches!(
            adapter.fetch_body(&MessageRef::new("gone.txt")).await,
            Err(ChannelError::NotFound { .. })
        ));
    }
}
