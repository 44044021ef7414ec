//! One sweep of one channel: list, reconcile each message, acknowledge.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::channels::MessageRef;
use crate::error::IngestError;
use crate::pipeline::reconciler::{ChannelSource, Outcome, Reconciler};

/// Per-channel sweep counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub channel: String,
    pub created: usize,
    /// Duplicates plus ledgered skips.
    pub skipped: usize,
    /// Messages ledgered as failed, plus messages left unledgered for the
    /// next sweep.
    pub failed: usize,
    /// Set when a channel error stopped the sweep early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl ChannelReport {
    fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ..Default::default()
        }
    }
}

/// Run one sweep of `source`. Never fails: per-message errors are counted,
/// and connection or authentication errors end the sweep of this channel
/// only.
pub async fn ingest_once(reconciler: &Reconciler, source: &ChannelSource) -> ChannelReport {
    let mut report = ChannelReport::new(&source.name);

    let messages = match source.adapter.list_messages(&source.filter).await {
        Ok(messages) => messages,
        Err(e) => {
            error!(channel = %source.name, error = %e, "Listing failed, sweep aborted");
            report.aborted = Some(e.to_string());
            return report;
        }
    };

    let mut ledgered: Vec<MessageRef> = Vec::new();
    for message in &messages {
        match reconciler.ingest(source, message).await {
            Ok(outcome) => {
                match outcome {
                    Outcome::Created(_) => report.created += 1,
                    Outcome::Failed(_) => report.failed += 1,
                    _ => report.skipped += 1,
                }
                ledgered.push(message.reference.clone());
            }
            Err(IngestError::Channel(e)) if e.aborts_sweep() => {
                error!(channel = %source.name, key = %message.dedup_key, error = %e, "Channel failure, sweep aborted");
                report.failed += 1;
                report.aborted = Some(e.to_string());
                break;
            }
            Err(e) => {
                warn!(channel = %source.name, key = %message.dedup_key, error = %e, "Message failed, will retry next sweep");
                report.failed += 1;
            }
        }
    }

    if let Err(e) = source.adapter.acknowledge(&ledgered).await {
        warn!(channel = %source.name, error = %e, "Could not acknowledge processed messages");
    }

    info!(
        channel = %source.name,
        listed = messages.len(),
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        aborted = report.aborted.is_some(),
        "Sweep finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::channels::{
        ChannelKind, DedupScope, InboundMessage, MessageContent, MessageFilter, SourceAdapter,
    };
    use crate::bookings::LedgerOutcome;
    use crate::store::Database;
    use crate::error::ChannelError;
    use crate::fleet::{ResolveOptions, Vehicle};
    use crate::parsers::Dialect;
    use crate::store::{AttachmentStore, LibSqlBackend};

    const GOOD: &str = "Customer: Jane Roe\nStart: 16/08/2025\nEnd: 18/08/2025\nTotal: 240";

    /// Scripted adapter: bodies are fetched lazily, `None` bodies fail with
    /// the given error.
    struct Scripted {
        messages: Vec<(String, Option<String>)>,
        fetch_error: fn(&str) -> ChannelError,
        acknowledged: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn kind(&self) -> ChannelKind {
            ChannelKind::VendorApi
        }

        async fn list_messages(
            &self,
            _filter: &MessageFilter,
        ) -> Result<Vec<InboundMessage>, ChannelError> {
            Ok(self
                .messages
                .iter()
                .map(|(key, _)| InboundMessage {
                    channel: ChannelKind::VendorApi,
                    dedup_key: key.clone(),
                    dedup_scope: DedupScope::Channel,
                    reference: MessageRef::new(key.as_str()),
                    subject: String::new(),
                    sender: None,
                    received_at: None,
                    content: None,
                })
                .collect())
        }

        async fn fetch_body(&self, reference: &MessageRef) -> Result<MessageContent, ChannelError> {
            let body = self
                .messages
                .iter()
                .find(|(key, _)| key == reference.as_str())
                .and_then(|(_, body)| body.clone());
            body.map(MessageContent::text)
                .ok_or_else(|| (self.fetch_error)(reference.as_str()))
        }

        async fn acknowledge(&self, references: &[MessageRef]) -> Result<(), ChannelError> {
            self.acknowledged.fetch_add(references.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    fn not_found(reference: &str) -> ChannelError {
        ChannelError::NotFound {
            name: "scripted".into(),
            reference: reference.into(),
        }
    }

    fn server_error(_: &str) -> ChannelError {
        ChannelError::QueryFailed {
            name: "scripted".into(),
            reason: "HTTP 500".into(),
        }
    }

    fn auth_failed(_: &str) -> ChannelError {
        ChannelError::AuthFailed {
            name: "scripted".into(),
            reason: "token expired".into(),
        }
    }

    async fn setup(
        messages: Vec<(&str, Option<&str>)>,
        fetch_error: fn(&str) -> ChannelError,
    ) -> (
        Arc<LibSqlBackend>,
        Reconciler,
        ChannelSource,
        Arc<Scripted>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let company = db.insert_company("Acme", "ops@acme.gr").await.unwrap();
        db.insert_vehicle(&Vehicle::new(company.id, "Fiat", "500", "Compact"))
            .await
            .unwrap();
        let reconciler = Reconciler::new(
            db.clone(),
            db.clone(),
            AttachmentStore::new(dir.path()),
            ResolveOptions::default(),
        );
        let adapter = Arc::new(Scripted {
            messages: messages
                .into_iter()
                .map(|(k, b)| (k.to_string(), b.map(str::to_string)))
                .collect(),
            fetch_error,
            acknowledged: AtomicUsize::new(0),
        });
        let source = ChannelSource::new(adapter.clone(), company, Dialect::Generic);
        (db, reconciler, source, adapter, dir)
    }

    #[tokio::test]
    async fn per_message_errors_do_not_abort() {
        let (_db, reconciler, source, adapter, _dir) = setup(
            vec![("a", Some(GOOD)), ("gone", None), ("b", Some("Customer: X"))],
            not_found,
        )
        .await;

        let report = ingest_once(&reconciler, &source).await;
        assert_eq!(report.channel, "scripted:Acme");
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert!(report.aborted.is_none());
        assert_eq!(adapter.acknowledged.load(Ordering::SeqCst), 3);

        let again = ingest_once(&reconciler, &source).await;
        assert_eq!((again.created, again.skipped, again.failed), (0, 3, 0));
    }

    #[tokio::test]
    async fn failing_message_does_not_block_later_ones() {
        let (db, reconciler, source, adapter, _dir) =
            setup(vec![("poison", None), ("good", Some(GOOD))], server_error).await;

        let report = ingest_once(&reconciler, &source).await;
        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 1);
        assert!(report.aborted.is_none());
        assert_eq!(adapter.acknowledged.load(Ordering::SeqCst), 2);

        let key = format!("vendor-api:{}:poison", source.company.id);
        let entry = db.get_ledger_entry(&key).await.unwrap().unwrap();
        assert_eq!(entry.outcome, LedgerOutcome::Failed);
        assert!(entry.raw_snippet.contains("HTTP 500"));

        let again = ingest_once(&reconciler, &source).await;
        assert_eq!((again.created, again.skipped, again.failed), (0, 2, 0));
    }

    #[tokio::test]
    async fn auth_failure_aborts_the_channel_sweep() {
        let (_db, reconciler, source, _adapter, _dir) = setup(
            vec![("a", Some(GOOD)), ("locked", None), ("c", Some(GOOD))],
            auth_failed,
        )
        .await;

        let report = ingest_once(&reconciler, &source).await;
        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 1);
        assert!(report.aborted.as_deref().unwrap().contains("token expired"));
    }
}
