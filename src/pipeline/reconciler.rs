//! Booking reconciler: turns one inbound message into at most one booking.
//!
//! Flow per message:
//! 1. ledger hit on the dedup key → `SkippedDuplicate`
//! 2. fetch content, store the PDF, extract text, parse with the channel's dialect
//! 3. missing name/dates or inverted dates → ledger skip, `SkippedUnresolved`
//! 4. vehicle resolution failure → ledger skip, `SkippedNoVehicle`
//! 5. booking + ledger entry in one transaction → `Created`
//!
//! A body that cannot be fetched or a document that cannot be stored is
//! ledgered as `failed` with the error text. Only `PersistenceConflict`,
//! database errors and connection/authentication failures leave the message
//! without a ledger entry, so the next sweep retries it.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bookings::model::{Booking, LedgerOutcome, NewBooking, NewLedgerEntry};
use crate::channels::{DedupScope, InboundMessage, MessageFilter, SourceAdapter};
use crate::error::{DatabaseError, IngestError};
use crate::extract::extract_message_text;
use crate::fleet::{Company, FleetDirectory, ResolveOptions, VehicleFilter, VehicleHints, resolve};
use crate::parsers::Dialect;
use crate::store::{AttachmentStore, Database};

/// One configured intake channel: an adapter bound to a company and dialect.
pub struct ChannelSource {
    /// Display name, e.g. `mailbox:acme`.
    pub name: String,
    pub adapter: Arc<dyn SourceAdapter>,
    pub company: Company,
    pub dialect: Dialect,
    pub filter: MessageFilter,
}

impl ChannelSource {
    pub fn new(adapter: Arc<dyn SourceAdapter>, company: Company, dialect: Dialect) -> Self {
        Self {
            name: format!("{}:{}", adapter.name(), company.name),
            adapter,
            company,
            dialect,
            filter: MessageFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: MessageFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Ledger key for `message`. Channel-local keys are prefixed with the
    /// channel kind and company, so equal file names or API ids in two
    /// inboxes stay distinct.
    pub fn ledger_key(&self, message: &InboundMessage) -> String {
        match message.dedup_scope {
            DedupScope::Global => message.dedup_key.clone(),
            DedupScope::Channel => format!(
                "{}:{}:{}",
                message.channel, self.company.id, message.dedup_key
            ),
        }
    }
}

/// Result of ingesting one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created(Box<Booking>),
    /// The dedup key was already ledgered.
    SkippedDuplicate,
    /// Required fields missing, dates inverted, or no usable content.
    SkippedUnresolved,
    /// No single vehicle could be resolved.
    SkippedNoVehicle,
    /// Fetching or storing the message failed; ledgered with the reason.
    Failed(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::SkippedUnresolved => "skipped_unresolved",
            Self::SkippedNoVehicle => "skipped_no_vehicle",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of the manual text path.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualOutcome {
    pub booking: Booking,
    /// `false` when an existing booking matched the composite key.
    pub created: bool,
}

/// Reconciles parsed messages against the fleet and the ledger.
pub struct Reconciler {
    db: Arc<dyn Database>,
    fleet: Arc<dyn FleetDirectory>,
    documents: AttachmentStore,
    options: ResolveOptions,
}

impl Reconciler {
    pub fn new(
        db: Arc<dyn Database>,
        fleet: Arc<dyn FleetDirectory>,
        documents: AttachmentStore,
        options: ResolveOptions,
    ) -> Self {
        Self {
            db,
            fleet,
            documents,
            options,
        }
    }

    /// Ingest one listed message from `source`.
    pub async fn ingest(
        &self,
        source: &ChannelSource,
        message: &InboundMessage,
    ) -> Result<Outcome, IngestError> {
        let key = source.ledger_key(message);
        let key = key.as_str();
        if self.db.get_ledger_entry(key).await?.is_some() {
            debug!(channel = %source.name, key, "Already ledgered");
            return Ok(Outcome::SkippedDuplicate);
        }

        let content = match &message.content {
            Some(content) => content.clone(),
            None => match source.adapter.fetch_body(&message.reference).await {
                Ok(content) => content,
                Err(e) if e.aborts_sweep() => return Err(e.into()),
                Err(e) => return self.record_failure(source, key, message, e.to_string()).await,
            },
        };
        if content.is_empty() {
            self.record_skip(key, message, "", LedgerOutcome::SkippedNoContent)
                .await?;
            return Ok(Outcome::SkippedUnresolved);
        }

        let document = match content.first_pdf() {
            Some(pdf) => match self
                .documents
                .save(source.company.id, &pdf.filename, &pdf.bytes)
                .await
            {
                Ok(path) => Some(path),
                Err(e) => return self.record_failure(source, key, message, e.to_string()).await,
            },
            None => None,
        };

        let text = extract_message_text(&content);
        let parsed = source.dialect.parse(&text);

        let new_booking = match NewBooking::from_parsed(source.company.id, &parsed) {
            Ok(new_booking) => new_booking,
            Err(e) => {
                info!(channel = %source.name, key, reason = %e, "Skipping unresolved message");
                self.record_skip(key, message, &text, LedgerOutcome::SkippedUnresolved)
                    .await?;
                return Ok(Outcome::SkippedUnresolved);
            }
        };

        let fleet = self
            .fleet
            .list_vehicles(source.company.id, &VehicleFilter::default())
            .await?;
        let vehicle = match resolve(&fleet, &VehicleHints::from_parsed(&parsed), &self.options) {
            Ok(vehicle) => vehicle,
            Err(e) => {
                info!(channel = %source.name, key, reason = %e, "Skipping message without vehicle");
                let snippet = format!("{e}\n\n{text}");
                self.record_skip(key, message, &snippet, LedgerOutcome::SkippedNoVehicle)
                    .await?;
                return Ok(Outcome::SkippedNoVehicle);
            }
        };

        let new_booking = new_booking
            .with_vehicle(vehicle.id)
            .with_source(key, document);
        let entry = ledger_entry(key, message, &text, LedgerOutcome::Created);

        match self
            .db
            .create_booking_with_ledger(&new_booking, &entry)
            .await
        {
            Ok(booking) => {
                info!(
                    channel = %source.name,
                    key,
                    booking = %booking.id,
                    code = %booking.booking_code,
                    vehicle = %vehicle,
                    "Booking created"
                );
                Ok(Outcome::Created(Box::new(booking)))
            }
            Err(DatabaseError::Constraint(reason) | DatabaseError::Transaction(reason)) => {
                warn!(channel = %source.name, key, %reason, "Booking write rolled back");
                Err(IngestError::PersistenceConflict(reason))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create or refresh a booking from pasted text.
    ///
    /// Bookings are matched on (company, customer name, start, end, total).
    /// A match only gets its vehicle filled in when it had none, and its
    /// phone overwritten when the text carries one.
    pub async fn ingest_manual_text(
        &self,
        company: &Company,
        text: &str,
        dialect: Dialect,
    ) -> Result<ManualOutcome, IngestError> {
        let parsed = dialect.parse(text);
        let new_booking = NewBooking::from_parsed(company.id, &parsed)?;

        let fleet = self
            .fleet
            .list_vehicles(company.id, &VehicleFilter::default())
            .await?;
        let vehicle = resolve(&fleet, &VehicleHints::from_parsed(&parsed), &self.options)?;

        let existing = self
            .db
            .find_booking_by_composite(
                company.id,
                &new_booking.customer_name,
                new_booking.start_date,
                new_booking.end_date,
                new_booking.total_price,
            )
            .await?;

        if let Some(existing) = existing {
            let booking = self
                .db
                .refresh_booking(
                    existing.id,
                    Some(vehicle.id),
                    new_booking.customer_phone.as_deref(),
                )
                .await?;
            debug!(booking = %booking.id, code = %booking.booking_code, "Manual import matched existing booking");
            return Ok(ManualOutcome {
                booking,
                created: false,
            });
        }

        let booking = self
            .db
            .create_booking(&new_booking.with_vehicle(vehicle.id))
            .await?;
        info!(booking = %booking.id, code = %booking.booking_code, "Manual booking created");
        Ok(ManualOutcome {
            booking,
            created: true,
        })
    }

    async fn record_skip(
        &self,
        key: &str,
        message: &InboundMessage,
        snippet: &str,
        outcome: LedgerOutcome,
    ) -> Result<(), IngestError> {
        let written = self
            .db
            .record_ledger_entry(&ledger_entry(key, message, snippet, outcome))
            .await?;
        if !written {
            debug!(key, "Skip already ledgered by a concurrent sweep");
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        source: &ChannelSource,
        key: &str,
        message: &InboundMessage,
        reason: String,
    ) -> Result<Outcome, IngestError> {
        warn!(channel = %source.name, key, %reason, "Message failed, ledgered");
        self.record_skip(key, message, &reason, LedgerOutcome::Failed)
            .await?;
        Ok(Outcome::Failed(reason))
    }
}

fn ledger_entry(
    key: &str,
    message: &InboundMessage,
    snippet: &str,
    outcome: LedgerOutcome,
) -> NewLedgerEntry {
    NewLedgerEntry::new(
        key,
        message.channel.as_str(),
        message.subject.as_str(),
        message.received_at,
        snippet,
        outcome,
    )
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::bookings::model::BookingStatus;
    use crate::channels::{Attachment, ChannelKind, MessageContent, MessageRef, MockAdapter};
    use crate::fleet::Vehicle;
    use crate::store::LibSqlBackend;

    const BOOKING_TEXT: &str = "Customer: Jane Roe\nPhone: +30 6912345678\n\
        Start: 16/08/2025\nEnd: 18/08/2025\nCategory: Compact\nTotal: 240,00";

    struct Fixture {
        db: Arc<LibSqlBackend>,
        reconciler: Reconciler,
        source: ChannelSource,
        _dir: tempfile::TempDir,
    }

    async fn fixture(vehicles: &[(&str, &str, &str)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let company = db.insert_company("Acme", "ops@acme.gr").await.unwrap();
        for (brand, model, category) in vehicles {
            db.insert_vehicle(&Vehicle::new(company.id, brand, model, category))
                .await
                .unwrap();
        }
        let reconciler = Reconciler::new(
            db.clone(),
            db.clone(),
            AttachmentStore::new(dir.path().join("media")),
            ResolveOptions::default(),
        );
        let adapter = Arc::new(MockAdapter::new(dir.path().join("inbox")));
        let source = ChannelSource::new(adapter, company, Dialect::Generic);
        Fixture {
            db,
            reconciler,
            source,
            _dir: dir,
        }
    }

    fn message(key: &str, content: MessageContent) -> InboundMessage {
        InboundMessage {
            channel: ChannelKind::FilesystemMock,
            dedup_key: key.into(),
            dedup_scope: DedupScope::Global,
            reference: MessageRef::new(key),
            subject: "Reservation".into(),
            sender: None,
            received_at: None,
            content: Some(content),
        }
    }

    #[tokio::test]
    async fn creates_booking_once() {
        let f = fixture(&[("Fiat", "500", "Compact"), ("Toyota", "Yaris", "Economy")]).await;
        let msg = message("m1.txt", MessageContent::text(BOOKING_TEXT));

        let outcome = f.reconciler.ingest(&f.source, &msg).await.unwrap();
        let Outcome::Created(booking) = outcome else {
            panic!("expected a booking, got {outcome}");
        };
        assert_eq!(booking.status, BookingStatus::Imported);
        assert_eq!(booking.total_price, Some(dec!(240.00)));
        assert_eq!(booking.booking_code, "BK-000001");
        assert_eq!(booking.source_message_id.as_deref(), Some("m1.txt"));

        let again = f.reconciler.ingest(&f.source, &msg).await.unwrap();
        assert_eq!(again, Outcome::SkippedDuplicate);
        assert_eq!(f.db.list_bookings(f.source.company.id, None).await.unwrap().len(), 1);

        let entry = f.db.get_ledger_entry("m1.txt").await.unwrap().unwrap();
        assert_eq!(entry.outcome, LedgerOutcome::Created);
        assert_eq!(entry.booking_id, Some(booking.id));
    }

    #[tokio::test]
    async fn missing_end_date_is_ledgered_as_unresolved() {
        let f = fixture(&[("Fiat", "500", "Compact")]).await;
        let msg = message("m2.txt", MessageContent::text("Customer: Jane Roe\nStart: 16/08/2025"));

        assert_eq!(
            f.reconciler.ingest(&f.source, &msg).await.unwrap(),
            Outcome::SkippedUnresolved
        );
        let entry = f.db.get_ledger_entry("m2.txt").await.unwrap().unwrap();
        assert_eq!(entry.outcome, LedgerOutcome::SkippedUnresolved);
        assert!(entry.booking_id.is_none());
        assert!(f.db.list_bookings(f.source.company.id, None).await.unwrap().is_empty());

        // Never re-processed.
        assert_eq!(
            f.reconciler.ingest(&f.source, &msg).await.unwrap(),
            Outcome::SkippedDuplicate
        );
    }

    #[tokio::test]
    async fn ambiguous_vehicle_is_ledgered_with_diagnostics() {
        let f = fixture(&[("Fiat", "500", "Compact"), ("Fiat", "Panda", "Compact")]).await;
        let text = "Customer: Jane Roe\nStart: 16/08/2025\nEnd: 18/08/2025\nVehicle: Fiat";
        let msg = message("m3.txt", MessageContent::text(text));

        assert_eq!(
            f.reconciler.ingest(&f.source, &msg).await.unwrap(),
            Outcome::SkippedNoVehicle
        );
        let entry = f.db.get_ledger_entry("m3.txt").await.unwrap().unwrap();
        assert_eq!(entry.outcome, LedgerOutcome::SkippedNoVehicle);
        assert!(entry.raw_snippet.starts_with("ambiguous vehicle"));
        assert!(entry.raw_snippet.contains("Fiat Panda"));
    }

    #[tokio::test]
    async fn empty_message_is_ledgered_as_no_content() {
        let f = fixture(&[("Fiat", "500", "Compact")]).await;
        let msg = message("m4.txt", MessageContent::text("   "));

        assert_eq!(
            f.reconciler.ingest(&f.source, &msg).await.unwrap(),
            Outcome::SkippedUnresolved
        );
        let entry = f.db.get_ledger_entry("m4.txt").await.unwrap().unwrap();
        assert_eq!(entry.outcome, LedgerOutcome::SkippedNoContent);
    }

    #[tokio::test]
    async fn pdf_attachment_is_stored_even_if_unreadable() {
        let f = fixture(&[("Fiat", "500", "Compact")]).await;
        let content = MessageContent {
            body: BOOKING_TEXT.into(),
            attachments: vec![Attachment {
                filename: "voucher.pdf".into(),
                content_type: "application/pdf".into(),
                bytes: b"%PDF-broken".to_vec(),
            }],
        };

        let outcome = f
            .reconciler
            .ingest(&f.source, &message("m5", content))
            .await
            .unwrap();
        let Outcome::Created(booking) = outcome else {
            panic!("expected a booking, got {outcome}");
        };
        let path = booking.raw_document_path.unwrap();
        assert!(path.starts_with(&format!("bookings/{}/", f.source.company.id)));
        assert!(path.ends_with("/voucher.pdf"));
    }

    #[tokio::test]
    async fn channel_local_keys_are_scoped_per_company() {
        let f = fixture(&[("Fiat", "500", "Compact")]).await;
        let beta = f.db.insert_company("Beta", "ops@beta.gr").await.unwrap();
        f.db.insert_vehicle(&Vehicle::new(beta.id, "Fiat", "500", "Compact"))
            .await
            .unwrap();
        let beta_source = ChannelSource::new(
            Arc::new(MockAdapter::new(f._dir.path().join("beta"))),
            beta.clone(),
            Dialect::Generic,
        );

        let mut msg = message("1.txt", MessageContent::text(BOOKING_TEXT));
        msg.dedup_scope = DedupScope::Channel;

        assert!(f.reconciler.ingest(&f.source, &msg).await.unwrap().is_created());
        assert!(f.reconciler.ingest(&beta_source, &msg).await.unwrap().is_created());
        assert_eq!(f.db.list_bookings(beta.id, None).await.unwrap().len(), 1);

        let key = beta_source.ledger_key(&msg);
        assert_eq!(key, format!("filesystem-mock:{}:1.txt", beta.id));
        assert!(f.db.get_ledger_entry(&key).await.unwrap().is_some());
        assert_eq!(
            f.reconciler.ingest(&beta_source, &msg).await.unwrap(),
            Outcome::SkippedDuplicate
        );
    }

    #[tokio::test]
    async fn global_keys_are_not_scoped() {
        let f = fixture(&[]).await;
        let msg = message("abc@vendor.example", MessageContent::default());
        assert_eq!(f.source.ledger_key(&msg), "abc@vendor.example");
    }

    #[tokio::test]
    async fn fetch_failure_is_ledgered_as_failed() {
        let f = fixture(&[("Fiat", "500", "Compact")]).await;
        let mut msg = message("vanished.txt", MessageContent::default());
        msg.content = None;

        let outcome = f.reconciler.ingest(&f.source, &msg).await.unwrap();
        assert!(matches!(outcome, Outcome::Failed(ref reason) if reason.contains("vanished.txt")));
        let entry = f.db.get_ledger_entry("vanished.txt").await.unwrap().unwrap();
        assert_eq!(entry.outcome, LedgerOutcome::Failed);
        assert!(entry.raw_snippet.contains("not found"));

        assert_eq!(
            f.reconciler.ingest(&f.source, &msg).await.unwrap(),
            Outcome::SkippedDuplicate
        );
    }

    #[tokio::test]
    async fn storage_failure_is_ledgered_as_failed() {
        let f = fixture(&[("Fiat", "500", "Compact")]).await;
        let blocked = f._dir.path().join("blocked");
        std::fs::write(&blocked, "not a directory").unwrap();
        let reconciler = Reconciler::new(
            f.db.clone(),
            f.db.clone(),
            AttachmentStore::new(&blocked),
            ResolveOptions::default(),
        );
        let content = MessageContent {
            body: BOOKING_TEXT.into(),
            attachments: vec![Attachment {
                filename: "voucher.pdf".into(),
                content_type: "application/pdf".into(),
                bytes: b"%PDF-1.4".to_vec(),
            }],
        };

        let outcome = reconciler
            .ingest(&f.source, &message("m6", content))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Failed(_)));
        let entry = f.db.get_ledger_entry("m6").await.unwrap().unwrap();
        assert_eq!(entry.outcome, LedgerOutcome::Failed);
        assert!(f.db.list_bookings(f.source.company.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn manual_text_is_get_or_create() {
        let f = fixture(&[("Fiat", "500", "Compact")]).await;
        let company = f.source.company.clone();

        let first = f
            .reconciler
            .ingest_manual_text(&company, BOOKING_TEXT, Dialect::Generic)
            .await
            .unwrap();
        assert!(first.created);

        let updated_text = BOOKING_TEXT.replace("+30 6912345678", "+30 6999999999");
        let second = f
            .reconciler
            .ingest_manual_text(&company, &updated_text, Dialect::Generic)
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.booking.id, first.booking.id);
        assert_eq!(second.booking.customer_phone.as_deref(), Some("+30 6999999999"));
        assert_eq!(second.booking.booking_code, first.booking.booking_code);
    }

    #[tokio::test]
    async fn manual_text_surfaces_missing_fields() {
        let f = fixture(&[("Fiat", "500", "Compact")]).await;
        let err = f
            .reconciler
            .ingest_manual_text(&f.source.company, "Customer: Jane Roe", Dialect::Generic)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingRequiredFields { .. }));
    }
}
