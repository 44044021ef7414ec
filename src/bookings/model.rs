//! Booking data model: bookings, their lifecycle status and the intake ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IngestError;
use crate::parsers::ParsedBooking;
use crate::parsers::normalize::truncate_chars;

/// Characters of source text kept on a ledger entry.
pub const LEDGER_SNIPPET_LIMIT: usize = 1000;

/// Lifecycle status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Created by intake, vehicle not yet handed over.
    Imported,
    /// Vehicle handed over and locked to this booking.
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Allowed moves: imported → active | cancelled, active → completed |
    /// cancelled. Nothing moves backward or out of a terminal state.
    pub fn can_transition_to(&self, to: BookingStatus) -> bool {
        matches!(
            (self, to),
            (Self::Imported, Self::Active)
                | (Self::Imported, Self::Cancelled)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "imported" => Ok(Self::Imported),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown booking status '{other}'")),
        }
    }
}

/// A durable booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub company_id: Uuid,
    /// Required before activation.
    pub vehicle_id: Option<Uuid>,
    /// Company-scoped code, assigned once at creation (`BK-000001`).
    pub booking_code: String,
    pub customer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub total_price: Option<Decimal>,
    pub extra_insurance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_category: Option<String>,
    pub status: BookingStatus,
    /// Ledger key of the message this booking came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message_id: Option<String>,
    /// Stored copy of the source document, relative to the storage root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_document_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Format the n-th booking code of a company.
pub fn format_booking_code(sequence: i64) -> String {
    format!("BK-{sequence:06}")
}

/// Fields needed to create a booking. Code, status and timestamps are
/// assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub company_id: Uuid,
    pub vehicle_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_price: Option<Decimal>,
    pub extra_insurance: bool,
    pub requested_category: Option<String>,
    pub source_message_id: Option<String>,
    pub raw_document_path: Option<String>,
}

impl NewBooking {
    /// Build from parsed fields, enforcing required fields and date order.
    pub fn from_parsed(company_id: Uuid, parsed: &ParsedBooking) -> Result<Self, IngestError> {
        let (Some(customer_name), Some(start_date), Some(end_date)) = (
            parsed.customer_name.clone(),
            parsed.start_date,
            parsed.end_date,
        ) else {
            return Err(IngestError::MissingRequiredFields {
                fields: parsed.missing_required(),
            });
        };
        if end_date < start_date {
            return Err(IngestError::InvalidDateRange {
                start: start_date,
                end: end_date,
            });
        }
        Ok(Self {
            company_id,
            vehicle_id: None,
            customer_name,
            customer_phone: parsed.customer_phone.clone(),
            customer_email: parsed.customer_email.clone(),
            start_date,
            end_date,
            total_price: parsed.total_price,
            extra_insurance: parsed.extra_insurance,
            requested_category: parsed.requested_category.clone(),
            source_message_id: None,
            raw_document_path: None,
        })
    }

    pub fn with_vehicle(mut self, vehicle_id: Uuid) -> Self {
        self.vehicle_id = Some(vehicle_id);
        self
    }

    pub fn with_source(mut self, dedup_key: impl Into<String>, document: Option<String>) -> Self {
        self.source_message_id = Some(dedup_key.into());
        self.raw_document_path = document;
        self
    }
}

/// Result recorded on a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOutcome {
    Created,
    /// Required fields missing or dates inverted.
    SkippedUnresolved,
    /// No single vehicle could be resolved.
    SkippedNoVehicle,
    /// Neither body nor attachment carried text.
    SkippedNoContent,
    /// The message could not be fetched or stored; the snippet holds the error.
    Failed,
}

impl LedgerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::SkippedUnresolved => "skipped_unresolved",
            Self::SkippedNoVehicle => "skipped_no_vehicle",
            Self::SkippedNoContent => "skipped_no_content",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for LedgerOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "skipped_unresolved" => Ok(Self::SkippedUnresolved),
            "skipped_no_vehicle" => Ok(Self::SkippedNoVehicle),
            "skipped_no_content" => Ok(Self::SkippedNoContent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown ledger outcome '{other}'")),
        }
    }
}

impl fmt::Display for LedgerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted idempotency record. One per dedup key, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestLedgerEntry {
    pub dedup_key: String,
    pub channel: String,
    pub subject: String,
    pub received_at: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
    pub raw_snippet: String,
    pub outcome: LedgerOutcome,
    pub booking_id: Option<Uuid>,
}

/// A ledger entry about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub dedup_key: String,
    pub channel: String,
    pub subject: String,
    pub received_at: Option<DateTime<Utc>>,
    pub raw_snippet: String,
    pub outcome: LedgerOutcome,
}

impl NewLedgerEntry {
    /// The snippet is truncated to `LEDGER_SNIPPET_LIMIT` characters.
    pub fn new(
        dedup_key: impl Into<String>,
        channel: impl Into<String>,
        subject: impl Into<String>,
        received_at: Option<DateTime<Utc>>,
        snippet: &str,
        outcome: LedgerOutcome,
    ) -> Self {
        Self {
            dedup_key: dedup_key.into(),
            channel: channel.into(),
            subject: subject.into(),
            received_at,
            raw_snippet: truncate_chars(snippet, LEDGER_SNIPPET_LIMIT),
            outcome,
        }
    }
}

/// A status change applied atomically by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub booking_id: Uuid,
    /// Applied only if the booking is still in this status.
    pub expected_from: BookingStatus,
    pub to: BookingStatus,
    /// Lock (`true`) or release (`false`) the booking's vehicle.
    pub vehicle_rented: Option<bool>,
    /// Reject the change if another active booking on the same vehicle
    /// overlaps this window.
    pub exclusive_window: Option<(NaiveDate, NaiveDate)>,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn transitions_only_move_forward() {
        use BookingStatus::*;
        assert!(Imported.can_transition_to(Active));
        assert!(Imported.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Cancelled));
        assert!(!Imported.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Imported));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Imported));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            BookingStatus::Imported,
            BookingStatus::Active,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!("archived".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn booking_code_is_zero_padded() {
        assert_eq!(format_booking_code(1), "BK-000001");
        assert_eq!(format_booking_code(1234567), "BK-1234567");
    }

    #[test]
    fn new_booking_requires_name_and_dates() {
        let parsed = ParsedBooking {
            customer_name: Some("Jane Roe".into()),
            start_date: NaiveDate::from_ymd_opt(2025, 8, 18),
            ..Default::default()
        };
        let err = NewBooking::from_parsed(Uuid::new_v4(), &parsed).unwrap_err();
        match err {
            IngestError::MissingRequiredFields { fields } => assert_eq!(fields, vec!["end_date"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn new_booking_rejects_inverted_dates() {
        let parsed = ParsedBooking {
            customer_name: Some("Jane Roe".into()),
            start_date: NaiveDate::from_ymd_opt(2025, 8, 20),
            end_date: NaiveDate::from_ymd_opt(2025, 8, 18),
            ..Default::default()
        };
        assert!(matches!(
            NewBooking::from_parsed(Uuid::new_v4(), &parsed),
            Err(IngestError::InvalidDateRange { .. })
        ));
    }

    #[test]
    fn new_booking_copies_parsed_fields() {
        let company = Uuid::new_v4();
        let parsed = ParsedBooking {
            customer_name: Some("Jane Roe".into()),
            customer_phone: Some("2810 123456".into()),
            start_date: NaiveDate::from_ymd_opt(2025, 8, 18),
            end_date: NaiveDate::from_ymd_opt(2025, 8, 18),
            total_price: Some(dec!(99.90)),
            extra_insurance: true,
            ..Default::default()
        };
        let vehicle = Uuid::new_v4();
        let booking = NewBooking::from_parsed(company, &parsed)
            .unwrap()
            .with_vehicle(vehicle)
            .with_source("msg-1", Some("bookings/a.pdf".into()));
        assert_eq!(booking.company_id, company);
        assert_eq!(booking.vehicle_id, Some(vehicle));
        assert_eq!(booking.total_price, Some(dec!(99.90)));
        assert!(booking.extra_insurance);
        assert_eq!(booking.source_message_id.as_deref(), Some("msg-1"));
    }

    #[test]
    fn ledger_snippet_is_truncated() {
        let long = "α".repeat(LEDGER_SNIPPET_LIMIT + 50);
        let entry = NewLedgerEntry::new(
            "k",
            "mock",
            "subject",
            None,
            &long,
            LedgerOutcome::SkippedUnresolved,
        );
        assert_eq!(entry.raw_snippet.chars().count(), LEDGER_SNIPPET_LIMIT);
    }
}
