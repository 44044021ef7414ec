//! Unified `Database` trait: single async interface for bookings and the
//! intake ledger.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::bookings::model::{
    Booking, BookingStatus, IngestLedgerEntry, NewBooking, NewLedgerEntry, StatusChange,
};
use crate::error::{BookingError, DatabaseError};

/// Backend-agnostic persistence for the intake core.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Ledger ──────────────────────────────────────────────────────

    /// Look up the ledger entry for a dedup key.
    async fn get_ledger_entry(
        &self,
        dedup_key: &str,
    ) -> Result<Option<IngestLedgerEntry>, DatabaseError>;

    /// Record a skip. Returns `false` if the key was already ledgered, in
    /// which case nothing is written.
    async fn record_ledger_entry(&self, entry: &NewLedgerEntry) -> Result<bool, DatabaseError>;

    /// Most recent ledger entries, optionally for one channel.
    async fn list_ledger_entries(
        &self,
        channel: Option<&str>,
        limit: usize,
    ) -> Result<Vec<IngestLedgerEntry>, DatabaseError>;

    // ── Bookings ────────────────────────────────────────────────────

    /// Create an `imported` booking with the company's next booking code.
    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking, DatabaseError>;

    /// Create a booking and its `created` ledger entry in one transaction.
    /// Fails without writing either if the ledger key already exists.
    async fn create_booking_with_ledger(
        &self,
        booking: &NewBooking,
        entry: &NewLedgerEntry,
    ) -> Result<Booking, DatabaseError>;

    /// Get a booking by ID.
    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, DatabaseError>;

    /// Find a booking by (company, customer name, start, end, total).
    async fn find_booking_by_composite(
        &self,
        company_id: Uuid,
        customer_name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        total_price: Option<Decimal>,
    ) -> Result<Option<Booking>, DatabaseError>;

    /// Fill in a missing vehicle and overwrite the phone, if given.
    async fn refresh_booking(
        &self,
        id: Uuid,
        vehicle_id: Option<Uuid>,
        customer_phone: Option<&str>,
    ) -> Result<Booking, DatabaseError>;

    /// A company's bookings, newest first, optionally by status.
    async fn list_bookings(
        &self,
        company_id: Uuid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, DatabaseError>;

    /// Apply a status change together with its vehicle flag flip in one
    /// transaction.
    async fn apply_status_change(&self, change: &StatusChange) -> Result<Booking, BookingError>;
}
