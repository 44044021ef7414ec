//! libSQL backend: async `Database` and `FleetDirectory` implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! shared behind an async mutex so that transactions from concurrent channel
//! sweeps never interleave on it.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bookings::model::{
    Booking, BookingStatus, IngestLedgerEntry, LedgerOutcome, NewBooking, NewLedgerEntry,
    StatusChange, format_booking_code,
};
use crate::error::{BookingError, DatabaseError};
use crate::fleet::{Company, CompanySelector, FleetDirectory, Vehicle, VehicleFilter};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
pub struct LibSqlBackend {
    /// Keeps the database open for as long as the connection lives.
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and `parse` dry runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        })
    }

    async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    // ── Fleet seeding ───────────────────────────────────────────────
    //
    // Company and vehicle administration lives outside the intake core;
    // these exist for bootstrapping and tests.

    /// Insert a company.
    pub async fn insert_company(&self, name: &str, email: &str) -> Result<Company, DatabaseError> {
        let company = Company {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
        };
        self.conn()
            .await
            .execute(
                "INSERT INTO companies (id, name, email) VALUES (?1, ?2, ?3)",
                params![company.id.to_string(), name, email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_company: {e}")))?;
        debug!(company = %company.id, name, "Company inserted");
        Ok(company)
    }

    /// Insert a vehicle.
    pub async fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<(), DatabaseError> {
        self.conn()
            .await
            .execute(
                "INSERT INTO vehicles (id, company_id, brand, model, category, license_plate, is_rented)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    vehicle.id.to_string(),
                    vehicle.company_id.to_string(),
                    vehicle.brand.as_str(),
                    vehicle.model.as_str(),
                    vehicle.category.as_str(),
                    opt_text(vehicle.license_plate.as_deref()),
                    vehicle.is_rented as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_vehicle: {e}")))?;
        Ok(())
    }

    /// Get a vehicle by ID.
    pub async fn get_vehicle(&self, id: Uuid) -> Result<Option<Vehicle>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_vehicle: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_vehicle(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_vehicle: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

const BOOKING_COLUMNS: &str = "id, company_id, vehicle_id, booking_code, customer_name, \
    customer_phone, customer_email, start_date, end_date, total_price, extra_insurance, \
    requested_category, status, source_message_id, raw_document_path, created_at, updated_at";

const LEDGER_COLUMNS: &str =
    "dedup_key, channel, subject, received_at, processed_at, raw_snippet, outcome, booking_id";

const VEHICLE_COLUMNS: &str = "id, company_id, brand, model, category, license_plate, is_rented";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_err(e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Query(format!("row parse: {e}"))
}

fn col_text(row: &libsql::Row, idx: i32) -> Result<String, DatabaseError> {
    row.get::<String>(idx).map_err(row_err)
}

/// Nullable text column.
fn col_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

fn col_uuid(row: &libsql::Row, idx: i32) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(&col_text(row, idx)?).map_err(row_err)
}

fn col_opt_uuid(row: &libsql::Row, idx: i32) -> Result<Option<Uuid>, DatabaseError> {
    col_opt_text(row, idx)
        .map(|s| Uuid::parse_str(&s).map_err(row_err))
        .transpose()
}

fn col_date(row: &libsql::Row, idx: i32) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(&col_text(row, idx)?, DATE_FORMAT).map_err(row_err)
}

fn col_bool(row: &libsql::Row, idx: i32) -> Result<bool, DatabaseError> {
    Ok(row.get::<i64>(idx).map_err(row_err)? != 0)
}

/// Map a libsql Row to a Booking. Column order matches BOOKING_COLUMNS.
fn row_to_booking(row: &libsql::Row) -> Result<Booking, DatabaseError> {
    let total_price = col_opt_text(row, 9)
        .map(|s| Decimal::from_str(&s).map_err(row_err))
        .transpose()?;
    let status = BookingStatus::from_str(&col_text(row, 12)?).map_err(row_err)?;
    Ok(Booking {
        id: col_uuid(row, 0)?,
        company_id: col_uuid(row, 1)?,
        vehicle_id: col_opt_uuid(row, 2)?,
        booking_code: col_text(row, 3)?,
        customer_name: col_text(row, 4)?,
        customer_phone: col_opt_text(row, 5),
        customer_email: col_opt_text(row, 6),
        start_date: col_date(row, 7)?,
        end_date: col_date(row, 8)?,
        total_price,
        extra_insurance: col_bool(row, 10)?,
        requested_category: col_opt_text(row, 11),
        status,
        source_message_id: col_opt_text(row, 13),
        raw_document_path: col_opt_text(row, 14),
        created_at: parse_datetime(&col_text(row, 15)?),
        updated_at: parse_datetime(&col_text(row, 16)?),
    })
}

/// Map a libsql Row to a ledger entry. Column order matches LEDGER_COLUMNS.
fn row_to_ledger(row: &libsql::Row) -> Result<IngestLedgerEntry, DatabaseError> {
    Ok(IngestLedgerEntry {
        dedup_key: col_text(row, 0)?,
        channel: col_text(row, 1)?,
        subject: col_text(row, 2)?,
        received_at: col_opt_text(row, 3).map(|s| parse_datetime(&s)),
        processed_at: parse_datetime(&col_text(row, 4)?),
        raw_snippet: col_text(row, 5)?,
        outcome: LedgerOutcome::from_str(&col_text(row, 6)?).map_err(row_err)?,
        booking_id: col_opt_uuid(row, 7)?,
    })
}

/// Map a libsql Row to a Vehicle. Column order matches VEHICLE_COLUMNS.
fn row_to_vehicle(row: &libsql::Row) -> Result<Vehicle, DatabaseError> {
    Ok(Vehicle {
        id: col_uuid(row, 0)?,
        company_id: col_uuid(row, 1)?,
        brand: col_text(row, 2)?,
        model: col_text(row, 3)?,
        category: col_text(row, 4)?,
        license_plate: col_opt_text(row, 5),
        is_rented: col_bool(row, 6)?,
    })
}

fn row_to_company(row: &libsql::Row) -> Result<Company, DatabaseError> {
    Ok(Company {
        id: col_uuid(row, 0)?,
        name: col_text(row, 1)?,
        email: col_text(row, 2)?,
    })
}

/// Unique and check violations surface as `Constraint`.
fn write_err(context: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE") || message.contains("CHECK") || message.contains("constraint") {
        DatabaseError::Constraint(format!("{context}: {message}"))
    } else {
        DatabaseError::Query(format!("{context}: {message}"))
    }
}

async fn fetch_booking(conn: &Connection, id: Uuid) -> Result<Option<Booking>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
            params![id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("get_booking: {e}")))?;
    match rows.next().await {
        Ok(Some(row)) => Ok(Some(row_to_booking(&row)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("get_booking: {e}"))),
    }
}

/// Insert a booking with the company's next code. Must run inside a
/// transaction or under the connection lock.
async fn insert_booking(conn: &Connection, new: &NewBooking) -> Result<Booking, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COALESCE(MAX(code_seq), 0) + 1 FROM bookings WHERE company_id = ?1",
            params![new.company_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("next_booking_code: {e}")))?;
    let sequence: i64 = match rows.next().await {
        Ok(Some(row)) => row.get(0).map_err(row_err)?,
        Ok(None) => 1,
        Err(e) => return Err(DatabaseError::Query(format!("next_booking_code: {e}"))),
    };

    let now = Utc::now();
    let booking = Booking {
        id: Uuid::new_v4(),
        company_id: new.company_id,
        vehicle_id: new.vehicle_id,
        booking_code: format_booking_code(sequence),
        customer_name: new.customer_name.clone(),
        customer_phone: new.customer_phone.clone(),
        customer_email: new.customer_email.clone(),
        start_date: new.start_date,
        end_date: new.end_date,
        total_price: new.total_price,
        extra_insurance: new.extra_insurance,
        requested_category: new.requested_category.clone(),
        status: BookingStatus::Imported,
        source_message_id: new.source_message_id.clone(),
        raw_document_path: new.raw_document_path.clone(),
        created_at: now,
        updated_at: now,
    };

    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}, code_seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16, ?17)"
        ),
        params![
            booking.id.to_string(),
            booking.company_id.to_string(),
            opt_text(booking.vehicle_id.map(|v| v.to_string()).as_deref()),
            booking.booking_code.as_str(),
            booking.customer_name.as_str(),
            opt_text(booking.customer_phone.as_deref()),
            opt_text(booking.customer_email.as_deref()),
            booking.start_date.format(DATE_FORMAT).to_string(),
            booking.end_date.format(DATE_FORMAT).to_string(),
            opt_text(booking.total_price.map(|d| d.to_string()).as_deref()),
            booking.extra_insurance as i64,
            opt_text(booking.requested_category.as_deref()),
            booking.status.as_str(),
            opt_text(booking.source_message_id.as_deref()),
            opt_text(booking.raw_document_path.as_deref()),
            now.to_rfc3339(),
            sequence,
        ],
    )
    .await
    .map_err(|e| write_err("insert_booking", e))?;

    debug!(
        booking = %booking.id,
        code = %booking.booking_code,
        company = %booking.company_id,
        "Booking inserted"
    );
    Ok(booking)
}

/// Insert a ledger entry unless the key exists. Returns whether a row was
/// written.
async fn insert_ledger(
    conn: &Connection,
    entry: &NewLedgerEntry,
    booking_id: Option<Uuid>,
) -> Result<bool, DatabaseError> {
    let written = conn
        .execute(
            &format!(
                "INSERT INTO ingest_ledger ({LEDGER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (dedup_key) DO NOTHING"
            ),
            params![
                entry.dedup_key.as_str(),
                entry.channel.as_str(),
                entry.subject.as_str(),
                opt_text(entry.received_at.map(|t| t.to_rfc3339()).as_deref()),
                Utc::now().to_rfc3339(),
                entry.raw_snippet.as_str(),
                entry.outcome.as_str(),
                opt_text(booking_id.map(|b| b.to_string()).as_deref()),
            ],
        )
        .await
        .map_err(|e| write_err("insert_ledger", e))?;
    Ok(written > 0)
}

async fn create_with_ledger_tx(
    conn: &Connection,
    booking: &NewBooking,
    entry: &NewLedgerEntry,
) -> Result<Booking, DatabaseError> {
    let created = insert_booking(conn, booking).await?;
    if !insert_ledger(conn, entry, Some(created.id)).await? {
        return Err(DatabaseError::Constraint(format!(
            "ledger entry for '{}' already exists",
            entry.dedup_key
        )));
    }
    Ok(created)
}

async fn apply_change_tx(conn: &Connection, change: &StatusChange) -> Result<Booking, BookingError> {
    let id = change.booking_id;
    let mut booking = fetch_booking(conn, id)
        .await?
        .ok_or(BookingError::NotFound { id })?;

    if booking.status != change.expected_from || !booking.status.can_transition_to(change.to) {
        return Err(BookingError::InvalidTransition {
            id,
            from: booking.status,
            to: change.to,
        });
    }

    if let Some((start, end)) = change.exclusive_window {
        let vehicle_id = booking.vehicle_id.ok_or(BookingError::VehicleMissing { id })?;
        let mut rows = conn
            .query(
                "SELECT id FROM bookings
                 WHERE vehicle_id = ?1 AND status = 'active' AND id != ?2
                   AND end_date >= ?3 AND start_date <= ?4
                 LIMIT 1",
                params![
                    vehicle_id.to_string(),
                    id.to_string(),
                    start.format(DATE_FORMAT).to_string(),
                    end.format(DATE_FORMAT).to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("overlap check: {e}")))?;
        if let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("overlap check: {e}")))?
        {
            return Err(BookingError::ActivationConflict {
                id,
                conflicting: col_uuid(&row, 0)?,
                vehicle_id,
            });
        }
    }

    let now = Utc::now();
    let updated = conn
        .execute(
            "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                change.to.as_str(),
                now.to_rfc3339(),
                id.to_string(),
                change.expected_from.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update booking status: {e}")))?;
    if updated == 0 {
        return Err(BookingError::InvalidTransition {
            id,
            from: booking.status,
            to: change.to,
        });
    }

    if let (Some(rented), Some(vehicle_id)) = (change.vehicle_rented, booking.vehicle_id) {
        let result = if rented {
            conn.execute(
                "UPDATE vehicles SET is_rented = 1 WHERE id = ?1",
                params![vehicle_id.to_string()],
            )
            .await
        } else {
            // Another active booking on the same vehicle keeps it locked.
            conn.execute(
                "UPDATE vehicles SET is_rented = 0 WHERE id = ?1 AND NOT EXISTS (
                    SELECT 1 FROM bookings WHERE vehicle_id = ?1 AND status = 'active' AND id != ?2
                 )",
                params![vehicle_id.to_string(), id.to_string()],
            )
            .await
        };
        result.map_err(|e| DatabaseError::Query(format!("update vehicle rented flag: {e}")))?;
    }

    booking.status = change.to;
    booking.updated_at = now;
    Ok(booking)
}

// ── Database impl ───────────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&*self.conn().await).await
    }

    // ── Ledger ──────────────────────────────────────────────────────

    async fn get_ledger_entry(
        &self,
        dedup_key: &str,
    ) -> Result<Option<IngestLedgerEntry>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!("SELECT {LEDGER_COLUMNS} FROM ingest_ledger WHERE dedup_key = ?1"),
                params![dedup_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_ledger_entry: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_ledger(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_ledger_entry: {e}"))),
        }
    }

    async fn record_ledger_entry(&self, entry: &NewLedgerEntry) -> Result<bool, DatabaseError> {
        let written = insert_ledger(&*self.conn().await, entry, None).await?;
        if !written {
            debug!(key = %entry.dedup_key, "Ledger entry already present");
        }
        Ok(written)
    }

    async fn list_ledger_entries(
        &self,
        channel: Option<&str>,
        limit: usize,
    ) -> Result<Vec<IngestLedgerEntry>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LEDGER_COLUMNS} FROM ingest_ledger
                     WHERE ?1 IS NULL OR channel = ?1
                     ORDER BY processed_at DESC LIMIT ?2"
                ),
                params![opt_text(channel), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_ledger_entries: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_ledger_entries: {e}")))?
        {
            entries.push(row_to_ledger(&row)?);
        }
        Ok(entries)
    }

    // ── Bookings ────────────────────────────────────────────────────

    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking, DatabaseError> {
        let conn = self.conn().await;
        insert_booking(&conn, booking).await
    }

    async fn create_booking_with_ledger(
        &self,
        booking: &NewBooking,
        entry: &NewLedgerEntry,
    ) -> Result<Booking, DatabaseError> {
        let conn = self.conn().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("begin: {e}")))?;

        match create_with_ledger_tx(&tx, booking, entry).await {
            Ok(created) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Transaction(format!("commit: {e}")))?;
                Ok(created)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, DatabaseError> {
        fetch_booking(&*self.conn().await, id).await
    }

    async fn find_booking_by_composite(
        &self,
        company_id: Uuid,
        customer_name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        total_price: Option<Decimal>,
    ) -> Result<Option<Booking>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {BOOKING_COLUMNS} FROM bookings
                     WHERE company_id = ?1 AND customer_name = ?2 AND start_date = ?3 AND end_date = ?4
                     ORDER BY code_seq"
                ),
                params![
                    company_id.to_string(),
                    customer_name,
                    start_date.format(DATE_FORMAT).to_string(),
                    end_date.format(DATE_FORMAT).to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_booking_by_composite: {e}")))?;

        // Totals are compared numerically: `240.0` and `240.00` are the same key.
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("find_booking_by_composite: {e}")))?
        {
            let booking = row_to_booking(&row)?;
            if booking.total_price == total_price {
                return Ok(Some(booking));
            }
        }
        Ok(None)
    }

    async fn refresh_booking(
        &self,
        id: Uuid,
        vehicle_id: Option<Uuid>,
        customer_phone: Option<&str>,
    ) -> Result<Booking, DatabaseError> {
        let conn = self.conn().await;
        let updated = conn
            .execute(
                "UPDATE bookings
                 SET vehicle_id = COALESCE(vehicle_id, ?2),
                     customer_phone = COALESCE(?3, customer_phone),
                     updated_at = ?4
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    opt_text(vehicle_id.map(|v| v.to_string()).as_deref()),
                    opt_text(customer_phone),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("refresh_booking", e))?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "booking".into(),
                id: id.to_string(),
            });
        }
        fetch_booking(&conn, id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "booking".into(),
                id: id.to_string(),
            })
    }

    async fn list_bookings(
        &self,
        company_id: Uuid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {BOOKING_COLUMNS} FROM bookings
                     WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY code_seq DESC"
                ),
                params![
                    company_id.to_string(),
                    opt_text(status.as_ref().map(BookingStatus::as_str)),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_bookings: {e}")))?;

        let mut bookings = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_bookings: {e}")))?
        {
            bookings.push(row_to_booking(&row)?);
        }
        Ok(bookings)
    }

    async fn apply_status_change(&self, change: &StatusChange) -> Result<Booking, BookingError> {
        let conn = self.conn().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("begin: {e}")))?;

        match apply_change_tx(&tx, change).await {
            Ok(booking) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Transaction(format!("commit: {e}")))?;
                info!(
                    booking = %booking.id,
                    code = %booking.booking_code,
                    status = %booking.status,
                    "Booking status changed"
                );
                Ok(booking)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

// ── FleetDirectory impl ─────────────────────────────────────────────

#[async_trait]
impl FleetDirectory for LibSqlBackend {
    async fn get_company(
        &self,
        selector: &CompanySelector,
    ) -> Result<Option<Company>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = match selector {
            CompanySelector::Id(id) => conn
                .query(
                    "SELECT id, name, email FROM companies WHERE id = ?1",
                    params![id.to_string()],
                )
                .await,
            // Case-insensitive matching is done in Rust so non-ASCII names work.
            _ => conn.query("SELECT id, name, email FROM companies", ()).await,
        }
        .map_err(|e| DatabaseError::Query(format!("get_company: {e}")))?;

        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_company: {e}")))?
        {
            let company = row_to_company(&row)?;
            if selector.matches(&company) {
                return Ok(Some(company));
            }
        }
        Ok(None)
    }

    async fn list_vehicles(
        &self,
        company_id: Uuid,
        filter: &VehicleFilter,
    ) -> Result<Vec<Vehicle>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {VEHICLE_COLUMNS} FROM vehicles
                     WHERE company_id = ?1 AND (?2 = 0 OR is_rented = 0)
                     ORDER BY brand COLLATE NOCASE, model COLLATE NOCASE"
                ),
                params![company_id.to_string(), filter.available_only as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_vehicles: {e}")))?;

        let wanted = filter.category.as_deref().map(str::to_lowercase);
        let mut vehicles = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_vehicles: {e}")))?
        {
            let vehicle = row_to_vehicle(&row)?;
            if wanted
                .as_deref()
                .is_none_or(|c| vehicle.category.to_lowercase() == c)
            {
                vehicles.push(vehicle);
            }
        }
        Ok(vehicles)
    }

    async fn set_vehicle_rented(&self, vehicle_id: Uuid, rented: bool) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .await
            .execute(
                "UPDATE vehicles SET is_rented = ?2 WHERE id = ?1",
                params![vehicle_id.to_string(), rented as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_vehicle_rented: {e}")))?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "vehicle".into(),
                id: vehicle_id.to_string(),
            });
        }
        Ok(())
    }
}
