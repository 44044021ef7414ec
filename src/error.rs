//! Error types for fleet-intake.

use uuid::Uuid;

use crate::bookings::model::BookingStatus;

/// Top-level error type for the intake service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Booking error: {0}")]
    Booking(#[from] BookingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration-related errors. These abort startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

/// Channel-level errors. Connection and authentication failures abort the
/// sweep of that channel only; the others concern a single message.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} connection failed: {reason}")]
    ConnectionFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Channel {name} query failed: {reason}")]
    QueryFailed { name: String, reason: String },

    #[error("Channel {name}: message {reference} not found")]
    NotFound { name: String, reference: String },
}

impl ChannelError {
    /// Whether this failure should stop the rest of the channel's sweep.
    pub fn aborts_sweep(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::AuthFailed { .. })
    }
}

/// Per-message ingestion failures.
///
/// `MissingRequiredFields`, `VehicleAmbiguous` and `VehicleNotFound` are
/// recorded as ledger skips by the reconciler and only surface to callers of
/// the manual-text path. `PersistenceConflict` leaves the message unledgered
/// so the next sweep retries it.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Missing required fields: {}", .fields.join(", "))]
    MissingRequiredFields { fields: Vec<&'static str> },

    #[error("End date {end} is before start date {start}")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Vehicle match is ambiguous ({hints}); available: {}", .suggestions.join("; "))]
    VehicleAmbiguous {
        hints: String,
        suggestions: Vec<String>,
    },

    #[error("No vehicle matched ({hints}); available: {}", .suggestions.join("; "))]
    VehicleNotFound {
        hints: String,
        suggestions: Vec<String>,
    },

    #[error("Booking and ledger write rolled back: {0}")]
    PersistenceConflict(String),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Source document storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Booking lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Booking {id} not found")]
    NotFound { id: Uuid },

    #[error("Booking {id} is {from}, cannot transition to {to}")]
    InvalidTransition {
        id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Booking {id} overlaps active booking {conflicting} on vehicle {vehicle_id}")]
    ActivationConflict {
        id: Uuid,
        conflicting: Uuid,
        vehicle_id: Uuid,
    },

    #[error("Booking {id} has no vehicle assigned")]
    VehicleMissing { id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the intake service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_and_auth_failures_abort_a_sweep() {
        let name = || "mailbox".to_string();
        let reason = || "boom".to_string();
        assert!(ChannelError::ConnectionFailed { name: name(), reason: reason() }.aborts_sweep());
        assert!(ChannelError::AuthFailed { name: name(), reason: reason() }.aborts_sweep());
        assert!(!ChannelError::QueryFailed { name: name(), reason: reason() }.aborts_sweep());
        assert!(
            !ChannelError::NotFound {
                name: name(),
                reference: "42".into()
            }
            .aborts_sweep()
        );
    }
}
