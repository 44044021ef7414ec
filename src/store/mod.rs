//! Persistence layer: libSQL-backed bookings, ledger and fleet, plus the
//! on-disk source document store.

pub mod attachments;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use attachments::AttachmentStore;
pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
