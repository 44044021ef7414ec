//! Bookings: the durable record, its lifecycle and the intake ledger.

pub mod model;
pub mod state;

pub use model::{
    Booking, BookingStatus, IngestLedgerEntry, LedgerOutcome, NewBooking, NewLedgerEntry,
    StatusChange,
};
pub use state::BookingStateMachine;
