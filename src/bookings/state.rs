//! Booking lifecycle transitions with vehicle exclusivity.
//!
//! ```text
//! imported ──► active ──► completed
//!     │           │
//!     └───────────┴─────► cancelled
//! ```
//!
//! Each transition is applied by the store as a single transaction together
//! with the vehicle's `is_rented` flip.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::bookings::model::{Booking, BookingStatus, StatusChange};
use crate::error::BookingError;
use crate::store::Database;

/// Drives bookings through their lifecycle.
pub struct BookingStateMachine {
    db: Arc<dyn Database>,
}

impl BookingStateMachine {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Hand over the vehicle: `imported → active`, locking the vehicle.
    ///
    /// Fails with `ActivationConflict` if another active booking holds the
    /// same vehicle over an overlapping period; the booking then stays
    /// `imported`.
    pub async fn activate(&self, id: Uuid) -> Result<Booking, BookingError> {
        let booking = self.load(id).await?;
        ensure_transition(&booking, BookingStatus::Active)?;
        if booking.vehicle_id.is_none() {
            return Err(BookingError::VehicleMissing { id });
        }

        let change = StatusChange {
            booking_id: id,
            expected_from: booking.status,
            to: BookingStatus::Active,
            vehicle_rented: Some(true),
            exclusive_window: Some((booking.start_date, booking.end_date)),
        };
        self.db.apply_status_change(&change).await.inspect_err(|e| {
            if matches!(e, BookingError::ActivationConflict { .. }) {
                warn!(booking = %id, error = %e, "Activation rejected");
            }
        })
    }

    /// Return the vehicle: `active → completed`, releasing the vehicle.
    pub async fn complete(&self, id: Uuid) -> Result<Booking, BookingError> {
        let booking = self.load(id).await?;
        ensure_transition(&booking, BookingStatus::Completed)?;
        self.leave(&booking, BookingStatus::Completed).await
    }

    /// Cancel from `imported` or `active`. Only an active booking releases
    /// its vehicle.
    pub async fn cancel(&self, id: Uuid) -> Result<Booking, BookingError> {
        let booking = self.load(id).await?;
        ensure_transition(&booking, BookingStatus::Cancelled)?;
        self.leave(&booking, BookingStatus::Cancelled).await
    }

    /// Dispatch to the operation that reaches `to`.
    pub async fn transition(&self, id: Uuid, to: BookingStatus) -> Result<Booking, BookingError> {
        match to {
            BookingStatus::Active => self.activate(id).await,
            BookingStatus::Completed => self.complete(id).await,
            BookingStatus::Cancelled => self.cancel(id).await,
            BookingStatus::Imported => {
                let booking = self.load(id).await?;
                Err(BookingError::InvalidTransition {
                    id,
                    from: booking.status,
                    to,
                })
            }
        }
    }

    async fn leave(&self, booking: &Booking, to: BookingStatus) -> Result<Booking, BookingError> {
        let releases = booking.status == BookingStatus::Active && booking.vehicle_id.is_some();
        let change = StatusChange {
            booking_id: booking.id,
            expected_from: booking.status,
            to,
            vehicle_rented: releases.then_some(false),
            exclusive_window: None,
        };
        debug!(booking = %booking.id, from = %booking.status, %to, releases, "Leaving booking state");
        self.db.apply_status_change(&change).await
    }

    async fn load(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.db
            .get_booking(id)
            .await?
            .ok_or(BookingError::NotFound { id })
    }
}

fn ensure_transition(booking: &Booking, to: BookingStatus) -> Result<(), BookingError> {
    if booking.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition {
            id: booking.id,
            from: booking.status,
            to,
        })
    }
}
