//! Fleet Intake: reservation ingestion for car-rental fleets.

pub mod bookings;
pub mod channels;
pub mod config;
pub mod error;
pub mod extract;
pub mod fleet;
pub mod parsers;
pub mod pipeline;
pub mod store;
