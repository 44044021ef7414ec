//! Intake pipeline.
//!
//! Every configured channel flows through:
//! 1. `SourceAdapter::list_messages()`: channel-specific I/O
//! 2. `Reconciler::ingest()`: ledger check, extraction, parsing, vehicle
//!    resolution, transactional booking write
//! 3. `SourceAdapter::acknowledge()`: once per sweep, for ledgered messages
//!
//! `IntakeScheduler` repeats these steps per channel on a fixed interval.

pub mod reconciler;
pub mod scheduler;
pub mod sweep;

pub use reconciler::{ChannelSource, ManualOutcome, Outcome, Reconciler};
pub use scheduler::{IntakeScheduler, ScheduleConfig, SchedulerHandle};
pub use sweep::{ChannelReport, ingest_once};
