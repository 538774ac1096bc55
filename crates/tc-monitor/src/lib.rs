//! The Monitor Engine (spec §4.4): the poll loop that owns the target list,
//! schedules concurrent liveness checks, dispatches live targets into the
//! recorder wrapper under capacity, escalates authentication failures, and
//! publishes the process-wide heartbeat.

pub mod disk_guard;
pub mod engine;
pub mod error;
pub mod targets_file;

pub use engine::{EngineStatus, MonitorEngine};
pub use error::{Error, Result};
