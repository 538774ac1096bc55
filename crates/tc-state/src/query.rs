//! The in-process query API named in spec §2/§4.3: `get_recording_states`
//! and `get_system_health`. The actual per-URL map is owned by `tc-recorder`;
//! this module only defines the shape every consumer agrees on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tc_protocol::{RecordingJob, RecordingState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
	pub state_counts: HashMap<RecordingState, usize>,
	pub max_concurrent: usize,
	pub active_jobs: usize,
	pub semaphore_available: usize,
	pub stale_gate_count: u32,
}

/// Implemented by whatever owns the live per-URL state (the recorder
/// wrapper); lets `tc-monitor` and `tc-cli` query it without depending on
/// the wrapper's internal concurrency types.
pub trait StateProvider: Send + Sync {
	fn recording_states(&self) -> HashMap<String, RecordingState>;
	fn system_health(&self) -> SystemHealth;
	/// Every spec §3 Recording Job currently in flight.
	fn active_jobs(&self) -> Vec<RecordingJob>;
}
