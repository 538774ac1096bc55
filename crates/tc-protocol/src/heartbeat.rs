//! The heartbeat document: a single JSON object overwritten atomically at
//! least every 10 s while the engine is alive (spec §3, §4.4.3).

use serde::{Deserialize, Serialize};

/// Coarse engine lifecycle state, reported in the heartbeat's `state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
	Stopped,
	Starting,
	Running,
	Stopping,
	/// Out-of-band: the watchdog or a failed liveness streak is resetting state.
	Recovering,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatDocument {
	/// Unix seconds at write time.
	pub ts: i64,
	pub state: EngineState,
	pub active_jobs: usize,
	pub targets: usize,
	pub max_concurrent: usize,
	pub total_checks: u64,
	pub total_successes: u64,
	pub total_errors: u64,
	pub recovery_count: u64,
	/// Unix seconds of the last state-mutating event; feeds the watchdog's
	/// `idle_seconds` computation (spec §4.4.4).
	pub last_activity: i64,
}

impl HeartbeatDocument {
	/// How stale this document is relative to `now` (unix seconds).
	pub fn age_secs(&self, now: i64) -> i64 {
		(now - self.ts).max(0)
	}

	/// The UI's staleness threshold (spec §3, §4.5): 15 s.
	pub const STALE_AFTER_SECS: i64 = 15;

	pub fn is_stale(&self, now: i64) -> bool {
		self.age_secs(now) > Self::STALE_AFTER_SECS
	}
}
