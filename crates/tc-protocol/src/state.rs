//! The authoritative per-URL state machine (spec §3, §4.3.2).

use serde::{Deserialize, Serialize};

/// One value shared by the coarse `state` (what consumers see) and the
/// internal `phase` (what the recorder wrapper is actually doing); spec §3
/// defines both over the same six-member set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingState {
	Idle,
	Starting,
	Waiting,
	Recording,
	Stopping,
	Error,
}

impl RecordingState {
	/// True for the two states the capacity invariant (spec §8, property 1) counts.
	pub fn counts_toward_capacity(self) -> bool {
		matches!(self, RecordingState::Starting | RecordingState::Recording)
	}
}

impl Default for RecordingState {
	fn default() -> Self {
		RecordingState::Idle
	}
}

/// The full per-URL record the wrapper owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetState {
	pub canonical_url: String,
	/// Coarse view for consumers.
	pub state: RecordingState,
	/// Internal recording phase; equal to `state` outside of active recordings.
	pub phase: RecordingState,
	/// Incremented on each JIT retry and surfaced to result payloads.
	pub retry_count: u32,
	/// Per-URL error counter kept for operator visibility only (spec §4.4.2);
	/// never drives automatic quarantine.
	pub error_count: u32,
}

impl TargetState {
	pub fn idle(canonical_url: impl Into<String>) -> Self {
		Self {
			canonical_url: canonical_url.into(),
			state: RecordingState::Idle,
			phase: RecordingState::Idle,
			retry_count: 0,
			error_count: 0,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_starting_and_recording_count_toward_capacity() {
		assert!(RecordingState::Starting.counts_toward_capacity());
		assert!(RecordingState::Recording.counts_toward_capacity());
		assert!(!RecordingState::Idle.counts_toward_capacity());
		assert!(!RecordingState::Waiting.counts_toward_capacity());
		assert!(!RecordingState::Stopping.counts_toward_capacity());
		assert!(!RecordingState::Error.counts_toward_capacity());
	}

	#[test]
	fn serializes_screaming_snake_case() {
		let json = serde_json::to_string(&RecordingState::Recording).unwrap();
		assert_eq!(json, "\"RECORDING\"");
	}
}
