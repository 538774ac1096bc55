//! Heartbeat document read/write (spec §3, §4.4.3).

use std::path::Path;

use tc_protocol::HeartbeatDocument;

use crate::atomic::{write_atomic, AtomicWriteError};

/// Overwrites `path` atomically with `doc`. Never partially written.
pub fn write_heartbeat(path: &Path, doc: &HeartbeatDocument, fallback_dir: Option<&Path>) -> Result<(), AtomicWriteError> {
	let bytes = serde_json::to_vec_pretty(doc).expect("HeartbeatDocument always serializes");
	write_atomic(path, &bytes, fallback_dir)
}

pub fn read_heartbeat(path: &Path) -> Option<HeartbeatDocument> {
	let text = std::fs::read_to_string(path).ok()?;
	serde_json::from_str(&text).ok()
}

#[cfg(test)]
mod tests {
	use super::*;
	use tc_protocol::EngineState;

	fn sample() -> HeartbeatDocument {
		HeartbeatDocument {
			ts: 1_700_000_000,
			state: EngineState::Running,
			active_jobs: 1,
			targets: 3,
			max_concurrent: 2,
			total_checks: 5,
			total_successes: 2,
			total_errors: 0,
			recovery_count: 0,
			last_activity: 1_700_000_000,
		}
	}

	#[test]
	fn round_trips_through_disk() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("heartbeat.json");
		write_heartbeat(&path, &sample(), None).unwrap();
		let read_back = read_heartbeat(&path).unwrap();
		assert_eq!(read_back.ts, 1_700_000_000);
		assert_eq!(read_back.active_jobs, 1);
	}

	#[test]
	fn missing_file_returns_none() {
		let dir = tempfile::tempdir().unwrap();
		assert!(read_heartbeat(&dir.path().join("missing.json")).is_none());
	}
}
