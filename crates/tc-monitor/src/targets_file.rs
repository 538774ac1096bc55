//! `targets.json`: `{urls: [canonical_url], updated_at: ISO8601}`, written
//! atomically via temp-file rename (spec §3, §6.2).

use std::path::Path;

use serde::{Deserialize, Serialize};

use tc_protocol::{normalize_url, Target};
use tc_state::write_atomic;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct TargetsFileDoc {
	urls: Vec<String>,
	updated_at: Option<String>,
}

/// Loads and normalizes every URL in the file. Entries that fail
/// normalization are logged and dropped rather than failing the whole load —
/// one bad line in an operator-edited file shouldn't block every other
/// target.
pub fn load(path: &Path) -> Result<Vec<Target>, crate::Error> {
	if !path.exists() {
		return Ok(Vec::new());
	}
	let text = std::fs::read_to_string(path)?;
	let doc: TargetsFileDoc = serde_json::from_str(&text)?;
	let mut targets = Vec::with_capacity(doc.urls.len());
	for raw in doc.urls {
		match normalize_url(&raw) {
			Ok(t) => targets.push(t),
			Err(e) => warn!(target = "tc.monitor", raw = %raw, error = %e, "dropping invalid target from targets.json"),
		}
	}
	Ok(targets)
}

/// Writes the canonical URLs back out atomically, stamping `updated_at` with
/// the current time in RFC 3339 (spec §3's ISO8601 requirement).
pub fn save(path: &Path, targets: &[Target], fallback_dir: Option<&Path>) -> Result<(), crate::Error> {
	let doc = TargetsFileDoc { urls: targets.iter().map(|t| t.canonical_url.clone()).collect(), updated_at: Some(now_rfc3339()) };
	let bytes = serde_json::to_vec_pretty(&doc)?;
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	write_atomic(path, &bytes, fallback_dir)?;
	Ok(())
}

fn now_rfc3339() -> String {
	time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_file_loads_empty() {
		let dir = tempfile::tempdir().unwrap();
		let targets = load(&dir.path().join("targets.json")).unwrap();
		assert!(targets.is_empty());
	}

	#[test]
	fn round_trips_canonical_urls() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("targets.json");
		let targets = vec![normalize_url("c:alice").unwrap(), normalize_url("g:team1").unwrap()];
		save(&path, &targets, None).unwrap();
		let loaded = load(&path).unwrap();
		assert_eq!(loaded.len(), 2);
		assert_eq!(loaded[0].canonical_url, "https://twitcasting.tv/alice");
	}

	#[test]
	fn invalid_entries_are_dropped_not_fatal() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("targets.json");
		std::fs::write(&path, r#"{"urls": ["c:alice", "not a valid handle!!"], "updated_at": null}"#).unwrap();
		let loaded = load(&path).unwrap();
		assert_eq!(loaded.len(), 1);
	}

	#[test]
	fn add_then_remove_is_equivalent_to_no_op_except_timestamp() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("targets.json");
		save(&path, &[], None).unwrap();
		let mut targets = load(&path).unwrap();
		targets.push(normalize_url("c:alice").unwrap());
		save(&path, &targets, None).unwrap();
		targets.retain(|t| t.canonical_url != "https://twitcasting.tv/alice");
		save(&path, &targets, None).unwrap();
		assert!(load(&path).unwrap().is_empty());
	}
}
