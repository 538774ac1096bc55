//! Runtime configuration (ambient stack: this struct is the one `tc-cli`
//! loads from `config.toml` via `serde` and hands to every other crate).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// All tunables named in the spec's central timeout table (§5) and the
/// supplemented Disk Guard (`original_source/auto/monitor_engine.py`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub max_concurrent: usize,
	pub poll_interval_secs: u64,

	pub gate_acquire_timeout_secs: u64,
	pub hls_acquisition_timeout_secs: u64,
	pub file_stall_timeout_secs: u64,
	pub absolute_recording_cap_secs: u64,
	pub browser_health_probe_timeout_secs: u64,
	pub login_wizard_timeout_secs: u64,
	pub subprocess_soft_terminate_secs: u64,
	pub liveness_check_timeout_secs: u64,

	pub heartbeat_interval_secs: u64,
	pub heartbeat_stale_secs: u64,
	pub watchdog_interval_secs: u64,
	pub watchdog_idle_threshold_secs: u64,
	pub event_log_rotate_bytes: u64,

	/// Minimum free disk space required before a new recording is dispatched;
	/// below this, the target is skipped with a `disk_guard_skip` event.
	pub disk_space_min_gb: f64,

	pub fragment_concurrency: u32,
	pub retry_count: u32,
	pub retry_fragment_count: u32,
	pub retry_sleep_secs: u64,
	/// A format expression (contains `[`, `]`, `+`, `/`, `bestvideo`, or
	/// `bestaudio`) or a sort key otherwise (spec §6.4).
	pub quality_selector: String,

	pub download_tool_path: PathBuf,
	pub streaming_probe_tool_path: PathBuf,

	pub state_dir: PathBuf,
	pub logs_dir: PathBuf,
	pub recordings_dir: PathBuf,
	pub cookie_dir: PathBuf,
	pub targets_file: PathBuf,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			max_concurrent: 2,
			poll_interval_secs: 30,

			gate_acquire_timeout_secs: 30,
			hls_acquisition_timeout_secs: 150,
			file_stall_timeout_secs: 45,
			absolute_recording_cap_secs: 3600,
			browser_health_probe_timeout_secs: 2,
			login_wizard_timeout_secs: 180,
			subprocess_soft_terminate_secs: 10,
			liveness_check_timeout_secs: 20,

			heartbeat_interval_secs: 10,
			heartbeat_stale_secs: 15,
			watchdog_interval_secs: 10,
			watchdog_idle_threshold_secs: 300,
			event_log_rotate_bytes: 100 * 1024 * 1024,

			disk_space_min_gb: 5.0,

			fragment_concurrency: 4,
			retry_count: 20,
			retry_fragment_count: 20,
			retry_sleep_secs: 3,
			quality_selector: "best".to_string(),

			download_tool_path: PathBuf::from("yt-dlp"),
			streaming_probe_tool_path: PathBuf::from("streamlink"),

			state_dir: PathBuf::from("state"),
			logs_dir: PathBuf::from("logs"),
			recordings_dir: PathBuf::from("recordings"),
			cookie_dir: PathBuf::from("state/cookies"),
			targets_file: PathBuf::from("state/targets.json"),
		}
	}
}

impl Config {
	/// Loads configuration from a TOML file, falling back to defaults for
	/// any field the file omits (via `#[serde(default)]`).
	pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
		toml::from_str(&text).map_err(ConfigError::Parse)
	}

	/// True if `selector` should be passed as a format expression rather than
	/// a sort key (spec §6.4).
	pub fn quality_is_format_expression(selector: &str) -> bool {
		["[", "]", "+", "/", "bestvideo", "bestaudio"].iter().any(|marker| selector.contains(marker))
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read config file: {0}")]
	Read(std::io::Error),
	#[error("failed to parse config file: {0}")]
	Parse(toml::de::Error),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_the_spec_timeout_table() {
		let cfg = Config::default();
		assert_eq!(cfg.gate_acquire_timeout_secs, 30);
		assert_eq!(cfg.hls_acquisition_timeout_secs, 150);
		assert_eq!(cfg.file_stall_timeout_secs, 45);
		assert_eq!(cfg.absolute_recording_cap_secs, 3600);
		assert_eq!(cfg.browser_health_probe_timeout_secs, 2);
		assert_eq!(cfg.login_wizard_timeout_secs, 180);
		assert_eq!(cfg.subprocess_soft_terminate_secs, 10);
	}

	#[test]
	fn quality_selector_classification() {
		assert!(Config::quality_is_format_expression("bestvideo+bestaudio"));
		assert!(Config::quality_is_format_expression("[height<=720]"));
		assert!(!Config::quality_is_format_expression("best"));
	}

	#[test]
	fn partial_toml_falls_back_to_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		std::fs::write(&path, "max_concurrent = 5\n").unwrap();
		let cfg = Config::load(&path).unwrap();
		assert_eq!(cfg.max_concurrent, 5);
		assert_eq!(cfg.poll_interval_secs, 30);
	}
}
