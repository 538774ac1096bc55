//! Append-only newline-delimited JSON event log lines (spec §3, §4.5).
//!
//! The authoritative event spellings, chosen where the legacy source
//! disagreed across its overlapping module versions (spec §9's open
//! question): `state_transition`, `recording_start`, `recording_result`,
//! `hls_timeout`, `file_stall_detected`, `jit_retry_start`,
//! `auth_required_giveup`, `capacity_wait`, `disk_guard_skip`,
//! `recording_cancelled`, `emergency_reset`, `emergency_reset_refused`.

use serde::{Deserialize, Serialize};

use crate::reason::Reason;
use crate::state::RecordingState;

/// One line of a recorder or monitor event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
	StateTransition { url: String, state: RecordingState, phase: RecordingState },
	RecordingStart { url: String, job_id: String },
	RecordingResult { url: String, job_id: String, ok: bool, reason: Option<Reason> },
	HlsTimeout { url: String, job_id: String, elapsed_secs: u64 },
	FileStallDetected { url: String, job_id: String, stalled_secs: u64 },
	JitRetryStart { url: String, job_id: String, reason: Reason },
	AuthRequiredGiveup { url: String, retry_count: u32 },
	CapacityWait { url: String },
	DiskGuardSkip { url: String, free_gb: f64, min_gb: f64 },
	RecordingCancelled { url: String, job_id: String },
	EmergencyReset,
	EmergencyResetRefused { active_jobs: usize },
	/// Representative of the `login_*` family (spec §4.5): a forced re-login attempt.
	LoginAttempt { forced: bool },
	/// Representative of the `cookie_*` family: a fresh snapshot was exported.
	CookieExported { strength: crate::cookie_strength::CookieStrength, path: String },
	/// Representative of the `recovery_*` family: the watchdog or health check recovered.
	RecoveryTriggered { cause: String },
	/// Representative of the `detector_*` family: one liveness check's outcome.
	DetectorResult { url: String, method: String, is_live: bool },
}

/// One line of the `monitor_gui_bridge.jsonl` log: exactly two per recording
/// (spec §4.5), one on entering `RECORDING` and one on the terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuiStateLine {
	pub ts: i64,
	#[serde(rename = "type")]
	pub kind: GuiStateKind,
	pub recording: bool,
	pub url: String,
	pub job_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ok: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuiStateKind {
	#[serde(rename = "GUI-STATE")]
	GuiState,
}

/// A timestamped wrapper around [`Event`], the actual unit written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLine {
	pub ts: i64,
	#[serde(flatten)]
	pub event: Event,
}
