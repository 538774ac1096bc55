//! The stable `reason` vocabulary surfaced in results and events (spec §7).
//!
//! `Reason` is a wire type, not the internal error type crates use for `?` —
//! see each crate's own `Error` for that. It exists so every consumer (the
//! event log, `RecordResult`, the heartbeat) agrees on exactly one spelling
//! per failure shape.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
	ShutdownInProgress,
	UrlAlreadyRecording,
	GlobalConcurrencyTimeout,
	MaxConcurrentTimeout,
	DuplicateJobId,
	ChromeError(String),
	LoginFailed,
	RecorderException(String),
	RecorderAbsoluteTimeout,
	HlsTimeout,
	FileStallDetected,
	AbsoluteTimeout,
	Cancelled,
	/// Subprocess-derived: connection-level failure before any bytes were read.
	NetworkOrHttp,
	/// Subprocess-derived: the output file exists but never received bytes.
	NoBytes,
	Http401,
	Http403,
	/// Subprocess reported "Requested format is not available" or similar.
	BadFormat,
}

impl Reason {
	/// The exact wire spelling, e.g. `"chrome_error:timeout connecting"`.
	pub fn as_wire_string(&self) -> String {
		match self {
			Reason::ShutdownInProgress => "shutdown_in_progress".to_string(),
			Reason::UrlAlreadyRecording => "url_already_recording".to_string(),
			Reason::GlobalConcurrencyTimeout => "global_concurrency_timeout".to_string(),
			Reason::MaxConcurrentTimeout => "max_concurrent_timeout".to_string(),
			Reason::DuplicateJobId => "duplicate_job_id".to_string(),
			Reason::ChromeError(detail) => format!("chrome_error:{detail}"),
			Reason::LoginFailed => "login_failed".to_string(),
			Reason::RecorderException(detail) => format!("recorder_exception:{detail}"),
			Reason::RecorderAbsoluteTimeout => "recorder_absolute_timeout".to_string(),
			Reason::HlsTimeout => "hls_timeout".to_string(),
			Reason::FileStallDetected => "file_stall_detected".to_string(),
			Reason::AbsoluteTimeout => "absolute_timeout".to_string(),
			Reason::Cancelled => "cancelled".to_string(),
			Reason::NetworkOrHttp => "network_or_http".to_string(),
			Reason::NoBytes => "no_bytes".to_string(),
			Reason::Http401 => "http_401".to_string(),
			Reason::Http403 => "http_403".to_string(),
			Reason::BadFormat => "bad_format".to_string(),
		}
	}

	/// Whether this reason is one of the early-fail shapes that the recorder
	/// wrapper retries exactly once after a forced re-login (spec §4.3.5).
	pub fn triggers_jit_retry(&self) -> bool {
		matches!(
			self,
			Reason::NetworkOrHttp | Reason::NoBytes | Reason::Http403 | Reason::Http401 | Reason::BadFormat
		)
	}

	/// Parses the tail of a subprocess's combined stdout/stderr into an
	/// early-fail reason, per the substring classification in spec §4.3.5.
	pub fn classify_subprocess_tail(tail: &str) -> Option<Reason> {
		if tail.contains("Requested format is not available") {
			return Some(Reason::BadFormat);
		}
		if tail.contains("403") || tail.contains("Forbidden") {
			return Some(Reason::Http403);
		}
		if tail.contains("401") {
			return Some(Reason::Http401);
		}
		if tail.contains("0 bytes") {
			return Some(Reason::NoBytes);
		}
		if tail.contains("ERROR") {
			return Some(Reason::NetworkOrHttp);
		}
		None
	}
}

impl fmt::Display for Reason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.as_wire_string())
	}
}

impl Serialize for Reason {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.as_wire_string())
	}
}

impl<'de> Deserialize<'de> for Reason {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		let (head, tail) = s.split_once(':').unzip();
		Ok(match head.unwrap_or(s.as_str()) {
			"shutdown_in_progress" => Reason::ShutdownInProgress,
			"url_already_recording" => Reason::UrlAlreadyRecording,
			"global_concurrency_timeout" => Reason::GlobalConcurrencyTimeout,
			"max_concurrent_timeout" => Reason::MaxConcurrentTimeout,
			"duplicate_job_id" => Reason::DuplicateJobId,
			"chrome_error" => Reason::ChromeError(tail.unwrap_or_default().to_string()),
			"login_failed" => Reason::LoginFailed,
			"recorder_exception" => Reason::RecorderException(tail.unwrap_or_default().to_string()),
			"recorder_absolute_timeout" => Reason::RecorderAbsoluteTimeout,
			"hls_timeout" => Reason::HlsTimeout,
			"file_stall_detected" => Reason::FileStallDetected,
			"absolute_timeout" => Reason::AbsoluteTimeout,
			"cancelled" => Reason::Cancelled,
			"network_or_http" => Reason::NetworkOrHttp,
			"no_bytes" => Reason::NoBytes,
			"http_401" => Reason::Http401,
			"http_403" => Reason::Http403,
			"bad_format" => Reason::BadFormat,
			other => return Err(serde::de::Error::custom(format!("unknown reason: {other}"))),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn chrome_error_round_trips_detail() {
		let r = Reason::ChromeError("timeout connecting".to_string());
		let json = serde_json::to_string(&r).unwrap();
		assert_eq!(json, "\"chrome_error:timeout connecting\"");
		let back: Reason = serde_json::from_str(&json).unwrap();
		assert_eq!(back, r);
	}

	#[test]
	fn classify_subprocess_tail_prefers_format_over_403() {
		let tail = "403 Forbidden\nERROR: Requested format is not available";
		assert_eq!(Reason::classify_subprocess_tail(tail), Some(Reason::BadFormat));
	}

	#[test]
	fn jit_retry_reasons_are_exactly_the_early_fail_set() {
		assert!(Reason::Http403.triggers_jit_retry());
		assert!(Reason::NoBytes.triggers_jit_retry());
		assert!(!Reason::Cancelled.triggers_jit_retry());
		assert!(!Reason::HlsTimeout.triggers_jit_retry());
	}
}
