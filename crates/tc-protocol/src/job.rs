//! Recording jobs: one per dispatched recording (spec §3).

use serde::{Deserialize, Serialize};

use crate::reason::Reason;

/// Lifecycle phase of one recording job, distinct from the per-URL
/// [`crate::state::RecordingState`]: a job only exists for the duration of
/// one `start_record` call and is not retained past a terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
	Preparing,
	LoginCheck,
	Recording,
	Finalizing,
	Completed,
	Error,
	Timeout,
	Cancelled,
}

impl JobPhase {
	pub fn is_terminal(self) -> bool {
		matches!(self, JobPhase::Completed | JobPhase::Error | JobPhase::Timeout | JobPhase::Cancelled)
	}
}

/// One dispatched recording attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingJob {
	pub job_id: String,
	pub target: String,
	pub canonical_url: String,
	pub phase: JobPhase,
	/// Unix seconds.
	pub started_at: i64,
	pub completed_at: Option<i64>,
	pub requested_duration_secs: Option<u64>,
	pub output_files: Vec<String>,
	pub error: Option<Reason>,
	/// Tail of the subprocess's combined stdout/stderr, kept for diagnostics.
	pub raw_subprocess_tail: Option<String>,
	pub retry_count: u32,
	pub last_file_size: u64,
	/// Unix seconds of the last file-growth watchdog poll.
	pub last_file_check_at: i64,
}

impl RecordingJob {
	pub fn new(job_id: impl Into<String>, target: impl Into<String>, canonical_url: impl Into<String>, started_at: i64) -> Self {
		Self {
			job_id: job_id.into(),
			target: target.into(),
			canonical_url: canonical_url.into(),
			phase: JobPhase::Preparing,
			started_at,
			completed_at: None,
			requested_duration_secs: None,
			output_files: Vec::new(),
			error: None,
			raw_subprocess_tail: None,
			retry_count: 0,
			last_file_size: 0,
			last_file_check_at: started_at,
		}
	}
}

/// The normalized result of one `start_record` call (spec §4.3.4 step 9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResult {
	pub ok: bool,
	pub success: bool,
	pub output_files: Vec<String>,
	pub files: Vec<String>,
	pub job_id: String,
	pub url: String,
	pub reason: Option<Reason>,
	pub retry_count: u32,
}

impl RecordResult {
	pub fn ok(job_id: impl Into<String>, url: impl Into<String>, output_files: Vec<String>, retry_count: u32) -> Self {
		Self {
			ok: true,
			success: true,
			files: output_files.clone(),
			output_files,
			job_id: job_id.into(),
			url: url.into(),
			reason: None,
			retry_count,
		}
	}

	pub fn failed(job_id: impl Into<String>, url: impl Into<String>, reason: Reason, retry_count: u32) -> Self {
		Self {
			ok: false,
			success: false,
			output_files: Vec::new(),
			files: Vec::new(),
			job_id: job_id.into(),
			url: url.into(),
			reason: Some(reason),
			retry_count,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn terminal_phases_are_exactly_the_documented_four() {
		assert!(JobPhase::Completed.is_terminal());
		assert!(JobPhase::Error.is_terminal());
		assert!(JobPhase::Timeout.is_terminal());
		assert!(JobPhase::Cancelled.is_terminal());
		assert!(!JobPhase::Preparing.is_terminal());
		assert!(!JobPhase::Recording.is_terminal());
		assert!(!JobPhase::Finalizing.is_terminal());
		assert!(!JobPhase::LoginCheck.is_terminal());
	}

	#[test]
	fn ok_result_mirrors_output_files_into_both_fields() {
		let r = RecordResult::ok("job-1", "https://twitcasting.tv/alice", vec!["a.mp4".to_string()], 0);
		assert_eq!(r.output_files, r.files);
		assert!(r.ok && r.success);
	}

	#[test]
	fn failed_result_carries_reason() {
		let r = RecordResult::failed("job-1", "https://twitcasting.tv/alice", Reason::HlsTimeout, 0);
		assert!(!r.ok);
		assert_eq!(r.reason, Some(Reason::HlsTimeout));
	}
}
