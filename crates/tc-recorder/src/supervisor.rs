//! Phase-aware deadlock detection for a single recording job (spec §4.3.3).
//!
//! A job can hang in two distinct ways and each gets its own watchdog: the
//! HLS URL never resolves (stuck before any bytes hit disk), or the output
//! file stops growing after recording has genuinely started. Both are
//! subordinate to an absolute cap that kills anything still running after
//! an hour regardless of phase.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::warn;

use tc_protocol::Reason;

/// Defaults mirroring `tc_protocol::Config`'s timeout table, used only where
/// no config is available (the unit tests below). Production call sites
/// build a [`Timeouts`] from the live `Config` instead.
pub const HLS_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(150);
pub const FILE_STALL_TIMEOUT: Duration = Duration::from_secs(45);
pub const FILE_STALL_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const ABSOLUTE_RECORDING_CAP: Duration = Duration::from_secs(3600);

/// The supervisor's three timeout knobs, read from `Config` by the caller so
/// a deployment can tune them without a rebuild (spec's central timeout
/// table, §5).
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
	pub hls_acquisition: Duration,
	pub file_stall: Duration,
	pub absolute_cap: Duration,
}

impl Default for Timeouts {
	fn default() -> Self {
		Self { hls_acquisition: HLS_ACQUISITION_TIMEOUT, file_stall: FILE_STALL_TIMEOUT, absolute_cap: ABSOLUTE_RECORDING_CAP }
	}
}

impl Timeouts {
	pub fn from_config(config: &tc_protocol::Config) -> Self {
		Self {
			hls_acquisition: Duration::from_secs(config.hls_acquisition_timeout_secs),
			file_stall: Duration::from_secs(config.file_stall_timeout_secs),
			absolute_cap: Duration::from_secs(config.absolute_recording_cap_secs),
		}
	}
}

/// What phase a job is in, as observed by the supervisor. `Recording` is
/// only entered once the output file has been seen to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlockPhase {
	AcquiringHls,
	Recording,
}

/// Shared, mutable view of a job's progress that the supervisor polls and
/// the subprocess-driving task updates.
pub struct JobProgress {
	pub phase: watch::Sender<DeadlockPhase>,
	pub output_path: std::sync::Mutex<Option<PathBuf>>,
}

impl JobProgress {
	pub fn new() -> (std::sync::Arc<Self>, watch::Receiver<DeadlockPhase>) {
		let (tx, rx) = watch::channel(DeadlockPhase::AcquiringHls);
		(std::sync::Arc::new(Self { phase: tx, output_path: std::sync::Mutex::new(None) }), rx)
	}

	/// Records the subprocess's resolved output path, discovered from its
	/// stdout (a `Destination: ...` line), as soon as it's known — before the
	/// HLS URL itself necessarily resolves.
	pub fn set_output_path(&self, output_path: PathBuf) {
		*self.output_path.lock().unwrap() = Some(output_path);
	}

	/// Transitions the job into the `Recording` phase. Only the subprocess
	/// parsing loop should call this, and only once it has actually observed
	/// the HLS playlist being fetched — calling it at dispatch time makes the
	/// file-stall watchdog fire against a job that never started.
	pub fn mark_hls_captured(&self) {
		let _ = self.phase.send(DeadlockPhase::Recording);
	}

	/// Convenience used by tests that don't go through the real subprocess
	/// parsing loop: sets the output path and flips the phase in one call.
	pub fn mark_recording(&self, output_path: PathBuf) {
		self.set_output_path(output_path);
		self.mark_hls_captured();
	}
}

/// Runs until the job either completes (signalled via `done`) or one of the
/// watchdogs fires, in which case it returns the [`Reason`] to record.
/// Cancellation (the surrounding task being aborted) is expected and is not
/// treated as an error by callers — this function makes no attempt to
/// distinguish it from ordinary completion.
pub async fn watch_for_deadlock(progress: std::sync::Arc<JobProgress>, phase_rx: watch::Receiver<DeadlockPhase>, done: watch::Receiver<bool>) -> Option<Reason> {
	watch_for_deadlock_with_timeouts(progress, phase_rx, done, Timeouts::default()).await
}

/// Same as [`watch_for_deadlock`] but with the three timeouts supplied
/// explicitly, so production call sites can derive them from `Config`
/// instead of the defaults.
pub async fn watch_for_deadlock_with_timeouts(progress: std::sync::Arc<JobProgress>, mut phase_rx: watch::Receiver<DeadlockPhase>, mut done: watch::Receiver<bool>, timeouts: Timeouts) -> Option<Reason> {
	let started = Instant::now();

	loop {
		tokio::select! {
			_ = done.changed() => {
				if *done.borrow() {
					return None;
				}
			}
			_ = sleep(hls_or_stall_deadline(started, *phase_rx.borrow(), &timeouts)) => {
				match *phase_rx.borrow() {
					DeadlockPhase::AcquiringHls => {
						if started.elapsed() >= timeouts.hls_acquisition {
							warn!(target = "tc.recorder.supervisor", "hls acquisition timed out");
							return Some(Reason::HlsTimeout);
						}
					}
					DeadlockPhase::Recording => {
						if started.elapsed() >= timeouts.absolute_cap {
							warn!(target = "tc.recorder.supervisor", "absolute recording cap reached");
							return Some(Reason::AbsoluteTimeout);
						}
						if let Some(reason) = check_file_stall(&progress, timeouts.file_stall).await {
							return Some(reason);
						}
					}
				}
			}
			_ = phase_rx.changed() => {
				// Phase transitioned (AcquiringHls -> Recording); loop back
				// around so the next sleep uses the new phase's cadence.
			}
		}

		if started.elapsed() >= timeouts.absolute_cap {
			warn!(target = "tc.recorder.supervisor", "absolute recording cap reached");
			return Some(Reason::AbsoluteTimeout);
		}
	}
}

fn hls_or_stall_deadline(started: Instant, phase: DeadlockPhase, timeouts: &Timeouts) -> Duration {
	match phase {
		DeadlockPhase::AcquiringHls => timeouts.hls_acquisition.saturating_sub(started.elapsed()).max(Duration::from_millis(1)),
		DeadlockPhase::Recording => FILE_STALL_POLL_INTERVAL,
	}
}

async fn check_file_stall(progress: &JobProgress, file_stall_timeout: Duration) -> Option<Reason> {
	let path = progress.output_path.lock().unwrap().clone()?;
	let size_a = tokio::fs::metadata(&path).await.ok()?.len();
	sleep(file_stall_timeout).await;
	let size_b = tokio::fs::metadata(&path).await.ok()?.len();
	if size_b <= size_a {
		warn!(target = "tc.recorder.supervisor", path = %path.display(), "output file stalled");
		Some(Reason::FileStallDetected)
	} else {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn returns_none_when_done_signals_success() {
		let (progress, phase_rx) = JobProgress::new();
		let (done_tx, done_rx) = watch::channel(false);
		let handle = tokio::spawn(watch_for_deadlock(progress, phase_rx, done_rx));
		done_tx.send(true).unwrap();
		let result = handle.await.unwrap();
		assert!(result.is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn fires_hls_timeout_when_never_recording() {
		let (progress, phase_rx) = JobProgress::new();
		let (_done_tx, done_rx) = watch::channel(false);
		let handle = tokio::spawn(watch_for_deadlock(progress, phase_rx, done_rx));
		tokio::time::advance(HLS_ACQUISITION_TIMEOUT + Duration::from_secs(1)).await;
		let result = handle.await.unwrap();
		assert_eq!(result, Some(Reason::HlsTimeout));
	}

	#[tokio::test(start_paused = true)]
	async fn check_file_stall_fires_when_size_is_unchanged() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("out.mp4");
		std::fs::write(&path, b"initial bytes").unwrap();

		let (progress, _phase_rx) = JobProgress::new();
		progress.mark_recording(path);

		let result = check_file_stall(&progress, FILE_STALL_TIMEOUT).await;
		assert_eq!(result, Some(Reason::FileStallDetected));
	}

	#[tokio::test(start_paused = true)]
	async fn check_file_stall_passes_when_size_grows_during_the_window() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("out.mp4");
		std::fs::write(&path, b"initial bytes").unwrap();

		let (progress, _phase_rx) = JobProgress::new();
		progress.mark_recording(path.clone());

		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_secs(1)).await;
			std::fs::write(&path, b"initial bytes and then quite a lot more").unwrap();
		});

		let result = check_file_stall(&progress, FILE_STALL_TIMEOUT).await;
		assert_eq!(result, None);
	}

	#[tokio::test(start_paused = true)]
	async fn fires_file_stall_once_recording_with_config_derived_timeouts() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("out.mp4");
		std::fs::write(&path, b"initial bytes").unwrap();

		let (progress, phase_rx) = JobProgress::new();
		progress.mark_recording(path);
		let (_done_tx, done_rx) = watch::channel(false);
		let timeouts = Timeouts { hls_acquisition: Duration::from_secs(150), file_stall: Duration::from_secs(10), absolute_cap: Duration::from_secs(3600) };

		let handle = tokio::spawn(watch_for_deadlock_with_timeouts(progress, phase_rx, done_rx, timeouts));
		tokio::time::advance(Duration::from_secs(11)).await;
		let result = handle.await.unwrap();
		assert_eq!(result, Some(Reason::FileStallDetected));
	}
}
