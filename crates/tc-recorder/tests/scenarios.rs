//! Seed scenarios (spec §8): the wrapper driven end-to-end against a fake
//! browser driver and a fake download runner, never shelling out to a real
//! subprocess or real Chromium.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use tc_browser::capability::{BrowserContext, BrowserDriver, NewContextOptions, Page, ResponseInfo, WaitUntil};
use tc_browser::cookie::Cookie;
use tc_browser::error::Result as BrowserResult;
use tc_browser::singleton::BrowserSingleton;
use tc_detector::{DetectorConfig, LivenessDetector};
use tc_protocol::{Config, RecordingState};
use tc_recorder::subprocess::{DownloadRunner, SubprocessOutcome};
use tc_recorder::{never_cancelled, JobProgress, RecorderWrapper};
use tc_state::{EventLog, GuiBridgeLog};
use tokio::sync::watch;

fn strong_cookie() -> Cookie {
	Cookie { name: "tc_ss".to_string(), value: "strong-session".to_string(), domain: "twitcasting.tv".to_string(), path: "/".to_string(), expires: None, http_only: true, secure: true }
}

struct FakePage;

#[async_trait]
impl Page for FakePage {
	async fn goto(&self, _url: &str, _wait_until: WaitUntil, _timeout: Duration) -> BrowserResult<()> {
		Ok(())
	}
	async fn evaluate(&self, _script: &str) -> BrowserResult<Value> {
		Ok(Value::Null)
	}
	async fn url(&self) -> BrowserResult<String> {
		Ok(String::new())
	}
	async fn close(&self) -> BrowserResult<()> {
		Ok(())
	}
	async fn on_response(&self, _callback: Box<dyn Fn(ResponseInfo) + Send + Sync>) -> BrowserResult<u64> {
		Ok(0)
	}
	async fn off_response(&self, _subscription_id: u64) -> BrowserResult<()> {
		Ok(())
	}
}

/// Always reports a strong session cookie, so `guided_login_wizard` clears
/// its grace period and breaks out on the first poll.
struct FakeContext {
	closed: AtomicBool,
}

#[async_trait]
impl BrowserContext for FakeContext {
	async fn cookies(&self) -> BrowserResult<Vec<Cookie>> {
		Ok(vec![strong_cookie()])
	}
	async fn add_cookies(&self, _cookies: &[Cookie]) -> BrowserResult<()> {
		Ok(())
	}
	async fn storage_state(&self) -> BrowserResult<Value> {
		Ok(Value::Null)
	}
	async fn new_page(&self) -> BrowserResult<Box<dyn Page>> {
		Ok(Box::new(FakePage))
	}
	async fn close(&self) -> BrowserResult<()> {
		self.closed.store(true, Ordering::SeqCst);
		Ok(())
	}
	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

struct FakeDriver {
	connected: AtomicBool,
}

#[async_trait]
impl BrowserDriver for FakeDriver {
	async fn launch(&self, _headless: bool) -> BrowserResult<()> {
		self.connected.store(true, Ordering::SeqCst);
		Ok(())
	}
	async fn new_context(&self, _opts: NewContextOptions) -> BrowserResult<Box<dyn BrowserContext>> {
		Ok(Box::new(FakeContext { closed: AtomicBool::new(false) }))
	}
	async fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}
	async fn stop(&self) -> BrowserResult<()> {
		self.connected.store(false, Ordering::SeqCst);
		Ok(())
	}
}

/// Seeds a Netscape-format cookie snapshot directly, the way a prior
/// successful login would have left one on disk, so `start_record` can skip
/// the guided login wizard entirely.
fn seed_strong_cookie_snapshot(cookie_dir: &Path) {
	tc_browser::cookie::export_netscape_jar(&[strong_cookie()], "twitcasting.tv", cookie_dir).unwrap();
}

/// A download runner that always returns a fixed outcome, counting calls.
struct FixedRunner {
	outcomes: std::sync::Mutex<Vec<std::io::Result<SubprocessOutcome>>>,
	calls: AtomicU32,
}

impl FixedRunner {
	fn sequence(outcomes: Vec<std::io::Result<SubprocessOutcome>>) -> Self {
		Self { outcomes: std::sync::Mutex::new(outcomes), calls: AtomicU32::new(0) }
	}

	fn calls(&self) -> u32 {
		self.calls.load(Ordering::SeqCst)
	}
}

fn outcome_ok(dir: &Path, job_id: &str) -> SubprocessOutcome {
	let path = dir.join(format!("{job_id}.mp4"));
	std::fs::write(&path, b"fake mp4 bytes").unwrap();
	SubprocessOutcome { exit_ok: true, tail: "done".to_string(), output_files: vec![path], cancelled: false }
}

fn outcome_403() -> SubprocessOutcome {
	SubprocessOutcome { exit_ok: false, tail: "ERROR: 403 Forbidden".to_string(), output_files: vec![], cancelled: false }
}

#[async_trait]
impl DownloadRunner for FixedRunner {
	#[allow(clippy::too_many_arguments)]
	async fn run(
		&self,
		_config: &Config,
		_hls_url: &str,
		_referer: &str,
		_user_agent: &str,
		_cookie_jar: &Path,
		_output_template: &Path,
		_duration_secs: Option<u64>,
		progress: Arc<JobProgress>,
		_cancel: watch::Receiver<bool>,
	) -> std::io::Result<SubprocessOutcome> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let mut outcomes = self.outcomes.lock().unwrap();
		if outcomes.is_empty() {
			panic!("FixedRunner called more times than outcomes were provided");
		}
		progress.mark_hls_captured();
		outcomes.remove(0)
	}
}

fn test_config(dir: &Path) -> Config {
	Config {
		max_concurrent: 2,
		cookie_dir: dir.join("cookies"),
		recordings_dir: dir.join("recordings"),
		logs_dir: dir.join("logs"),
		state_dir: dir.to_path_buf(),
		targets_file: dir.join("targets.json"),
		..Config::default()
	}
}

fn build_wrapper(dir: &Path, config: Config, runner: Arc<dyn DownloadRunner>) -> Arc<RecorderWrapper> {
	let browser = Arc::new(BrowserSingleton::new(Arc::new(FakeDriver { connected: AtomicBool::new(false) }), config.cookie_dir.clone(), dir.join("storage_state.json")));
	let detector = Arc::new(LivenessDetector::new(
		browser.clone(),
		DetectorConfig { cookie_dir: config.cookie_dir.clone(), streaming_probe_tool_path: dir.join("no-such-streamlink"), streaming_probe_timeout: Duration::from_secs(5), http_timeout: Duration::from_secs(2) },
	));
	let event_log = Arc::new(EventLog::new(&config.logs_dir, "wrapper", config.event_log_rotate_bytes).unwrap());
	let gui_bridge = Arc::new(GuiBridgeLog::new(config.logs_dir.join("monitor_gui_bridge.jsonl")).unwrap());
	Arc::new(RecorderWrapper::with_runner(config, browser, detector, event_log, gui_bridge, runner))
}

fn alice_target() -> tc_protocol::Target {
	tc_protocol::normalize_url("c:alice").unwrap()
}

fn bob_target() -> tc_protocol::Target {
	tc_protocol::normalize_url("c:bob").unwrap()
}

#[tokio::test]
async fn happy_path_records_and_returns_to_idle() {
	let dir = tempfile::tempdir().unwrap();
	let config = test_config(dir.path());
	std::fs::create_dir_all(&config.recordings_dir).unwrap();
	seed_strong_cookie_snapshot(&config.cookie_dir);

	let runner = Arc::new(FixedRunner::sequence(vec![Ok(outcome_ok(&config.recordings_dir, "job-happy"))]));
	let wrapper = build_wrapper(dir.path(), config, runner.clone());

	let target = alice_target();
	let result = wrapper.start_record(&target, "scheduler-a", None, Some("job-happy".to_string()), false, never_cancelled()).await;

	assert!(result.ok, "expected success, got reason {:?}", result.reason);
	assert_eq!(result.retry_count, 0);
	assert_eq!(result.output_files.len(), 1);
	assert_eq!(runner.calls(), 1);
	assert_eq!(wrapper.get_recording_states().get(&target.canonical_url).copied(), Some(RecordingState::Idle));
}

#[tokio::test]
async fn capacity_overflow_rejects_a_second_url_past_max_concurrent() {
	// `max_concurrent = 1` and a runner that blocks the first call until
	// released, confirming the second `start_record` on a different URL
	// cannot reach RECORDING in parallel (spec §8 boundary: "never succeeds
	// in parallel").
	struct BlockingThenOk {
		release: tokio::sync::Notify,
		released: AtomicBool,
	}

	#[async_trait]
	impl DownloadRunner for BlockingThenOk {
		#[allow(clippy::too_many_arguments)]
		async fn run(
			&self,
			_c: &Config,
			_h: &str,
			_r: &str,
			_ua: &str,
			_cj: &Path,
			output_template: &Path,
			_d: Option<u64>,
			progress: Arc<JobProgress>,
			_cancel: watch::Receiver<bool>,
		) -> std::io::Result<SubprocessOutcome> {
			progress.mark_hls_captured();
			if !self.released.load(Ordering::SeqCst) {
				self.release.notified().await;
			}
			let path = output_template.with_extension("mp4");
			std::fs::write(&path, b"data").unwrap();
			Ok(SubprocessOutcome { exit_ok: true, tail: "done".to_string(), output_files: vec![path], cancelled: false })
		}
	}

	let dir = tempfile::tempdir().unwrap();
	let mut config = test_config(dir.path());
	config.max_concurrent = 1;
	config.gate_acquire_timeout_secs = 1; // shorten from 30s for a fast test
	std::fs::create_dir_all(&config.recordings_dir).unwrap();
	seed_strong_cookie_snapshot(&config.cookie_dir);

	let runner = Arc::new(BlockingThenOk { release: tokio::sync::Notify::new(), released: AtomicBool::new(false) });
	let wrapper = build_wrapper(dir.path(), config, runner.clone());

	let alice = alice_target();
	let bob = bob_target();

	let wrapper_a = wrapper.clone();
	let first = tokio::spawn(async move { wrapper_a.start_record(&alice, "scheduler-a", None, Some("job-a".to_string()), false, never_cancelled()).await });
	// Give the first call time to clear the process gate and enter RECORDING.
	tokio::time::sleep(Duration::from_millis(150)).await;

	let second = wrapper.start_record(&bob, "scheduler-a", None, Some("job-b".to_string()), false, never_cancelled()).await;
	assert!(!second.ok);
	assert_eq!(second.reason, Some(tc_protocol::Reason::GlobalConcurrencyTimeout));

	runner.released.store(true, Ordering::SeqCst);
	runner.release.notify_one();
	let first_result = first.await.unwrap();
	assert!(first_result.ok);
}

#[tokio::test]
async fn jit_retry_succeeds_after_a_403_on_the_first_attempt() {
	let dir = tempfile::tempdir().unwrap();
	let config = test_config(dir.path());
	std::fs::create_dir_all(&config.recordings_dir).unwrap();
	// No pre-seeded snapshot: the initial preflight must itself go through
	// the guided wizard once (FakeContext always reports a strong cookie).

	let runner = Arc::new(FixedRunner::sequence(vec![Ok(outcome_403()), Ok(outcome_ok(&config.recordings_dir, "job-retry"))]));
	let wrapper = build_wrapper(dir.path(), config, runner.clone());

	let target = alice_target();
	let result = wrapper.start_record(&target, "scheduler-a", None, Some("job-retry".to_string()), false, never_cancelled()).await;

	assert!(result.ok, "expected eventual success, got reason {:?}", result.reason);
	assert_eq!(result.retry_count, 1);
	assert_eq!(runner.calls(), 2);
}

#[tokio::test]
async fn jit_retry_only_fires_once_then_gives_up() {
	// Two consecutive 403s: the wrapper retries exactly once (spec §4.3.5),
	// then returns the failure rather than looping forever.
	let dir = tempfile::tempdir().unwrap();
	let config = test_config(dir.path());
	std::fs::create_dir_all(&config.recordings_dir).unwrap();

	let runner = Arc::new(FixedRunner::sequence(vec![Ok(outcome_403()), Ok(outcome_403())]));
	let wrapper = build_wrapper(dir.path(), config, runner.clone());

	let target = alice_target();
	let result = wrapper.start_record(&target, "scheduler-a", None, Some("job-crash".to_string()), false, never_cancelled()).await;

	assert!(!result.ok);
	assert_eq!(result.reason, Some(tc_protocol::Reason::Http403));
	assert_eq!(result.retry_count, 1);
	assert_eq!(runner.calls(), 2);
}

/// A runner that reports the HLS playlist captured, then blocks until
/// `cancel` actually fires, mirroring the real subprocess's `select!` race
/// between `child.wait()` and the cancel signal (spec §4.3.6, §5).
struct CancelAwareRunner;

#[async_trait]
impl DownloadRunner for CancelAwareRunner {
	#[allow(clippy::too_many_arguments)]
	async fn run(
		&self,
		_config: &Config,
		_hls_url: &str,
		_referer: &str,
		_user_agent: &str,
		_cookie_jar: &Path,
		_output_template: &Path,
		_duration_secs: Option<u64>,
		progress: Arc<JobProgress>,
		mut cancel: watch::Receiver<bool>,
	) -> std::io::Result<SubprocessOutcome> {
		progress.mark_hls_captured();
		let _ = cancel.wait_for(|c| *c).await;
		Ok(SubprocessOutcome { exit_ok: false, tail: String::new(), output_files: vec![], cancelled: true })
	}
}

#[tokio::test]
async fn cancelling_an_in_flight_recording_reports_cancelled_and_releases_gates() {
	let dir = tempfile::tempdir().unwrap();
	let config = test_config(dir.path());
	std::fs::create_dir_all(&config.recordings_dir).unwrap();
	seed_strong_cookie_snapshot(&config.cookie_dir);

	let wrapper = build_wrapper(dir.path(), config, Arc::new(CancelAwareRunner));
	let target = alice_target();
	let (cancel_tx, cancel_rx) = watch::channel(false);

	let wrapper_a = wrapper.clone();
	let target_a = target.clone();
	let handle = tokio::spawn(async move { wrapper_a.start_record(&target_a, "scheduler-a", None, Some("job-cancel".to_string()), false, cancel_rx).await });

	// Give the call time to clear the gates and reach RECORDING before cancelling.
	tokio::time::sleep(Duration::from_millis(100)).await;
	cancel_tx.send(true).unwrap();

	let result = handle.await.unwrap();
	assert!(!result.ok);
	assert_eq!(result.reason, Some(tc_protocol::Reason::Cancelled));
	assert_eq!(wrapper.get_recording_states().get(&target.canonical_url).copied(), Some(RecordingState::Error));

	// The per-URL lock must be released so the same target can be dispatched again.
	let second = wrapper.start_record(&target, "scheduler-a", None, Some("job-after-cancel".to_string()), false, never_cancelled()).await;
	assert_ne!(second.reason, Some(tc_protocol::Reason::UrlAlreadyRecording));
}

/// A runner that reports the HLS playlist captured, then waits on a
/// `Notify` before finishing, so a test can inspect `get_active_jobs()`
/// mid-recording before releasing it.
struct HoldUntilReleased {
	release: tokio::sync::Notify,
}

#[async_trait]
impl DownloadRunner for HoldUntilReleased {
	#[allow(clippy::too_many_arguments)]
	async fn run(
		&self,
		_config: &Config,
		_hls_url: &str,
		_referer: &str,
		_user_agent: &str,
		_cookie_jar: &Path,
		output_template: &Path,
		_duration_secs: Option<u64>,
		progress: Arc<JobProgress>,
		_cancel: watch::Receiver<bool>,
	) -> std::io::Result<SubprocessOutcome> {
		progress.mark_hls_captured();
		self.release.notified().await;
		let path = output_template.with_extension("mp4");
		std::fs::write(&path, b"data").unwrap();
		Ok(SubprocessOutcome { exit_ok: true, tail: "done".to_string(), output_files: vec![path], cancelled: false })
	}
}

#[tokio::test]
async fn active_jobs_reflects_job_lifecycle_through_recording_and_completion() {
	let dir = tempfile::tempdir().unwrap();
	let config = test_config(dir.path());
	std::fs::create_dir_all(&config.recordings_dir).unwrap();
	seed_strong_cookie_snapshot(&config.cookie_dir);

	let runner = Arc::new(HoldUntilReleased { release: tokio::sync::Notify::new() });
	let wrapper = build_wrapper(dir.path(), config, runner.clone());

	assert!(wrapper.get_active_jobs().is_empty());

	let target = alice_target();
	let wrapper_a = wrapper.clone();
	let target_a = target.clone();
	let handle = tokio::spawn(async move { wrapper_a.start_record(&target_a, "scheduler-a", None, Some("job-lifecycle".to_string()), false, never_cancelled()).await });

	// Give the call time to clear the gates, run the login preflight, and
	// have the runner observe the HLS playlist.
	tokio::time::sleep(Duration::from_millis(150)).await;

	let jobs = wrapper.get_active_jobs();
	assert_eq!(jobs.len(), 1, "expected exactly one job in flight mid-recording");
	let job = &jobs[0];
	assert_eq!(job.job_id, "job-lifecycle");
	assert_eq!(job.canonical_url, target.canonical_url);
	assert_eq!(job.phase, tc_protocol::JobPhase::Recording);
	assert!(job.completed_at.is_none());
	// The per-URL `TargetState` must have followed the same signal (review
	// fix: `mark_hls_captured` drives both, not just the job phase).
	assert_eq!(wrapper.get_recording_states().get(&target.canonical_url).copied(), Some(RecordingState::Recording));

	runner.release.notify_one();
	let result = handle.await.unwrap();
	assert!(result.ok, "expected success, got reason {:?}", result.reason);
	assert!(wrapper.get_active_jobs().is_empty(), "completed jobs must not be retained past their terminal transition");
}

#[tokio::test]
async fn emergency_reset_rebuilds_gates_and_clears_target_state() {
	let dir = tempfile::tempdir().unwrap();
	let config = test_config(dir.path());
	std::fs::create_dir_all(&config.recordings_dir).unwrap();
	seed_strong_cookie_snapshot(&config.cookie_dir);

	let runner = Arc::new(FixedRunner::sequence(vec![Ok(outcome_ok(&config.recordings_dir, "job-reset"))]));
	let wrapper = build_wrapper(dir.path(), config, runner);

	let target = alice_target();
	let result = wrapper.start_record(&target, "scheduler-a", None, Some("job-reset".to_string()), false, never_cancelled()).await;
	assert!(result.ok);
	assert_eq!(wrapper.get_recording_states().get(&target.canonical_url).copied(), Some(RecordingState::Idle));

	wrapper.emergency_reset().await.unwrap();
	assert!(wrapper.get_recording_states().is_empty(), "emergency reset must clear every target's recording state");
}
