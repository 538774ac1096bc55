//! The poll loop (spec §4.4): target normalization and ownership, bounded
//! liveness scheduling, capacity-gated dispatch, authentication escalation,
//! the heartbeat pulse, and the idle watchdog.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tc_detector::DetectReason;
use tc_protocol::{Config, EngineState, Event, EventLine, HeartbeatDocument, Target};
use tc_recorder::{ActiveJob, RecorderWrapper};
use tc_state::EventLog;

use crate::disk_guard;
use crate::targets_file;
use crate::Result;

const SCHEDULER_ID: &str = "tc-monitor";

fn now_unix() -> i64 {
	std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// A one-shot snapshot of the same fields carried in the heartbeat document,
/// for in-process callers (`get_health_status`) that don't want to read the
/// file back off disk.
pub type EngineStatus = HeartbeatDocument;

struct Stats {
	total_checks: AtomicU64,
	total_successes: AtomicU64,
	total_errors: AtomicU64,
	recovery_count: AtomicU64,
}

impl Stats {
	fn new() -> Self {
		Self { total_checks: AtomicU64::new(0), total_successes: AtomicU64::new(0), total_errors: AtomicU64::new(0), recovery_count: AtomicU64::new(0) }
	}
}

struct Tasks {
	poll: Option<JoinHandle<()>>,
	pulse: Option<JoinHandle<()>>,
	watchdog: Option<JoinHandle<()>>,
}

/// The monitor engine. Cheap to clone (everything's behind `Arc`); the
/// background tasks hold their own clone so the handle returned to the
/// caller can be dropped without stopping the loop.
#[derive(Clone)]
pub struct MonitorEngine(Arc<Inner>);

struct Inner {
	config: Config,
	wrapper: Arc<RecorderWrapper>,
	event_log: Arc<EventLog>,

	targets: RwLock<Vec<Target>>,
	active_jobs: DashMap<String, ActiveJob>,
	consecutive_timeouts: DashMap<String, u32>,
	login_attempts_this_cycle: DashMap<String, u32>,
	error_counts: DashMap<String, u32>,

	stats: Stats,
	state: RwLock<EngineState>,
	last_activity: AtomicI64,
	stopping: AtomicBool,

	heartbeat_path: PathBuf,
	tasks: Mutex<Tasks>,
}

enum CheckOutcome {
	Live,
	NotLive,
	AuthRequired,
	Timeout,
	Error,
}

impl MonitorEngine {
	pub fn new(config: Config, wrapper: Arc<RecorderWrapper>, event_log: Arc<EventLog>) -> Self {
		let heartbeat_path = config.state_dir.join("heartbeat.json");
		Self(Arc::new(Inner {
			config,
			wrapper,
			event_log,
			targets: RwLock::new(Vec::new()),
			active_jobs: DashMap::new(),
			consecutive_timeouts: DashMap::new(),
			login_attempts_this_cycle: DashMap::new(),
			error_counts: DashMap::new(),
			stats: Stats::new(),
			state: RwLock::new(EngineState::Stopped),
			last_activity: AtomicI64::new(now_unix()),
			stopping: AtomicBool::new(false),
			heartbeat_path,
			tasks: Mutex::new(Tasks { poll: None, pulse: None, watchdog: None }),
		}))
	}

	/// Loads targets from the targets file, normalizes them, and configures
	/// the wrapper's concurrency limit (spec §4.4).
	pub async fn initialize(&self) -> Result<()> {
		let targets = targets_file::load(&self.0.config.targets_file)?;
		info!(target = "tc.monitor", count = targets.len(), "loaded targets");
		*self.0.targets.write() = targets;
		self.0.wrapper.configure(self.0.config.max_concurrent);
		Ok(())
	}

	pub fn targets(&self) -> Vec<Target> {
		self.0.targets.read().clone()
	}

	pub fn list_targets(&self) -> Vec<String> {
		self.0.targets.read().iter().map(|t| t.canonical_url.clone()).collect()
	}

	pub fn add_target(&self, raw: &str) -> Result<Target> {
		let target = tc_protocol::normalize_url(raw)?;
		let mut targets = self.0.targets.write();
		if !targets.iter().any(|t| t.canonical_url == target.canonical_url) {
			targets.push(target.clone());
		}
		targets_file::save(&self.0.config.targets_file, &targets, Some(&self.0.config.logs_dir))?;
		Ok(target)
	}

	pub fn remove_target(&self, raw: &str) -> Result<bool> {
		let target = tc_protocol::normalize_url(raw)?;
		let mut targets = self.0.targets.write();
		let before = targets.len();
		targets.retain(|t| t.canonical_url != target.canonical_url);
		let removed = targets.len() != before;
		targets_file::save(&self.0.config.targets_file, &targets, Some(&self.0.config.logs_dir))?;
		Ok(removed)
	}

	pub fn clear_targets(&self) -> Result<()> {
		self.0.targets.write().clear();
		targets_file::save(&self.0.config.targets_file, &[], Some(&self.0.config.logs_dir))?;
		Ok(())
	}

	/// Idempotent: calling `start` while already running is a no-op.
	pub async fn start(&self) {
		{
			let mut state = self.0.state.write();
			if *state == EngineState::Running || *state == EngineState::Starting {
				return;
			}
			*state = EngineState::Starting;
		}
		self.0.stopping.store(false, Ordering::SeqCst);
		self.touch_activity();

		let poll = tokio::spawn(self.clone().poll_loop());
		let pulse = tokio::spawn(self.clone().pulse_loop());
		let watchdog = tokio::spawn(self.clone().watchdog_loop());
		*self.0.tasks.lock() = Tasks { poll: Some(poll), pulse: Some(pulse), watchdog: Some(watchdog) };
		*self.0.state.write() = EngineState::Running;
		self.publish_heartbeat();
	}

	/// Signals stop, waits up to 10s for active jobs to finish, then cancels
	/// the pulse/watchdog/poll tasks and shuts down the wrapper (spec
	/// §4.4.5).
	pub async fn stop(&self) {
		if *self.0.state.read() == EngineState::Stopped {
			return;
		}
		*self.0.state.write() = EngineState::Stopping;
		self.0.stopping.store(true, Ordering::SeqCst);

		let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
		while !self.0.active_jobs.is_empty() && tokio::time::Instant::now() < deadline {
			tokio::time::sleep(Duration::from_millis(100)).await;
		}

		let tasks = std::mem::replace(&mut *self.0.tasks.lock(), Tasks { poll: None, pulse: None, watchdog: None });
		for handle in [tasks.poll, tasks.pulse, tasks.watchdog].into_iter().flatten() {
			handle.abort();
			let _ = handle.await;
		}

		let urls: Vec<String> = self.0.active_jobs.iter().map(|e| e.key().clone()).collect();
		for url in urls {
			if let Some((_, job)) = self.0.active_jobs.remove(&url) {
				job.cancel().await;
			}
		}

		*self.0.state.write() = EngineState::Stopped;
		self.publish_heartbeat();
		self.0.wrapper.shutdown().await;
	}

	pub fn get_health_status(&self) -> EngineStatus {
		self.snapshot()
	}

	fn touch_activity(&self) {
		self.0.last_activity.store(now_unix(), Ordering::SeqCst);
	}

	fn snapshot(&self) -> HeartbeatDocument {
		HeartbeatDocument {
			ts: now_unix(),
			state: *self.0.state.read(),
			active_jobs: self.0.active_jobs.len(),
			targets: self.0.targets.read().len(),
			max_concurrent: self.0.config.max_concurrent,
			total_checks: self.0.stats.total_checks.load(Ordering::SeqCst),
			total_successes: self.0.stats.total_successes.load(Ordering::SeqCst),
			total_errors: self.0.stats.total_errors.load(Ordering::SeqCst),
			recovery_count: self.0.stats.recovery_count.load(Ordering::SeqCst),
			last_activity: self.0.last_activity.load(Ordering::SeqCst),
		}
	}

	fn publish_heartbeat(&self) {
		let doc = self.snapshot();
		if let Err(e) = tc_state::write_heartbeat(&self.0.heartbeat_path, &doc, Some(&self.0.config.logs_dir)) {
			warn!(target = "tc.monitor", error = %e, "failed to write heartbeat");
		}
	}

	fn log_event(&self, event: Event) {
		let line = EventLine { ts: now_unix(), event };
		if let Err(e) = self.0.event_log.append(line.ts, &line) {
			warn!(target = "tc.monitor", error = %e, "failed to append monitor event log line");
		}
	}

	/// The pulse task (spec §4.4.3): writes the heartbeat every
	/// `heartbeat_interval_secs` regardless of poll activity so long
	/// recordings never trip the UI's staleness check.
	async fn pulse_loop(self) {
		let interval = Duration::from_secs(self.0.config.heartbeat_interval_secs);
		loop {
			tokio::time::sleep(interval).await;
			if self.0.stopping.load(Ordering::SeqCst) {
				return;
			}
			self.publish_heartbeat();
		}
	}

	/// The watchdog task (spec §4.4.4): when the engine has been idle for
	/// more than `watchdog_idle_threshold_secs` *and* no jobs are active, it
	/// resets counters, forces a re-login, and rebuilds the wrapper's gates.
	/// Recording integrity always wins: an active job suppresses the reset
	/// entirely.
	async fn watchdog_loop(self) {
		let interval = Duration::from_secs(self.0.config.watchdog_interval_secs);
		let threshold = self.0.config.watchdog_idle_threshold_secs as i64;
		loop {
			tokio::time::sleep(interval).await;
			if self.0.stopping.load(Ordering::SeqCst) {
				return;
			}
			let idle_seconds = now_unix() - self.0.last_activity.load(Ordering::SeqCst);
			if idle_seconds > threshold && self.0.active_jobs.is_empty() {
				self.trigger_recovery("watchdog_idle").await;
			}
		}
	}

	async fn trigger_recovery(&self, cause: &str) {
		warn!(target = "tc.monitor", cause, "recovery triggered");
		self.0.stats.recovery_count.fetch_add(1, Ordering::SeqCst);
		self.0.consecutive_timeouts.clear();
		self.log_event(Event::RecoveryTriggered { cause: cause.to_string() });
		let _ = self.0.wrapper.ensure_login(true).await;
		let _ = self.0.wrapper.emergency_reset().await;
		self.touch_activity();
	}

	/// The main poll loop (spec §4.4.1): every `poll_interval_secs`, checks
	/// every non-active target concurrently, dispatches the live ones under
	/// capacity, and republishes the heartbeat after every mutating step.
	async fn poll_loop(self) {
		let interval = Duration::from_secs(self.0.config.poll_interval_secs);
		loop {
			if self.0.stopping.load(Ordering::SeqCst) {
				return;
			}
			self.poll_once().await;
			self.publish_heartbeat();
			tokio::time::sleep(interval).await;
		}
	}

	async fn poll_once(&self) {
		self.0.login_attempts_this_cycle.clear();

		let candidates: Vec<Target> = self.0.targets.read().iter().filter(|t| !self.0.active_jobs.contains_key(&t.canonical_url)).cloned().collect();
		if candidates.is_empty() {
			return;
		}

		let checks = futures::future::join_all(candidates.iter().cloned().map(|target| {
			let this = self.clone();
			async move {
				let outcome = this.check_target(&target).await;
				(target, outcome)
			}
		}))
		.await;

		let live_targets: Vec<Target> = checks.into_iter().filter_map(|(target, outcome)| matches!(outcome, CheckOutcome::Live).then_some(target)).collect();
		self.touch_activity();
		self.publish_heartbeat();

		for target in live_targets {
			self.try_dispatch(target);
		}
	}

	/// Runs the detector once (bounded by `liveness_check_timeout_secs`,
	/// spec §5's timeout table), then folds in the AUTH_REQUIRED escalation
	/// (spec §4.4.2): forced re-login, a 1.5s settle delay, a cookie
	/// re-export, and a single recheck, capped at 2 attempts per URL per
	/// poll cycle.
	async fn check_target(&self, target: &Target) -> CheckOutcome {
		let mut outcome = self.run_detector_once(&target.canonical_url).await;

		if matches!(outcome, CheckOutcome::AuthRequired) {
			let url = target.canonical_url.clone();
			let attempts = {
				let mut entry = self.0.login_attempts_this_cycle.entry(url.clone()).or_insert(0);
				*entry += 1;
				*entry
			};
			if attempts <= 2 {
				let _ = self.0.wrapper.ensure_login(true).await;
				tokio::time::sleep(Duration::from_millis(1500)).await;
				let _ = self.0.wrapper.ensure_complete_cookies(true).await;
				outcome = self.run_detector_once(&url).await;
				// Only one recheck happens per poll cycle, so there is no
				// second attempt to wait for: still AuthRequired here means
				// give up for this cycle.
				if matches!(outcome, CheckOutcome::AuthRequired) {
					self.log_event(Event::AuthRequiredGiveup { url: url.clone(), retry_count: attempts });
				}
			} else {
				self.log_event(Event::AuthRequiredGiveup { url: url.clone(), retry_count: attempts });
			}
		}

		self.0.consecutive_timeouts.entry(target.canonical_url.clone()).and_modify(|c| *c = if matches!(outcome, CheckOutcome::Timeout) { *c + 1 } else { 0 }).or_insert(if matches!(outcome, CheckOutcome::Timeout) { 1 } else { 0 });

		if matches!(outcome, CheckOutcome::Timeout) {
			let consecutive = *self.0.consecutive_timeouts.get(&target.canonical_url).unwrap();
			if consecutive >= 3 && self.0.active_jobs.is_empty() {
				self.trigger_recovery("consecutive_liveness_timeouts").await;
			}
		}

		if matches!(outcome, CheckOutcome::Error) {
			*self.0.error_counts.entry(target.canonical_url.clone()).or_insert(0) += 1;
		}

		outcome
	}

	async fn run_detector_once(&self, url: &str) -> CheckOutcome {
		self.0.stats.total_checks.fetch_add(1, Ordering::SeqCst);
		let timeout = Duration::from_secs(self.0.config.liveness_check_timeout_secs);
		match tokio::time::timeout(timeout, self.0.wrapper.detector().check(url)).await {
			Ok(Ok(result)) => {
				self.log_event(Event::DetectorResult { url: url.to_string(), method: format!("{:?}", result.method).to_lowercase(), is_live: result.is_live });
				match result.reason {
					DetectReason::Live => CheckOutcome::Live,
					DetectReason::AuthRequired => CheckOutcome::AuthRequired,
					_ => CheckOutcome::NotLive,
				}
			}
			Ok(Err(e)) => {
				warn!(target = "tc.monitor", url, error = %e, "liveness check failed");
				CheckOutcome::Error
			}
			Err(_) => {
				warn!(target = "tc.monitor", url, "liveness check timed out");
				CheckOutcome::Timeout
			}
		}
	}

	/// Dispatches while the wrapper's active-job count is below
	/// `max_concurrent`; over-capacity live targets are published as
	/// `WAITING` and retried next cycle (spec §4.4.1 step 3). A target that
	/// would be dispatched but fails the disk guard is skipped entirely
	/// rather than marked waiting — more capacity won't fix a full disk.
	fn try_dispatch(&self, target: Target) {
		if self.0.active_jobs.len() >= self.0.config.max_concurrent {
			self.0.wrapper.set_state(&target.canonical_url, tc_protocol::RecordingState::Waiting);
			self.log_event(Event::CapacityWait { url: target.canonical_url.clone() });
			return;
		}

		let free_gb = disk_guard::free_space_gb(&self.0.config.recordings_dir);
		if free_gb < self.0.config.disk_space_min_gb {
			self.0.wrapper.set_state(&target.canonical_url, tc_protocol::RecordingState::Waiting);
			self.log_event(Event::DiskGuardSkip { url: target.canonical_url.clone(), free_gb, min_gb: self.0.config.disk_space_min_gb });
			return;
		}

		self.dispatch(target);
	}

	fn dispatch(&self, target: Target) {
		let url = target.canonical_url.clone();
		let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
		let this = self.clone();
		let handle = tokio::spawn(async move {
			let result = this.0.wrapper.start_record(&target, SCHEDULER_ID, None, None, false, cancel_rx).await;
			if result.ok {
				this.0.stats.total_successes.fetch_add(1, Ordering::SeqCst);
			} else {
				this.0.stats.total_errors.fetch_add(1, Ordering::SeqCst);
			}
			this.0.active_jobs.remove(&url);
			this.touch_activity();
			this.publish_heartbeat();
			result
		});
		self.0.active_jobs.insert(target.canonical_url.clone(), ActiveJob::new(handle, cancel_tx));
	}
}

// Exercised end-to-end in crates/tc-monitor/tests/engine.rs, which wires a
// fake browser/driver behind the detector so the poll loop's target-list
// ownership and lifecycle can run without a real browser or network.
