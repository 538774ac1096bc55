//! The recorder wrapper: gates, per-URL state machine, the download
//! subprocess, the phase-aware supervisor, and JIT retry tied together
//! (spec §4.3).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::warn;

use tc_browser::cookie::LoginStrength;
use tc_browser::singleton::BrowserSingleton;
use tc_detector::LivenessDetector;
use tc_protocol::{Config, Event, EventLine, GuiStateKind, GuiStateLine, JobPhase, Reason, RecordResult, RecordingJob, RecordingState, Target, TargetState};
use tc_state::{EventLog, GuiBridgeLog, StateProvider, SystemHealth};

use crate::error::{Error, Result};
use crate::gates::{GateError, GateSet, PerUrlLocks, ProcessGate, SchedulerGates};
use crate::supervisor::{self, DeadlockPhase, JobProgress, Timeouts};
use crate::subprocess::{self, DownloadRunner, ProcessRunner};

/// A cancel signal for callers (tests, one-shot CLI recordings) that never
/// intend to cancel; `tc-monitor`'s dispatch loop builds its own channel per
/// job instead so `MonitorEngine::stop` can actually reach it.
pub fn never_cancelled() -> watch::Receiver<bool> {
	watch::channel(false).1
}

fn now_unix() -> i64 {
	std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn new_job_id() -> String {
	uuid::Uuid::new_v4().to_string()
}

pub struct RecorderWrapper {
	config: RwLock<Config>,
	browser: Arc<BrowserSingleton>,
	detector: Arc<LivenessDetector>,
	event_log: Arc<EventLog>,
	gui_bridge: Arc<GuiBridgeLog>,
	per_url_locks: PerUrlLocks,
	process_gate: ProcessGate,
	scheduler_gates: SchedulerGates,
	states: DashMap<String, TargetState>,
	/// Job id -> dispatch time for every recording currently running inside
	/// `start_record`. A caller that wants cancellation spawns `start_record`
	/// itself and keeps the [`crate::active_job::ActiveJob`] handle; this map
	/// only backs the introspection surface (`system_health`, the emergency
	/// reset refusal check).
	active_jobs: DashMap<String, std::time::Instant>,
	/// The spec §3 Recording Job record for every job currently in flight,
	/// kept live through `Preparing -> LoginCheck -> Recording -> Finalizing`
	/// and a terminal phase, then removed — mirrors `active_jobs` but carries
	/// the full record rather than just a timestamp, for introspection
	/// callers that want more than a count (`get_active_jobs`).
	jobs: DashMap<String, RecordingJob>,
	recovery_count: AtomicU32,
	runner: Arc<dyn DownloadRunner>,
}

impl RecorderWrapper {
	pub fn new(config: Config, browser: Arc<BrowserSingleton>, detector: Arc<LivenessDetector>, event_log: Arc<EventLog>, gui_bridge: Arc<GuiBridgeLog>) -> Self {
		Self::with_runner(config, browser, detector, event_log, gui_bridge, Arc::new(ProcessRunner))
	}

	/// Same as [`Self::new`] but with the download tool swapped for a fake,
	/// used by integration tests that drive the gates and state machine
	/// without shelling out (spec §8's seed scenarios).
	pub fn with_runner(config: Config, browser: Arc<BrowserSingleton>, detector: Arc<LivenessDetector>, event_log: Arc<EventLog>, gui_bridge: Arc<GuiBridgeLog>, runner: Arc<dyn DownloadRunner>) -> Self {
		let max_concurrent = config.max_concurrent;
		let acquire_timeout = Duration::from_secs(config.gate_acquire_timeout_secs);
		Self {
			config: RwLock::new(config),
			browser,
			detector,
			event_log,
			gui_bridge,
			per_url_locks: PerUrlLocks::new(),
			process_gate: ProcessGate::new(max_concurrent, acquire_timeout),
			scheduler_gates: SchedulerGates::new(max_concurrent, acquire_timeout),
			states: DashMap::new(),
			active_jobs: DashMap::new(),
			jobs: DashMap::new(),
			recovery_count: AtomicU32::new(0),
			runner,
		}
	}

	pub fn configure(&self, max_concurrent: usize) {
		self.config.write().max_concurrent = max_concurrent;
		self.process_gate.configure(max_concurrent);
		self.scheduler_gates.configure(max_concurrent);
	}

	/// Forces a login check (or runs one if the current snapshot isn't
	/// `Strong`), returning the resulting strength.
	pub async fn ensure_login(&self, force: bool) -> Result<LoginStrength> {
		let current = self.browser.check_login_status_rechecked(self.browser.check_login_status()).await;
		if !force && current == LoginStrength::Strong {
			return Ok(current);
		}
		let timeout = Duration::from_secs(self.config.read().login_wizard_timeout_secs);
		self.log_event(Event::LoginAttempt { forced: force });
		self.browser.guided_login_wizard(timeout).await?;
		Ok(self.browser.check_login_status())
	}

	/// Re-exports cookies if the current snapshot isn't `Strong` or
	/// `force_refresh` is set, waiting briefly for the new snapshot to land.
	pub async fn ensure_complete_cookies(&self, force_refresh: bool) -> Result<PathBuf> {
		let cookie_dir = self.config.read().cookie_dir.clone();
		if !force_refresh && self.browser.check_login_status() == LoginStrength::Strong {
			if let Some((path, _, _)) = tc_browser::cookie::read_latest_snapshot(&cookie_dir) {
				return Ok(path);
			}
		}
		let path = self.browser.export_cookies(None).await?;
		let strength = self.browser.check_login_status();
		self.log_event(Event::CookieExported { strength: wire_strength(strength), path: path.display().to_string() });
		Ok(path)
	}

	/// The liveness detector, shared with `tc-monitor`'s poll loop so both
	/// crates check the same browser/cookie state.
	pub fn detector(&self) -> &Arc<LivenessDetector> {
		&self.detector
	}

	pub fn get_recording_states(&self) -> HashMap<String, RecordingState> {
		self.states.iter().map(|e| (e.key().clone(), e.value().state)).collect()
	}

	/// External hint used by the monitor's dispatch loop when a live target
	/// can't be scheduled this cycle because capacity is exhausted (spec
	/// §4.3, §4.4.1): publishes `WAITING` so consumers of
	/// `get_recording_states` see it before the next poll retries.
	pub fn set_state(&self, url: &str, state: RecordingState) {
		self.set_state_internal(url, state, state);
	}

	fn set_state_internal(&self, url: &str, state: RecordingState, phase: RecordingState) {
		let mut entry = self.states.entry(url.to_string()).or_insert_with(|| TargetState::idle(url.to_string()));
		entry.state = state;
		entry.phase = phase;
		self.log_event(Event::StateTransition { url: url.to_string(), state, phase });
	}

	/// Every [`RecordingJob`] currently in flight (spec §3's Recording Job
	/// model), for introspection callers that want more than the coarse
	/// per-URL `TargetState` — e.g. output files accumulated so far, or the
	/// retry count of a job still running.
	pub fn get_active_jobs(&self) -> Vec<RecordingJob> {
		self.jobs.iter().map(|e| e.value().clone()).collect()
	}

	fn set_job_phase(&self, job_id: &str, phase: JobPhase) {
		if let Some(mut job) = self.jobs.get_mut(job_id) {
			job.phase = phase;
		}
	}

	/// Records the terminal phase and result on a job, then drops it from
	/// the live map — spec §3: "removed from the active set on terminal
	/// transition. Completed jobs are not retained in memory beyond the
	/// current process lifetime."
	fn finish_job(&self, job_id: &str, phase: JobPhase, output_files: Vec<String>, error: Option<Reason>, retry_count: u32) {
		if let Some(mut job) = self.jobs.get_mut(job_id) {
			job.phase = phase;
			job.completed_at = Some(now_unix());
			job.output_files = output_files;
			job.error = error;
			job.retry_count = retry_count;
		}
		self.jobs.remove(job_id);
	}

	fn log_event(&self, event: Event) {
		let line = EventLine { ts: now_unix(), event };
		if let Err(e) = self.event_log.append(line.ts, &line) {
			warn!(target = "tc.recorder", error = %e, "failed to append event log line");
		}
	}

	fn log_gui_state(&self, url: &str, job_id: &str, recording: bool, ok: Option<bool>) {
		let line = GuiStateLine { ts: now_unix(), kind: GuiStateKind::GuiState, recording, url: url.to_string(), job_id: job_id.to_string(), ok, session_id: None };
		if let Err(e) = self.gui_bridge.append(&line) {
			warn!(target = "tc.recorder", error = %e, "failed to append gui bridge line");
		}
	}

	/// Dispatches one recording attempt. Acquires the three gates in order,
	/// runs the login/cookie preflight, races the download subprocess against
	/// the phase-aware deadlock supervisor, and retries exactly once through
	/// a forced re-login on the JIT-eligible early-fail reasons (spec
	/// §4.3.1-§4.3.5).
	pub async fn start_record(&self, target: &Target, scheduler_id: &str, duration_secs: Option<u64>, job_id: Option<String>, force_login_check: bool, cancel: watch::Receiver<bool>) -> RecordResult {
		let url = target.canonical_url.clone();
		let job_id = job_id.unwrap_or_else(new_job_id);

		let url_guard = match self.per_url_locks.try_acquire(&url) {
			Ok(g) => g,
			Err(GateError::UrlAlreadyRecording) => return RecordResult::failed(job_id, url, Reason::UrlAlreadyRecording, 0),
			Err(_) => unreachable!("try_acquire only returns UrlAlreadyRecording"),
		};

		self.log_event(Event::CapacityWait { url: url.clone() });
		let active_jobs = &self.active_jobs;
		let process_permit = match self.process_gate.acquire(|| active_jobs.is_empty()).await {
			Ok(p) => p,
			Err(_) => return RecordResult::failed(job_id, url, Reason::GlobalConcurrencyTimeout, 0),
		};
		let scheduler_permit = match self.scheduler_gates.acquire(scheduler_id).await {
			Ok(p) => p,
			Err(_) => return RecordResult::failed(job_id, url, Reason::MaxConcurrentTimeout, 0),
		};
		let mut gates = GateSet::new(url_guard, process_permit, scheduler_permit);

		self.set_state_internal(&url, RecordingState::Starting, RecordingState::Starting);
		let mut job = RecordingJob::new(job_id.clone(), target.raw.clone(), url.clone(), now_unix());
		job.requested_duration_secs = duration_secs;
		self.jobs.insert(job_id.clone(), job);
		self.set_job_phase(&job_id, JobPhase::LoginCheck);

		if let Err(reason) = self.run_login_preflight(force_login_check).await {
			self.set_state_internal(&url, RecordingState::Error, RecordingState::Error);
			self.finish_job(&job_id, JobPhase::Error, Vec::new(), Some(reason.clone()), 0);
			gates.release();
			return RecordResult::failed(job_id, url, reason, 0);
		}
		self.set_job_phase(&job_id, JobPhase::Preparing);

		self.log_event(Event::RecordingStart { url: url.clone(), job_id: job_id.clone() });
		self.log_gui_state(&url, &job_id, true, None);
		self.active_jobs.insert(job_id.clone(), std::time::Instant::now());

		// `state` stays `Starting` here — the subprocess hasn't proven it has
		// an HLS playlist yet. `run_once` flips it to `Recording` itself, once
		// the same `mark_hls_captured` signal that drives the deadlock
		// supervisor's phase is observed (spec §4.3.2's state diagram), and
		// mirrors the same transition into this job's `JobPhase`.

		let result = self.run_with_retry(&url, &job_id, duration_secs, cancel).await;
		self.active_jobs.remove(&job_id);

		let final_state = if result.ok { RecordingState::Idle } else { RecordingState::Error };
		self.set_state_internal(&url, final_state, final_state);
		let terminal_phase = terminal_job_phase(&result);
		self.finish_job(&job_id, terminal_phase, result.output_files.clone(), result.reason.clone(), result.retry_count);
		if result.reason == Some(Reason::Cancelled) {
			self.log_event(Event::RecordingCancelled { url: url.clone(), job_id: job_id.clone() });
		} else {
			self.log_event(Event::RecordingResult { url: url.clone(), job_id: job_id.clone(), ok: result.ok, reason: result.reason.clone() });
		}
		self.log_gui_state(&url, &job_id, false, Some(result.ok));

		gates.release();
		result
	}

	/// The record-dispatch preflight (spec §4.3.4 steps 4-5): force a
	/// re-login when asked, re-export cookies, then verify the headless
	/// browser context is actually alive before handing off to the download
	/// subprocess. The first two map to `login_failed`; the browser check
	/// maps to `chrome_error` so the two failure shapes stay distinguishable
	/// in `RecordResult::reason`.
	async fn run_login_preflight(&self, force: bool) -> std::result::Result<(), Reason> {
		let strength = self.ensure_login(force).await.map_err(|_| Reason::LoginFailed)?;
		if strength == LoginStrength::None {
			return Err(Reason::LoginFailed);
		}
		self.ensure_complete_cookies(false).await.map_err(|_| Reason::LoginFailed)?;
		self.browser.ensure_headless().await.map_err(|e| Reason::ChromeError(e.to_string()))?;
		Ok(())
	}

	/// Runs the subprocess once; on a JIT-eligible early failure, forces a
	/// re-login, re-exports cookies (waiting up to 5s for the new snapshot),
	/// switches to `best` on a bad-format failure, and retries exactly once
	/// (spec §4.3.5).
	async fn run_with_retry(&self, url: &str, job_id: &str, duration_secs: Option<u64>, cancel: watch::Receiver<bool>) -> RecordResult {
		let mut retry_count = 0;
		let mut quality_override: Option<String> = None;

		loop {
			match self.run_once(url, job_id, duration_secs, quality_override.as_deref(), cancel.clone()).await {
				Ok(output_files) => return RecordResult::ok(job_id, url, output_files, retry_count),
				Err(reason) => {
					if reason == Reason::Cancelled || retry_count > 0 || !reason.triggers_jit_retry() {
						return RecordResult::failed(job_id, url, reason, retry_count);
					}

					warn!(target = "tc.recorder", url, %reason, "jit retry triggered");
					self.log_event(Event::JitRetryStart { url: url.to_string(), job_id: job_id.to_string(), reason: reason.clone() });
					retry_count += 1;

					if self.ensure_login(true).await.is_err() {
						return RecordResult::failed(job_id, url, reason, retry_count);
					}
					let _ = self.wait_for_fresh_cookies().await;
					if reason == Reason::BadFormat {
						quality_override = Some("best".to_string());
					}
				}
			}
		}
	}

	async fn wait_for_fresh_cookies(&self) -> Result<PathBuf> {
		let cookie_dir = self.config.read().cookie_dir.clone();
		let _ = self.browser.export_cookies(None).await?;
		let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
		loop {
			if let Some((path, strength, _)) = tc_browser::cookie::read_latest_snapshot(&cookie_dir) {
				if strength == LoginStrength::Strong {
					return Ok(path);
				}
			}
			if tokio::time::Instant::now() >= deadline {
				return Err(Error::Browser(tc_browser::Error::Unavailable("login required".to_string())));
			}
			tokio::time::sleep(Duration::from_millis(200)).await;
		}
	}

	/// Runs the download subprocess once, racing it against the deadlock
	/// supervisor, and returns the normalized outcome.
	async fn run_once(&self, url: &str, job_id: &str, duration_secs: Option<u64>, quality_override: Option<&str>, cancel: watch::Receiver<bool>) -> std::result::Result<Vec<String>, Reason> {
		let config = self.config.read().clone();
		let cookie_dir = config.cookie_dir.clone();
		let cookie_jar = tc_browser::cookie::read_latest_snapshot(&cookie_dir).map(|(p, _, _)| p).unwrap_or_else(|| cookie_dir.join("latest_cookie_path.txt"));
		let output_template = config.recordings_dir.join(format!("{job_id}.%(ext)s"));
		let user_agent = self.browser.user_agent().to_string();

		let mut effective_config = config.clone();
		if let Some(q) = quality_override {
			effective_config.quality_selector = q.to_string();
		}

		let (progress, phase_rx) = JobProgress::new();
		let mut state_phase_rx = progress.phase.subscribe();
		let (done_tx, done_rx) = watch::channel(false);
		let timeouts = Timeouts::from_config(&config);

		let supervisor_handle = tokio::spawn(supervisor::watch_for_deadlock_with_timeouts(progress.clone(), phase_rx, done_rx, timeouts));

		// Phase starts `AcquiringHls` and only flips to `Recording` once the
		// subprocess's own stdout reports the HLS playlist being fetched
		// (`progress.mark_hls_captured`, driven by `run_download`'s line
		// parsing) — the HLS-acquisition watchdog would otherwise never have
		// anything to watch for. The same signal is mirrored back into
		// `self.states` here (via `state_phase_rx`, a second subscriber of the
		// same watch channel) so the externally-visible `TargetState` only
		// reaches `Recording` once a playlist has actually been observed,
		// matching spec §4.3.2's `STARTING ──HLS captured──▶ RECORDING`.
		let download_fut = self.runner.run(&effective_config, url, url, &user_agent, &cookie_jar, &output_template, duration_secs, progress, cancel);
		tokio::pin!(download_fut);
		let mut watching_phase = true;
		let download = loop {
			tokio::select! {
				result = &mut download_fut => break result,
				changed = state_phase_rx.changed(), if watching_phase => {
					match changed {
						Ok(()) => {
							if *state_phase_rx.borrow() == DeadlockPhase::Recording {
								self.set_state_internal(url, RecordingState::Recording, RecordingState::Recording);
								self.set_job_phase(job_id, JobPhase::Recording);
							}
						}
						Err(_) => watching_phase = false,
					}
				}
			}
		};
		let _ = done_tx.send(true);

		let deadlock_reason = supervisor_handle.await.unwrap_or(None);
		if let Some(reason) = deadlock_reason {
			warn!(target = "tc.recorder", url, job_id, %reason, "supervisor fired before subprocess completed");
			return Err(reason);
		}

		let outcome = download.map_err(|_| Reason::NetworkOrHttp)?;
		if let Err(reason) = subprocess::normalize(&outcome) {
			if reason != Reason::Cancelled {
				subprocess::log_subprocess_failure(&reason, &outcome.tail);
			}
			return Err(reason);
		}
		Ok(outcome.output_files.iter().map(|p| p.display().to_string()).collect())
	}

	/// Rebuilds every piece of shared state a wedged recorder could have left
	/// dirty: fresh process/scheduler gates, every per-URL lock released,
	/// every target's recording state cleared, plus a browser-level recovery
	/// on top (spec §4.3.6). Refuses with an event when jobs are still in
	/// flight, since none of this is safe to do out from under a live job.
	pub async fn emergency_reset(&self) -> Result<()> {
		if !self.active_jobs.is_empty() {
			self.log_event(Event::EmergencyResetRefused { active_jobs: self.active_jobs.len() });
			return Ok(());
		}
		self.recovery_count.fetch_add(1, Ordering::SeqCst);

		let max_concurrent = self.config.read().max_concurrent;
		self.process_gate.configure(max_concurrent);
		self.scheduler_gates.configure(max_concurrent);
		self.per_url_locks.clear();
		self.states.clear();
		self.jobs.clear();

		if let Err(e) = self.browser.recover().await {
			warn!(target = "tc.recorder", error = %e, "browser recovery failed during emergency reset; gates and state were still rebuilt");
		}

		self.log_event(Event::EmergencyReset);
		Ok(())
	}

	/// Waits up to 10s for in-flight `start_record` calls to drain. Actual
	/// cancellation is the caller's responsibility: whoever spawned
	/// `start_record` holds the [`crate::active_job::ActiveJob`] and cancels it.
	pub async fn shutdown(&self) {
		let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
		while !self.active_jobs.is_empty() && tokio::time::Instant::now() < deadline {
			tokio::time::sleep(Duration::from_millis(100)).await;
		}
	}
}

impl StateProvider for RecorderWrapper {
	fn recording_states(&self) -> HashMap<String, RecordingState> {
		self.get_recording_states()
	}

	fn system_health(&self) -> SystemHealth {
		let mut state_counts = HashMap::new();
		for entry in self.states.iter() {
			*state_counts.entry(entry.value().state).or_insert(0usize) += 1;
		}
		SystemHealth {
			state_counts,
			max_concurrent: self.config.read().max_concurrent,
			active_jobs: self.active_jobs.len(),
			semaphore_available: self.process_gate.available_permits(),
			stale_gate_count: 0,
		}
	}

	fn active_jobs(&self) -> Vec<RecordingJob> {
		self.get_active_jobs()
	}
}

fn wire_strength(strength: LoginStrength) -> tc_protocol::CookieStrength {
	match strength {
		LoginStrength::Strong => tc_protocol::CookieStrength::Strong,
		LoginStrength::Weak => tc_protocol::CookieStrength::Weak,
		LoginStrength::None => tc_protocol::CookieStrength::None,
	}
}

/// Maps a finished `RecordResult` onto the terminal `JobPhase` it represents.
fn terminal_job_phase(result: &RecordResult) -> JobPhase {
	if result.ok {
		return JobPhase::Completed;
	}
	match result.reason {
		Some(Reason::Cancelled) => JobPhase::Cancelled,
		Some(Reason::HlsTimeout) | Some(Reason::AbsoluteTimeout) | Some(Reason::RecorderAbsoluteTimeout) => JobPhase::Timeout,
		_ => JobPhase::Error,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wire_strength_maps_every_variant() {
		assert_eq!(wire_strength(LoginStrength::Strong), tc_protocol::CookieStrength::Strong);
		assert_eq!(wire_strength(LoginStrength::Weak), tc_protocol::CookieStrength::Weak);
		assert_eq!(wire_strength(LoginStrength::None), tc_protocol::CookieStrength::None);
	}
}
