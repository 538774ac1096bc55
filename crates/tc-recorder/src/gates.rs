//! The three concurrency gates applied, in order, at the start of every
//! record request (spec §4.3.1).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::warn;

const MAX_STALE_REBUILDS: u32 = 3;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
	#[error("url_already_recording")]
	UrlAlreadyRecording,
	#[error("global_concurrency_timeout")]
	GlobalConcurrencyTimeout,
	#[error("max_concurrent_timeout")]
	SchedulerConcurrencyTimeout,
}

/// Per-URL mutual exclusion via a non-blocking `try_lock` over a set of
/// currently-held URLs (spec §4.3.1 gate 1).
pub struct PerUrlLocks {
	held: DashMap<String, ()>,
}

impl PerUrlLocks {
	pub fn new() -> Self {
		Self { held: DashMap::new() }
	}

	pub fn try_acquire(&self, url: &str) -> Result<PerUrlGuard<'_>, GateError> {
		if self.held.insert(url.to_string(), ()).is_some() {
			return Err(GateError::UrlAlreadyRecording);
		}
		Ok(PerUrlGuard { locks: self, url: url.to_string() })
	}

	pub fn is_held(&self, url: &str) -> bool {
		self.held.contains_key(url)
	}

	/// Drops every held lock unconditionally. Only safe to call once the
	/// active-jobs map is empty (the emergency reset path checks this first).
	pub fn clear(&self) {
		self.held.clear();
	}

	fn release(&self, url: &str) {
		self.held.remove(url);
	}
}

pub struct PerUrlGuard<'a> {
	locks: &'a PerUrlLocks,
	url: String,
}

impl Drop for PerUrlGuard<'_> {
	fn drop(&mut self) {
		self.locks.release(&self.url);
	}
}

/// The process-wide capacity semaphore, rebuildable when a timeout coincides
/// with an empty active-jobs map (spec §4.3.1 gate 2).
pub struct ProcessGate {
	inner: Mutex<Arc<Semaphore>>,
	max_concurrent: Mutex<usize>,
	stale_rebuilds: AtomicU32,
	acquire_timeout: Duration,
}

impl ProcessGate {
	pub fn new(max_concurrent: usize, acquire_timeout: Duration) -> Self {
		Self {
			inner: Mutex::new(Arc::new(Semaphore::new(max_concurrent))),
			max_concurrent: Mutex::new(max_concurrent),
			stale_rebuilds: AtomicU32::new(0),
			acquire_timeout,
		}
	}

	pub fn configure(&self, max_concurrent: usize) {
		*self.max_concurrent.lock() = max_concurrent;
		*self.inner.lock() = Arc::new(Semaphore::new(max_concurrent));
	}

	pub fn available_permits(&self) -> usize {
		self.inner.lock().available_permits()
	}

	/// Acquires one permit, with the stale-gate rebuild-and-retry behavior:
	/// on a 30s timeout, if `active_jobs_empty` is true, the stale counter is
	/// incremented (capped at 3), the semaphore is rebuilt, and acquisition
	/// is retried exactly once.
	pub async fn acquire(&self, active_jobs_empty: impl Fn() -> bool) -> Result<OwnedGate, GateError> {
		let sem = self.inner.lock().clone();
		match tokio::time::timeout(self.acquire_timeout, sem.acquire_owned()).await {
			Ok(Ok(permit)) => {
				self.stale_rebuilds.store(0, Ordering::SeqCst);
				return Ok(OwnedGate::Process(permit));
			}
			Ok(Err(_)) | Err(_) => {}
		}

		if !active_jobs_empty() || self.stale_rebuilds.load(Ordering::SeqCst) >= MAX_STALE_REBUILDS {
			return Err(GateError::GlobalConcurrencyTimeout);
		}

		warn!(target = "tc.recorder", "process gate timed out with no active jobs; rebuilding");
		self.stale_rebuilds.fetch_add(1, Ordering::SeqCst);
		let max_concurrent = *self.max_concurrent.lock();
		let fresh = Arc::new(Semaphore::new(max_concurrent));
		*self.inner.lock() = fresh.clone();

		match tokio::time::timeout(self.acquire_timeout, fresh.acquire_owned()).await {
			Ok(Ok(permit)) => {
				self.stale_rebuilds.store(0, Ordering::SeqCst);
				Ok(OwnedGate::Process(permit))
			}
			_ => Err(GateError::GlobalConcurrencyTimeout),
		}
	}
}

/// Per-scheduler capacity gates: one semaphore per scheduling domain, so
/// multiple independent schedulers share the process gate but not each
/// other's scheduler-local gate (spec §4.3.1 gate 3).
pub struct SchedulerGates {
	by_scheduler: DashMap<String, Arc<Semaphore>>,
	max_concurrent: Mutex<usize>,
	acquire_timeout: Duration,
}

impl SchedulerGates {
	pub fn new(max_concurrent: usize, acquire_timeout: Duration) -> Self {
		Self { by_scheduler: DashMap::new(), max_concurrent: Mutex::new(max_concurrent), acquire_timeout }
	}

	pub fn configure(&self, max_concurrent: usize) {
		*self.max_concurrent.lock() = max_concurrent;
		self.by_scheduler.clear();
	}

	pub async fn acquire(&self, scheduler_id: &str) -> Result<OwnedGate, GateError> {
		let max_concurrent = *self.max_concurrent.lock();
		let sem = self.by_scheduler.entry(scheduler_id.to_string()).or_insert_with(|| Arc::new(Semaphore::new(max_concurrent))).clone();
		match tokio::time::timeout(self.acquire_timeout, sem.acquire_owned()).await {
			Ok(Ok(permit)) => Ok(OwnedGate::Scheduler(permit)),
			_ => Err(GateError::SchedulerConcurrencyTimeout),
		}
	}
}

/// An owned permit from either capacity gate (the two are interchangeable
/// once acquired; this just distinguishes them for logging).
pub enum OwnedGate {
	Process(tokio::sync::OwnedSemaphorePermit),
	Scheduler(tokio::sync::OwnedSemaphorePermit),
}

/// All gates acquired for one `start_record` call, released in the
/// documented order (per-scheduler → process → per-URL) with double-release
/// guarded and logged (spec §4.3.1).
pub struct GateSet<'a> {
	pub url_guard: Option<PerUrlGuard<'a>>,
	pub process_permit: Option<tokio::sync::OwnedSemaphorePermit>,
	pub scheduler_permit: Option<tokio::sync::OwnedSemaphorePermit>,
	released: bool,
}

impl<'a> GateSet<'a> {
	pub fn new(url_guard: PerUrlGuard<'a>, process: OwnedGate, scheduler: OwnedGate) -> Self {
		let process_permit = match process {
			OwnedGate::Process(p) => p,
			OwnedGate::Scheduler(p) => p,
		};
		let scheduler_permit = match scheduler {
			OwnedGate::Process(p) => p,
			OwnedGate::Scheduler(p) => p,
		};
		Self { url_guard: Some(url_guard), process_permit: Some(process_permit), scheduler_permit: Some(scheduler_permit), released: false }
	}

	/// Releases scheduler gate, then process gate, then the per-URL lock.
	/// A second call is a no-op that logs a warning.
	pub fn release(&mut self) {
		if self.released {
			warn!(target = "tc.recorder", "gate set released twice; ignoring");
			return;
		}
		self.released = true;
		self.scheduler_permit.take();
		self.process_permit.take();
		self.url_guard.take();
	}
}

impl Drop for GateSet<'_> {
	fn drop(&mut self) {
		self.release();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn per_url_lock_rejects_second_holder() {
		let locks = PerUrlLocks::new();
		let _guard = locks.try_acquire("u1").unwrap();
		assert_eq!(locks.try_acquire("u1").unwrap_err(), GateError::UrlAlreadyRecording);
	}

	#[test]
	fn per_url_lock_clear_releases_everything() {
		let locks = PerUrlLocks::new();
		let _a = locks.try_acquire("u1").unwrap();
		let _b = locks.try_acquire("u2").unwrap();
		locks.clear();
		assert!(!locks.is_held("u1"));
		assert!(!locks.is_held("u2"));
	}

	#[test]
	fn per_url_lock_releases_on_drop() {
		let locks = PerUrlLocks::new();
		{
			let _guard = locks.try_acquire("u1").unwrap();
			assert!(locks.is_held("u1"));
		}
		assert!(!locks.is_held("u1"));
	}

	#[tokio::test]
	async fn process_gate_acquires_up_to_max_concurrent() {
		let gate = ProcessGate::new(2, Duration::from_secs(30));
		let a = gate.acquire(|| false).await.unwrap();
		let b = gate.acquire(|| false).await.unwrap();
		assert_eq!(gate.available_permits(), 0);
		drop(a);
		drop(b);
	}

	#[tokio::test]
	async fn scheduler_gates_are_independent_per_scheduler() {
		let gates = SchedulerGates::new(1, Duration::from_secs(30));
		let _a = gates.acquire("scheduler-a").await.unwrap();
		let _b = gates.acquire("scheduler-b").await.unwrap();
	}
}
