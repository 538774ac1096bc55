//! A uniform handle for every in-flight job (spec §9): the legacy source
//! stored mixed timestamps and task handles in the active-jobs map, which
//! made some entries impossible to cancel. Every entry here carries both a
//! cancel signal the task observes cooperatively and an abort handle as a
//! backstop if it doesn't observe it in time.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use tc_protocol::RecordResult;

/// How long `cancel` waits for the task to unwind on its own (draining the
/// subprocess's soft-terminate grace period) before force-aborting it.
const CANCEL_GRACE: Duration = Duration::from_secs(12);

pub struct ActiveJob {
	handle: JoinHandle<RecordResult>,
	abort_handle: AbortHandle,
	cancel_tx: watch::Sender<bool>,
	pub started_at: std::time::Instant,
}

impl ActiveJob {
	pub fn new(handle: JoinHandle<RecordResult>, cancel_tx: watch::Sender<bool>) -> Self {
		let abort_handle = handle.abort_handle();
		Self { handle, abort_handle, cancel_tx, started_at: std::time::Instant::now() }
	}

	/// Requests cancellation cooperatively (the subprocess gets a chance to
	/// soft-terminate and release its gates cleanly) and waits up to
	/// [`CANCEL_GRACE`] for the task to finish; past that it force-aborts as
	/// a backstop so a wedged task can never block shutdown indefinitely
	/// (spec §5 invariant 6: gates release within a bounded window).
	pub async fn cancel(self) {
		let _ = self.cancel_tx.send(true);
		if tokio::time::timeout(CANCEL_GRACE, self.handle).await.is_err() {
			self.abort_handle.abort();
		}
	}
}
