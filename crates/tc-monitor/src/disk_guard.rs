//! The disk guard (supplemented from `original_source/auto/monitor_engine.py`,
//! which refuses to dispatch a new recording below a configured free-space
//! floor). Not named in the distilled spec's timeout table, but the poll
//! cycle (§4.4.1) dispatches "while capacity allows" and a full disk is as
//! real a capacity limit as the semaphore.

use std::path::Path;

/// Free space on the filesystem containing `path`, in gibibytes. `0.0` on
/// any error so a broken `statvfs` fails closed (skips dispatch) rather than
/// silently bypassing the guard.
pub fn free_space_gb(path: &Path) -> f64 {
	fs4::available_space(path).map(|bytes| bytes as f64 / (1024.0 * 1024.0 * 1024.0)).unwrap_or(0.0)
}
