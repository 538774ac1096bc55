//! The recorder wrapper: the three concurrency gates, the per-URL state
//! machine, phase-aware deadlock detection, the download subprocess, and JIT
//! retry (spec §4.3).

pub mod active_job;
pub mod error;
pub mod gates;
pub mod subprocess;
pub mod supervisor;
pub mod wrapper;

pub use active_job::ActiveJob;
pub use error::{Error, Result};
pub use gates::{GateError, GateSet, OwnedGate, PerUrlLocks, ProcessGate, SchedulerGates};
pub use subprocess::{DownloadRunner, ProcessRunner, SubprocessOutcome};
pub use supervisor::{DeadlockPhase, JobProgress, Timeouts};
pub use wrapper::{never_cancelled, RecorderWrapper};
