//! The State Surface (spec §3, §4.5): the heartbeat document, rotated event
//! logs, the GUI bridge log, and the small in-process query API.

pub mod atomic;
pub mod event_log;
pub mod heartbeat;
pub mod query;

pub use atomic::{write_atomic, AtomicWriteError};
pub use event_log::{append_line, EventLog, GuiBridgeLog};
pub use heartbeat::{read_heartbeat, write_heartbeat};
pub use query::{StateProvider, SystemHealth};
