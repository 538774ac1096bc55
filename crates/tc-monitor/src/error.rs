use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("targets file io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("targets file parse error: {0}")]
	Parse(#[from] serde_json::Error),
	#[error("invalid target: {0}")]
	InvalidTarget(#[from] tc_protocol::InvalidUrl),
	#[error("recorder error: {0}")]
	Recorder(#[from] tc_recorder::Error),
	#[error("heartbeat write failed: {0}")]
	Heartbeat(#[from] tc_state::AtomicWriteError),
}
