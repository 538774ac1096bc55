use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("browser unavailable: {0}")]
	Browser(#[from] tc_browser::Error),
	#[error("detector failed: {0}")]
	Detector(#[from] tc_detector::Error),
	#[error("state surface write failed: {0}")]
	State(#[from] tc_state::AtomicWriteError),
	#[error("subprocess io error: {0}")]
	Io(#[from] std::io::Error),
}
