use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("http stage failed: {0}")]
	Http(#[from] reqwest::Error),
	#[error("browser stage failed: {0}")]
	Browser(#[from] tc_browser::Error),
	#[error("streaming-probe tool failed: {0}")]
	StreamingProbe(String),
	#[error("detector stage timed out after {0:?}")]
	Timeout(std::time::Duration),
}
