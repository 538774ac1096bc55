use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the browser singleton and its CDP driver.
///
/// Per the capability contract, any operation may fail with
/// [`Error::Unavailable`]; callers (the detector, the recorder wrapper) treat
/// that variant as retryable exactly once.
#[derive(Debug, Error)]
pub enum Error {
	#[error("browser executable not found: {0}")]
	ExecutableNotFound(String),

	#[error("failed to launch browser: {0}")]
	LaunchFailed(String),

	#[error("browser is unavailable: {0}")]
	Unavailable(String),

	#[error("timeout after {0:?} waiting for {1}")]
	Timeout(std::time::Duration, String),

	#[error("cdp transport error: {0}")]
	Transport(String),

	#[error("cdp protocol error (code {code}): {message}")]
	Protocol { code: i64, message: String },

	#[error("cookie export failed: {0}")]
	CookieExport(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Whether the characteristic "send on a closed channel" shape that
	/// triggers an emergency restart of the whole driver process.
	pub fn looks_like_closed_channel(&self) -> bool {
		let msg = self.to_string();
		msg.contains("send on a closed channel") || msg.contains("channel closed") || msg.contains("connection closed")
	}
}
