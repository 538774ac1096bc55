use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

/// Top-level CLI error. Exit codes follow spec §6.3: 0 success, 1 internal
/// error, 2 missing targets file.
#[derive(Debug, Error)]
pub enum CliError {
	#[error("targets file not found; run `tc-recorder add <target>` first")]
	MissingTargetsFile,

	#[error("invalid target: {0}")]
	InvalidTarget(#[from] tc_protocol::InvalidUrl),

	#[error("{0}")]
	Monitor(#[from] tc_monitor::Error),

	#[error("{0}")]
	Detector(#[from] tc_detector::Error),

	#[error("{0}")]
	Io(#[from] std::io::Error),

	#[error("{0}")]
	Config(#[from] tc_protocol::ConfigError),
}

impl CliError {
	pub fn exit_code(&self) -> i32 {
		match self {
			CliError::MissingTargetsFile => 2,
			_ => 1,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_targets_file_exits_2_everything_else_exits_1() {
		assert_eq!(CliError::MissingTargetsFile.exit_code(), 2);
		let invalid = tc_protocol::normalize_url("").unwrap_err();
		assert_eq!(CliError::from(invalid).exit_code(), 1);
	}
}
