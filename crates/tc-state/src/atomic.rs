//! Write-temp-then-rename with bounded retry (spec §9): 5 attempts, 50 ms
//! increments, falling back to a logs-directory copy rather than ever
//! leaving a partial file in place.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum AtomicWriteError {
	#[error("failed to write temp file: {0}")]
	Write(std::io::Error),
	#[error("rename failed after retries and fallback: {0}")]
	RenameExhausted(std::io::Error),
}

/// Writes `contents` to `path` atomically. On repeated rename failure (e.g.
/// a reader holding the destination open on a platform where that blocks
/// rename), falls back to writing a same-named file under `fallback_dir`.
pub fn write_atomic(path: &Path, contents: &[u8], fallback_dir: Option<&Path>) -> Result<(), AtomicWriteError> {
	let mut tmp_name = path.as_os_str().to_os_string();
	tmp_name.push(".tmp");
	let tmp = PathBuf::from(tmp_name);
	std::fs::write(&tmp, contents).map_err(AtomicWriteError::Write)?;

	let mut last_err = None;
	for attempt in 0..5u32 {
		match std::fs::rename(&tmp, path) {
			Ok(()) => return Ok(()),
			Err(e) => {
				last_err = Some(e);
				std::thread::sleep(std::time::Duration::from_millis(50 * (attempt as u64 + 1)));
			}
		}
	}

	if let Some(dir) = fallback_dir {
		if std::fs::create_dir_all(dir).is_ok() {
			if let Some(name) = path.file_name() {
				let fallback_path: PathBuf = dir.join(name);
				if std::fs::write(&fallback_path, contents).is_ok() {
					let _ = std::fs::remove_file(&tmp);
					return Ok(());
				}
			}
		}
	}

	Err(AtomicWriteError::RenameExhausted(last_err.unwrap_or_else(|| std::io::Error::other("rename failed"))))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn writes_then_renames_into_place() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("doc.json");
		write_atomic(&path, b"{\"a\":1}", None).unwrap();
		assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}");
	}

	#[test]
	fn overwrites_existing_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("doc.json");
		write_atomic(&path, b"first", None).unwrap();
		write_atomic(&path, b"second", None).unwrap();
		assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
	}
}
