//! Append-only newline-delimited JSON event logs, rotated at a size cap or a
//! day boundary (spec §4.5): `wrapper_YYYYMMDD_NNN.jsonl` for the recorder,
//! `monitor_YYYYMMDD_NNN.jsonl` for the monitor, `monitor_gui_bridge.jsonl`
//! for the UI bridge.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use tc_protocol::{EventLine, GuiStateLine};

/// One rotating log channel, e.g. the recorder's `wrapper_*` files.
pub struct EventLog {
	dir: PathBuf,
	prefix: String,
	rotate_bytes: u64,
	inner: Mutex<Inner>,
}

struct Inner {
	file: Option<File>,
	path: PathBuf,
	day: u32,
	seq: u32,
	written_bytes: u64,
}

impl EventLog {
	pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, rotate_bytes: u64) -> std::io::Result<Self> {
		let dir = dir.into();
		std::fs::create_dir_all(&dir)?;
		let log = Self {
			dir,
			prefix: prefix.into(),
			rotate_bytes,
			inner: Mutex::new(Inner { file: None, path: PathBuf::new(), day: 0, seq: 0, written_bytes: 0 }),
		};
		Ok(log)
	}

	/// Appends one line. Rotates to a new file first if the current file
	/// would exceed `rotate_bytes` or the day has changed.
	pub fn append(&self, ts_unix_secs: i64, line: &EventLine) -> std::io::Result<()> {
		let mut json = serde_json::to_vec(line).expect("EventLine always serializes");
		json.push(b'\n');

		let day = (ts_unix_secs / 86400) as u32;
		let mut inner = self.inner.lock();
		if inner.file.is_none() || inner.day != day || inner.written_bytes + json.len() as u64 > self.rotate_bytes {
			self.rotate(&mut inner, day)?;
		}
		let file = inner.file.as_mut().expect("rotate always opens a file");
		file.write_all(&json)?;
		file.flush()?;
		inner.written_bytes += json.len() as u64;
		Ok(())
	}

	fn rotate(&self, inner: &mut Inner, day: u32) -> std::io::Result<()> {
		let seq = if inner.day == day { inner.seq + 1 } else { 0 };
		let path = self.dir.join(format!("{}_{}_{:03}.jsonl", self.prefix, day, seq));
		let file = OpenOptions::new().create(true).append(true).open(&path)?;
		let written_bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
		*inner = Inner { file: Some(file), path, day, seq, written_bytes };
		Ok(())
	}

	pub fn current_path(&self) -> PathBuf {
		self.inner.lock().path.clone()
	}
}

/// The two-line-per-recording UI bridge log: not rotated, appended forever
/// (a day's worth of bridge lines is small relative to the event logs).
pub struct GuiBridgeLog {
	path: PathBuf,
	file: Mutex<File>,
}

impl GuiBridgeLog {
	pub fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
		let path = path.into();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let file = OpenOptions::new().create(true).append(true).open(&path)?;
		Ok(Self { path, file: Mutex::new(file) })
	}

	pub fn append(&self, line: &GuiStateLine) -> std::io::Result<()> {
		let mut json = serde_json::to_vec(line).expect("GuiStateLine always serializes");
		json.push(b'\n');
		self.file.lock().write_all(&json)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

/// Generic line writer used where the caller just wants "append this value
/// as one JSON line" without the full rotation contract (used by tests and
/// by ad-hoc diagnostic channels).
pub fn append_line<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let mut file = OpenOptions::new().create(true).append(true).open(path)?;
	let mut json = serde_json::to_vec(value).expect("value always serializes");
	json.push(b'\n');
	file.write_all(&json)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tc_protocol::{Event, GuiStateKind};

	#[test]
	fn appends_and_rotates_on_size_cap() {
		let dir = tempfile::tempdir().unwrap();
		let log = EventLog::new(dir.path(), "wrapper", 200).unwrap();
		for i in 0..20 {
			log.append(1_700_000_000, &EventLine { ts: 1_700_000_000, event: Event::CapacityWait { url: format!("u{i}") } }).unwrap();
		}
		let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
		assert!(files.len() > 1, "expected rotation to produce more than one file");
	}

	#[test]
	fn gui_bridge_log_appends_two_lines() {
		let dir = tempfile::tempdir().unwrap();
		let log = GuiBridgeLog::new(dir.path().join("monitor_gui_bridge.jsonl")).unwrap();
		log.append(&GuiStateLine {
			ts: 1,
			kind: GuiStateKind::GuiState,
			recording: true,
			url: "u".into(),
			job_id: "j".into(),
			ok: None,
			session_id: None,
		})
		.unwrap();
		log.append(&GuiStateLine {
			ts: 2,
			kind: GuiStateKind::GuiState,
			recording: false,
			url: "u".into(),
			job_id: "j".into(),
			ok: Some(true),
			session_id: None,
		})
		.unwrap();
		let contents = std::fs::read_to_string(log.path()).unwrap();
		assert_eq!(contents.lines().count(), 2);
	}
}
