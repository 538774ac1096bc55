//! Download-tool invocation and result normalization (spec §4.3.4, §6.4).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{info, warn};

use tc_protocol::{Config, Reason};

use crate::supervisor::JobProgress;

/// Matches the spec's "last ~120 lines" tail sample (§6.4) rather than a byte
/// count: yt-dlp's progress lines are short and a line cap keeps the tail
/// sample from being dominated by a handful of long ones.
const TAIL_LINES: usize = 120;

pub struct SubprocessOutcome {
	pub exit_ok: bool,
	pub tail: String,
	pub output_files: Vec<PathBuf>,
	/// Set when the run ended because `cancel` fired rather than the process
	/// exiting on its own; `normalize` reports this as `Reason::Cancelled`
	/// before looking at `exit_ok` or `output_files` at all.
	pub cancelled: bool,
}

/// The download tool as a capability, mirroring `tc_browser::capability`'s
/// split between core logic and the external engine: production code runs
/// the real process via [`ProcessRunner`], tests substitute a fake that never
/// shells out.
///
/// `progress` is updated live as the subprocess's own stdout reveals the HLS
/// fetch starting and the real output path, so the phase-aware deadlock
/// supervisor watches something real instead of a guess made at dispatch
/// time (spec §4.3.3). `cancel` is watched for a cooperative stop request;
/// implementations that can't observe cancellation (the test fakes) can
/// ignore it.
#[async_trait::async_trait]
pub trait DownloadRunner: Send + Sync {
	async fn run(
		&self,
		config: &Config,
		hls_url: &str,
		referer: &str,
		user_agent: &str,
		cookie_jar: &Path,
		output_template: &Path,
		duration_secs: Option<u64>,
		progress: Arc<JobProgress>,
		cancel: watch::Receiver<bool>,
	) -> std::io::Result<SubprocessOutcome>;
}

pub struct ProcessRunner;

#[async_trait::async_trait]
impl DownloadRunner for ProcessRunner {
	async fn run(
		&self,
		config: &Config,
		hls_url: &str,
		referer: &str,
		user_agent: &str,
		cookie_jar: &Path,
		output_template: &Path,
		duration_secs: Option<u64>,
		progress: Arc<JobProgress>,
		cancel: watch::Receiver<bool>,
	) -> std::io::Result<SubprocessOutcome> {
		run_download(config, hls_url, referer, user_agent, cookie_jar, output_template, duration_secs, progress, cancel).await
	}
}

/// Builds and runs the download tool against `hls_url`, writing into
/// `output_template` (a path with a yt-dlp-style `%(ext)s` placeholder).
/// `duration_secs`, when set, is passed as a `--download-sections` window
/// starting from `0`. Streams stdout/stderr line-by-line: a line mentioning
/// `.m3u8` marks the HLS playlist as captured, and a `Destination:` line
/// hands the supervisor the real resolved output path, replacing the
/// `%(ext)s` template the file-stall watchdog could never find on disk.
/// Races the child's exit against `cancel`; on cancellation, soft-terminates
/// the process via [`stop_gracefully`] instead of leaving it to `kill_on_drop`.
#[allow(clippy::too_many_arguments)]
pub async fn run_download(
	config: &Config,
	hls_url: &str,
	referer: &str,
	user_agent: &str,
	cookie_jar: &Path,
	output_template: &Path,
	duration_secs: Option<u64>,
	progress: Arc<JobProgress>,
	mut cancel: watch::Receiver<bool>,
) -> std::io::Result<SubprocessOutcome> {
	let mut cmd = Command::new(&config.download_tool_path);
	cmd.arg(hls_url)
		.arg("--no-part")
		.arg("--concurrent-fragments")
		.arg(config.fragment_concurrency.to_string())
		.arg("--retries")
		.arg(config.retry_count.to_string())
		.arg("--fragment-retries")
		.arg(config.retry_fragment_count.to_string())
		.arg("--retry-sleep")
		.arg(config.retry_sleep_secs.to_string())
		.arg("--add-header")
		.arg(format!("Referer: {referer}"))
		.arg("--add-header")
		.arg(format!("Origin: {}", origin_of(referer)))
		.arg("--cookies")
		.arg(cookie_jar)
		.arg("--user-agent")
		.arg(user_agent)
		.arg("-o")
		.arg(output_template);

	if Config::quality_is_format_expression(&config.quality_selector) {
		cmd.arg("-f").arg(&config.quality_selector);
	} else {
		cmd.arg("-S").arg(&config.quality_selector);
	}

	if let Some(secs) = duration_secs {
		cmd.arg("--download-sections").arg(format!("*0-{secs}"));
	}

	cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

	info!(target = "tc.recorder.subprocess", tool = %config.download_tool_path.display(), "starting download");
	let mut child = cmd.spawn()?;

	let stdout = child.stdout.take().expect("piped stdout");
	let stderr = child.stderr.take().expect("piped stderr");
	let tail: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::with_capacity(TAIL_LINES)));

	let out_task = tokio::spawn(stream_lines(stdout, tail.clone(), progress.clone(), output_template.to_path_buf()));
	let err_task = tokio::spawn(stream_lines(stderr, tail.clone(), progress.clone(), output_template.to_path_buf()));

	let (status, cancelled) = tokio::select! {
		status = child.wait() => (status?, false),
		_ = cancel.wait_for(|c| *c) => {
			let grace = Duration::from_secs(config.subprocess_soft_terminate_secs);
			stop_gracefully(&mut child, grace).await?;
			(child.wait().await?, true)
		}
	};

	let _ = tokio::join!(out_task, err_task);
	let tail_text = tail.lock().iter().cloned().collect::<Vec<_>>().join("\n");

	let output_files = discover_outputs(output_template);
	Ok(SubprocessOutcome { exit_ok: status.success(), tail: tail_text, output_files, cancelled })
}

/// Reads one stream to EOF line-by-line, appending to the shared tail buffer
/// (capped at [`TAIL_LINES`]) and updating `progress` when a line reveals the
/// HLS playlist being fetched or the tool's resolved output path.
async fn stream_lines(reader: impl tokio::io::AsyncRead + Unpin, tail: Arc<Mutex<VecDeque<String>>>, progress: Arc<JobProgress>, output_template: PathBuf) {
	let mut lines = BufReader::new(reader).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) => {
				if line.contains(".m3u8") {
					progress.mark_hls_captured();
				}
				if let Some(path) = destination_from_line(&line, &output_template) {
					progress.set_output_path(path);
				}
				let mut buf = tail.lock();
				if buf.len() == TAIL_LINES {
					buf.pop_front();
				}
				buf.push_back(line);
			}
			Ok(None) => return,
			Err(e) => {
				warn!(target = "tc.recorder.subprocess", error = %e, "error reading subprocess output");
				return;
			}
		}
	}
}

/// Parses a yt-dlp-style `[download] Destination: <path>` or `[Merger]
/// Merging formats into "<path>"` line into the real output path. Falls back
/// to the directory of `output_template` (never the `%(ext)s` literal) when
/// the line format doesn't match what's expected.
fn destination_from_line(line: &str, output_template: &Path) -> Option<PathBuf> {
	let trimmed = line.trim();
	if let Some(rest) = trimmed.strip_prefix("Destination:").or_else(|| trimmed.split_once("Destination:").map(|(_, r)| r)) {
		let candidate = rest.trim();
		if !candidate.is_empty() {
			return Some(resolve_against(output_template, candidate));
		}
	}
	if trimmed.starts_with("Merging formats into") {
		if let (Some(start), Some(end)) = (trimmed.find('"'), trimmed.rfind('"')) {
			if end > start {
				return Some(resolve_against(output_template, &trimmed[start + 1..end]));
			}
		}
	}
	None
}

fn resolve_against(output_template: &Path, candidate: &str) -> PathBuf {
	let candidate_path = Path::new(candidate);
	if candidate_path.is_absolute() {
		candidate_path.to_path_buf()
	} else {
		output_template.parent().map(|dir| dir.join(candidate_path)).unwrap_or_else(|| candidate_path.to_path_buf())
	}
}

/// A run counts as `ok` only if the process exited 0 *and* its tail is free
/// of the early-fail substrings (spec §4.3.4); a zero exit with a truncated
/// stream still needs to be caught this way.
pub fn normalize(outcome: &SubprocessOutcome) -> Result<(), Reason> {
	if outcome.cancelled {
		return Err(Reason::Cancelled);
	}
	if let Some(reason) = Reason::classify_subprocess_tail(&outcome.tail) {
		return Err(reason);
	}
	if !outcome.exit_ok {
		return Err(Reason::NetworkOrHttp);
	}
	if outcome.output_files.is_empty() {
		return Err(Reason::NoBytes);
	}
	Ok(())
}

/// Soft-terminates the process: SIGTERM-equivalent via `start_kill`, waiting
/// up to `grace` before a hard kill. `tokio::process::Child` on non-unix
/// targets only exposes a hard kill; the teacher's stack targets Linux so
/// this just calls `start_kill` and waits.
pub async fn stop_gracefully(child: &mut tokio::process::Child, grace: Duration) -> std::io::Result<()> {
	child.start_kill()?;
	let _ = tokio::time::timeout(grace, child.wait()).await;
	if child.try_wait()?.is_none() {
		child.kill().await?;
	}
	Ok(())
}

fn origin_of(referer: &str) -> String {
	if let Some(idx) = referer.find("://") {
		if let Some(end) = referer[idx + 3..].find('/') {
			return referer[..idx + 3 + end].to_string();
		}
	}
	referer.to_string()
}

/// yt-dlp writes the real extension once it knows the container; this globs
/// the output directory for files matching the template's stem.
fn discover_outputs(output_template: &Path) -> Vec<PathBuf> {
	let Some(dir) = output_template.parent() else { return Vec::new() };
	let Some(stem) = output_template.file_stem().and_then(|s| s.to_str()) else { return Vec::new() };
	let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };

	let mut found = Vec::new();
	for entry in entries.flatten() {
		if let Some(name) = entry.file_name().to_str() {
			if name.starts_with(stem) {
				found.push(entry.path());
			}
		}
	}
	found
}

pub fn log_subprocess_failure(reason: &Reason, tail: &str) {
	warn!(target = "tc.recorder.subprocess", reason = %reason, tail_sample = %tail.chars().take(200).collect::<String>(), "download failed");
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn origin_of_strips_path() {
		assert_eq!(origin_of("https://twitcasting.tv/c:user/"), "https://twitcasting.tv");
		assert_eq!(origin_of("https://twitcasting.tv"), "https://twitcasting.tv");
	}

	#[test]
	fn normalize_ok_requires_nonempty_outputs() {
		let outcome = SubprocessOutcome { exit_ok: true, tail: "done".into(), output_files: vec![], cancelled: false };
		assert_eq!(normalize(&outcome), Err(Reason::NoBytes));
	}

	#[test]
	fn normalize_prefers_tail_classification_over_exit_code() {
		let outcome = SubprocessOutcome { exit_ok: true, tail: "ERROR: 403 Forbidden".into(), output_files: vec![PathBuf::from("a.mp4")], cancelled: false };
		assert_eq!(normalize(&outcome), Err(Reason::Http403));
	}

	#[test]
	fn normalize_ok_when_exit_zero_and_tail_clean() {
		let outcome = SubprocessOutcome { exit_ok: true, tail: "done".into(), output_files: vec![PathBuf::from("a.mp4")], cancelled: false };
		assert!(normalize(&outcome).is_ok());
	}

	#[test]
	fn normalize_reports_cancelled_before_anything_else() {
		let outcome = SubprocessOutcome { exit_ok: false, tail: "ERROR: 403 Forbidden".into(), output_files: vec![], cancelled: true };
		assert_eq!(normalize(&outcome), Err(Reason::Cancelled));
	}

	#[test]
	fn discover_outputs_matches_stem_prefix() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("job123.mp4"), b"data").unwrap();
		std::fs::write(dir.path().join("other.mp4"), b"data").unwrap();
		let found = discover_outputs(&dir.path().join("job123.mp4"));
		assert_eq!(found.len(), 1);
	}

	#[test]
	fn destination_from_line_resolves_relative_to_template_dir() {
		let template = PathBuf::from("/recordings/job123.%(ext)s");
		let path = destination_from_line("[download] Destination: job123.mp4", &template).unwrap();
		assert_eq!(path, PathBuf::from("/recordings/job123.mp4"));
	}

	#[test]
	fn destination_from_line_ignores_unrelated_lines() {
		let template = PathBuf::from("/recordings/job123.%(ext)s");
		assert!(destination_from_line("[download]  12.3% of ~10.00MiB", &template).is_none());
	}

	#[test]
	fn destination_from_line_handles_merger_line() {
		let template = PathBuf::from("/recordings/job123.%(ext)s");
		let path = destination_from_line(r#"[Merger] Merging formats into "/recordings/job123.mp4""#, &template).unwrap();
		assert_eq!(path, PathBuf::from("/recordings/job123.mp4"));
	}
}
