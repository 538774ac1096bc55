//! Stage 3: the external streaming-probe tool, invoked only when the
//! browser stage confirms a movie id but still reports not-live (spec §4.2
//! step 3, §6.5).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tc_browser::cookie::build_cookie_header;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::result::{DetectMethod, DetectReason, DetectResult};

pub async fn run(tool_path: &Path, url: &str, user_agent: &str, cookies: &[tc_browser::Cookie], timeout: Duration) -> Result<DetectResult> {
	let cookie_header = build_cookie_header(cookies);

	let mut cmd = Command::new(tool_path);
	cmd.arg(url)
		.arg("best")
		.arg("--json")
		.arg("--http-header")
		.arg(format!("Cookie={cookie_header}"))
		.arg("--http-header")
		.arg(format!("User-Agent={user_agent}"))
		.arg("--http-header")
		.arg(format!("Referer={url}"))
		.arg("--http-timeout")
		.arg(timeout.as_secs().to_string())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped());

	let output = tokio::time::timeout(timeout + Duration::from_secs(5), cmd.output())
		.await
		.map_err(|_| Error::Timeout(timeout))?
		.map_err(|e| Error::StreamingProbe(e.to_string()))?;

	let stderr = String::from_utf8_lossy(&output.stderr);

	if !output.status.success() {
		if stderr.contains("403") {
			return Ok(DetectResult::auth_required(DetectMethod::Streamlink, false));
		}
		if stderr.contains("404") {
			let mut result = DetectResult::not_live(DetectMethod::Streamlink);
			result.reason = DetectReason::NotFound;
			result.detail = Some(stderr.lines().last().unwrap_or_default().to_string());
			return Ok(result);
		}
		let mut result = DetectResult::not_live(DetectMethod::Streamlink);
		result.detail = Some(stderr.lines().rev().take(5).collect::<Vec<_>>().join("\n"));
		return Ok(result);
	}

	let stdout = String::from_utf8_lossy(&output.stdout);
	let parsed: Option<Value> = serde_json::from_str(&stdout).ok();
	let has_streams = parsed
		.as_ref()
		.and_then(|v| v.get("streams"))
		.and_then(Value::as_object)
		.map(|m| !m.is_empty())
		.unwrap_or(false);

	if has_streams {
		Ok(DetectResult::live(None, DetectMethod::Streamlink))
	} else {
		Ok(DetectResult::not_live(DetectMethod::Streamlink))
	}
}
