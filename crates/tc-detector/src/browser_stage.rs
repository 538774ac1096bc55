//! Stage 2: a scripted browser probe, used only when the HTTP stage was
//! inconclusive (spec §4.2, step 2).

use std::sync::Arc;
use std::time::Duration;

use tc_browser::{BrowserContext, WaitUntil};
use tracing::debug;

use crate::error::Result;
use crate::markers::has_gate_marker;
use crate::result::{DetectMethod, DetectResult};

/// Inspects global variables, data attributes, inline script JSON, and
/// `<video>.src` to produce a live flag and optional movie id.
const PROBE_SCRIPT: &str = r#"
(() => {
	const body = document.body ? document.body.innerHTML : "";
	const video = document.querySelector("video");
	const liveFlag = window.__INITIAL_STATE__ && (window.__INITIAL_STATE__.is_live || window.__INITIAL_STATE__.isOnlive);
	const dataLive = document.querySelector("[data-is-live='true']") !== null;
	let movieId = null;
	const m = body.match(/"movie_id"\s*:\s*"?(\d+)"?/) || body.match(/data-movie-id="(\d+)"/);
	if (m) movieId = m[1];
	return { isLive: !!(liveFlag || dataLive || (video && video.src)), movieId, body };
})()
"#;

pub async fn run(ctx: Arc<dyn BrowserContext>, url: &str) -> Result<DetectResult> {
	let page = ctx.new_page().await?;
	page.goto(url, WaitUntil::NetworkIdle, Duration::from_secs(30)).await?;
	tokio::time::sleep(Duration::from_secs(2)).await;

	let value = page.evaluate(PROBE_SCRIPT).await?;
	let _ = page.close().await;

	let is_live = value.get("isLive").and_then(serde_json::Value::as_bool).unwrap_or(false);
	let movie_id = value.get("movieId").and_then(serde_json::Value::as_str).map(str::to_string);
	let body = value.get("body").and_then(serde_json::Value::as_str).unwrap_or_default();

	if is_live {
		debug!(target = "tc.detector", url, "browser stage: live");
		return Ok(DetectResult::live(movie_id, DetectMethod::Browser));
	}

	if has_gate_marker(body) {
		return Ok(DetectResult::auth_required(DetectMethod::Browser, false));
	}

	let mut result = DetectResult::not_live(DetectMethod::Browser);
	result.movie_id = movie_id;
	Ok(result)
}
