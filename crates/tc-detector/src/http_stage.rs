//! Stage 1: a single HTTP GET with a cookie-aware, desktop-browser-shaped
//! request (spec §4.2, step 1).

use std::path::Path;

use tc_browser::cookie::{self, build_cookie_header, LoginStrength};
use tracing::debug;

use crate::error::Result;
use crate::markers::{extract_movie_id, has_gate_marker, has_live_marker};
use crate::result::{DetectMethod, DetectReason, DetectResult};

const DESKTOP_USER_AGENT: &str =
	"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const MAX_BODY_BYTES: usize = 512 * 1024;

pub struct HttpStageOutcome {
	pub result: DetectResult,
	/// True when the HTTP stage was inconclusive and the browser stage
	/// should run next (spec §4.2, stage 2 gating).
	pub needs_browser_check: bool,
}

pub async fn run(client: &reqwest::Client, url: &str, cookie_dir: &Path) -> Result<HttpStageOutcome> {
	let snapshot = cookie::read_latest_snapshot(cookie_dir);
	let (cookie_header, strength) = match &snapshot {
		Some((_, strength, pairs)) => {
			let cookies: Vec<cookie::Cookie> = pairs
				.iter()
				.map(|(name, value)| cookie::Cookie {
					name: name.clone(),
					value: value.clone(),
					domain: String::new(),
					path: "/".to_string(),
					expires: None,
					http_only: false,
					secure: true,
				})
				.collect();
			(build_cookie_header(&cookies), *strength)
		}
		None => (String::new(), LoginStrength::None),
	};

	let cache_bust = format!("_={}", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis());
	let request_url = if url.contains('?') { format!("{url}&{cache_bust}") } else { format!("{url}?{cache_bust}") };

	let response = client
		.get(&request_url)
		.header("User-Agent", DESKTOP_USER_AGENT)
		.header("Referer", url)
		.header("Cookie", cookie_header)
		.send()
		.await?;

	let status = response.status();
	let cookie_incomplete = strength != LoginStrength::Strong;

	if status.as_u16() == 401 || status.as_u16() == 403 {
		return Ok(HttpStageOutcome {
			result: DetectResult::auth_required(DetectMethod::Http, cookie_incomplete),
			needs_browser_check: false,
		});
	}

	let full_body = response.text().await.unwrap_or_default();
	let body: String = full_body.chars().take(MAX_BODY_BYTES).collect();

	if has_gate_marker(&body) {
		return Ok(HttpStageOutcome {
			result: DetectResult::auth_required(DetectMethod::Http, cookie_incomplete),
			needs_browser_check: false,
		});
	}

	let movie_id = extract_movie_id(&body);

	if has_live_marker(&body) {
		debug!(target = "tc.detector", url, "http stage: live");
		return Ok(HttpStageOutcome { result: DetectResult::live(movie_id, DetectMethod::Http), needs_browser_check: false });
	}

	let needs_browser_check = movie_id.is_some();
	let mut result = DetectResult::not_live(DetectMethod::Http);
	result.movie_id = movie_id;
	if needs_browser_check {
		result.reason = DetectReason::NotLive;
	}
	Ok(HttpStageOutcome { result, needs_browser_check })
}
