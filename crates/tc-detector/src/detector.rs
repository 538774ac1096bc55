//! The three-stage liveness detector orchestrator (spec §4.2).
//!
//! Stages fall through; none of them call each other recursively and each
//! produces a single deterministic outcome (spec §9). `LIVE` or
//! `AUTH_REQUIRED` at any stage is final; a `movie_id` found earlier is
//! preserved into later stages.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tc_browser::singleton::BrowserSingleton;
use tracing::debug;

use crate::error::Result;
use crate::result::{DetectReason, DetectResult};
use crate::{browser_stage, http_stage, streamlink_stage};

pub struct DetectorConfig {
	pub cookie_dir: PathBuf,
	pub streaming_probe_tool_path: PathBuf,
	pub streaming_probe_timeout: Duration,
	pub http_timeout: Duration,
}

pub struct LivenessDetector {
	client: reqwest::Client,
	browser: Arc<BrowserSingleton>,
	config: DetectorConfig,
}

impl LivenessDetector {
	pub fn new(browser: Arc<BrowserSingleton>, config: DetectorConfig) -> Self {
		let client = reqwest::Client::builder().timeout(config.http_timeout).build().expect("reqwest client builds with a timeout");
		Self { client, browser, config }
	}

	pub async fn check(&self, url: &str) -> Result<DetectResult> {
		let http_outcome = http_stage::run(&self.client, url, &self.config.cookie_dir).await?;
		if matches!(http_outcome.result.reason, DetectReason::Live | DetectReason::AuthRequired) {
			return Ok(http_outcome.result);
		}

		let preserved_movie_id = http_outcome.result.movie_id.clone();
		if !http_outcome.needs_browser_check && preserved_movie_id.is_none() {
			return Ok(http_outcome.result);
		}

		debug!(target = "tc.detector", url, "falling through to browser stage");
		let ctx = self.browser.ensure_headless().await?;
		let mut browser_result = browser_stage::run(ctx, url).await?;
		if browser_result.movie_id.is_none() {
			browser_result.movie_id = preserved_movie_id;
		}
		if matches!(browser_result.reason, DetectReason::Live | DetectReason::AuthRequired) {
			return Ok(browser_result);
		}

		let Some(movie_id) = browser_result.movie_id.clone() else {
			return Ok(browser_result);
		};

		debug!(target = "tc.detector", url, movie_id, "falling through to streaming-probe stage");
		let cookies = self.browser.cookies_for_external_use().await.unwrap_or_default();
		let mut probe_result = streamlink_stage::run(
			&self.config.streaming_probe_tool_path,
			url,
			self.browser.user_agent(),
			&cookies,
			self.config.streaming_probe_timeout,
		)
		.await?;
		if probe_result.movie_id.is_none() {
			probe_result.movie_id = Some(movie_id);
		}
		Ok(probe_result)
	}
}
