//! Gate markers, live markers, and movie-id extraction (spec §4.2).

use regex_lite::Regex;
use std::sync::OnceLock;

/// Case-insensitive substrings/class-name fragments that indicate a gated page.
const GATE_MARKERS: [&str; 6] =
	["member-only", "group-only", "follower-only", "login-required", "membersonly", "loginrequired"];

/// CSS class names and other markup fragments that are gate markers by exact
/// spelling rather than case-insensitive substring (the original's
/// `_check_html_sync` tests these verbatim against the raw HTML).
const GATE_MARKERS_CASE_SENSITIVE: [&str; 6] =
	["tw-gate-required", "membership-required", "group-required", "限定配信", "tw-membership-gate", "tw-group-gate"];

pub fn has_gate_marker(body: &str) -> bool {
	let lower = body.to_ascii_lowercase();
	GATE_MARKERS.iter().any(|m| lower.contains(m)) || GATE_MARKERS_CASE_SENSITIVE.iter().any(|m| body.contains(m))
}

/// Markup fragments that are live markers by exact spelling (CSS classes and
/// the `LIVE</span>` badge are never normalized by the page, so matching
/// case-insensitively would false-positive on unrelated "live" prose).
const LIVE_MARKERS_CASE_SENSITIVE: [&str; 3] = ["tw-player-container-live", "LIVE</span>", "js-live-indicator"];

/// Live-state JSON fields and markup fragments that indicate a page is live.
pub fn has_live_marker(body: &str) -> bool {
	truthy_json_field(body, "is_live")
		|| truthy_json_field(body, "isOnlive")
		|| truthy_json_field(body, "onLive")
		|| body.contains("data-is-live=\"true\"")
		|| body.contains("<video")
		|| json_ld_is_live_broadcast(body)
		|| LIVE_MARKERS_CASE_SENSITIVE.iter().any(|m| body.contains(m))
}

fn truthy_json_field(body: &str, field: &str) -> bool {
	for pattern in [format!("\"{field}\":true"), format!("\"{field}\": true"), format!("\"{field}\":1")] {
		if body.contains(&pattern) {
			return true;
		}
	}
	false
}

fn json_ld_is_live_broadcast(body: &str) -> bool {
	body.contains("\"isLiveBroadcast\":true") || body.contains("\"isLiveBroadcast\": true")
}

fn movie_id_regexes() -> &'static [Regex] {
	static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
	CELL.get_or_init(|| {
		vec![
			Regex::new(r#""movie_id"\s*:\s*"?(\d+)"?"#).unwrap(),
			Regex::new(r#"data-movie-id="(\d+)""#).unwrap(),
			Regex::new(r#"/movie/(\d+)"#).unwrap(),
		]
	})
}

/// Extracts a numeric movie id by the first matching regex (spec §4.2).
pub fn extract_movie_id(body: &str) -> Option<String> {
	for re in movie_id_regexes() {
		if let Some(caps) = re.captures(body) {
			if let Some(m) = caps.get(1) {
				return Some(m.as_str().to_string());
			}
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detects_gate_markers_case_insensitively() {
		assert!(has_gate_marker("This stream is MEMBER-ONLY content"));
		assert!(has_gate_marker("class=\"LoginRequired\""));
		assert!(!has_gate_marker("nothing special here"));
	}

	#[test]
	fn detects_live_via_truthy_json_field() {
		assert!(has_live_marker(r#"{"is_live":true}"#));
		assert!(has_live_marker(r#"{"isOnlive": true}"#));
		assert!(!has_live_marker(r#"{"is_live":false}"#));
	}

	#[test]
	fn detects_live_via_video_element() {
		assert!(has_live_marker("<video src=\"x\"></video>"));
	}

	#[test]
	fn detects_live_via_case_sensitive_markup_fragments() {
		assert!(has_live_marker("<div class=\"tw-player-container-live\">"));
		assert!(has_live_marker("<span class=\"badge\">LIVE</span>"));
		assert!(has_live_marker("<i class=\"js-live-indicator\"></i>"));
	}

	#[test]
	fn detects_gate_via_case_sensitive_markup_fragments() {
		assert!(has_gate_marker("<div class=\"tw-gate-required\">"));
		assert!(has_gate_marker("membership-required"));
		assert!(has_gate_marker("group-required"));
		assert!(has_gate_marker("この配信は限定配信です"));
		assert!(has_gate_marker("<div class=\"tw-membership-gate\">"));
		assert!(has_gate_marker("<div class=\"tw-group-gate\">"));
	}

	#[test]
	fn extracts_first_matching_movie_id() {
		assert_eq!(extract_movie_id(r#""movie_id":"12345""#), Some("12345".to_string()));
		assert_eq!(extract_movie_id("data-movie-id=\"999\""), Some("999".to_string()));
		assert_eq!(extract_movie_id("no id here"), None);
	}
}
