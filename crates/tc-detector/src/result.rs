//! The detector's output shape (spec §4.2).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectReason {
	Live,
	NotLive,
	AuthRequired,
	NotFound,
	NetworkError,
	Timeout,
	InvalidUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectMethod {
	Http,
	Browser,
	Streamlink,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResult {
	pub is_live: bool,
	pub movie_id: Option<String>,
	pub reason: DetectReason,
	pub detail: Option<String>,
	pub method: DetectMethod,
	/// Set when `reason = AUTH_REQUIRED` and the cookie snapshot was missing
	/// the session cookie (spec §4.2, §4.4.2, §8).
	pub cookie_incomplete: bool,
}

impl DetectResult {
	pub fn live(movie_id: Option<String>, method: DetectMethod) -> Self {
		Self { is_live: true, movie_id, reason: DetectReason::Live, detail: None, method, cookie_incomplete: false }
	}

	pub fn not_live(method: DetectMethod) -> Self {
		Self { is_live: false, movie_id: None, reason: DetectReason::NotLive, detail: None, method, cookie_incomplete: false }
	}

	pub fn auth_required(method: DetectMethod, cookie_incomplete: bool) -> Self {
		Self {
			is_live: false,
			movie_id: None,
			reason: DetectReason::AuthRequired,
			detail: None,
			method,
			cookie_incomplete,
		}
	}
}
