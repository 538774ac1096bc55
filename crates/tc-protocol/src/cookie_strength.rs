//! The wire-level cookie strength classification (spec §3, §9).
//!
//! This mirrors `tc_browser::cookie::LoginStrength` but lives here so that
//! `tc-state` and `tc-monitor` can describe cookie strength in heartbeats and
//! events without depending on the browser crate itself.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CookieStrength {
	Strong,
	Weak,
	None,
}
