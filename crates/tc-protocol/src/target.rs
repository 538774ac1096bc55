//! Targets: the normalized broadcaster identifiers the monitor watches (spec §3, §6.1).

use serde::{Deserialize, Serialize};

/// The prefix a raw target string was written with, preserved for display
/// even though the canonical URL is what callers actually use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixKind {
	/// `c:<name>` — a channel handle.
	Channel,
	/// `g:<name>` — a group handle; the prefix is kept in the canonical URL.
	Group,
	/// `ig:<name>` — an Instagram cross-link handle; prefix kept.
	Instagram,
	/// `f:<name>` — a Facebook cross-link handle.
	Facebook,
	/// `tw:<name>` — a Twitter cross-link handle.
	Twitter,
	/// An already-qualified `http(s)://` URL, or a bare username.
	RawUrl,
}

/// A logical stream source, unique by [`Target::canonical_url`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
	/// Exactly what the caller typed or loaded from `targets.json`.
	pub raw: String,
	/// The normalized `https://twitcasting.tv/…` form produced by [`normalize_url`].
	pub canonical_url: String,
	pub prefix_kind: PrefixKind,
}

/// Error returned when a raw target string matches none of the accepted forms.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid target: {0:?}")]
pub struct InvalidUrl(pub String);

/// Normalizes a raw target string to its canonical TwitCasting URL (spec §6.1).
///
/// Idempotent: `normalize_url(normalize_url(x)?) == normalize_url(x)?` for every
/// `x` this function accepts.
pub fn normalize_url(raw: &str) -> Result<Target, InvalidUrl> {
	let raw_owned = raw.to_string();
	let trimmed = raw.trim();

	if let Some(rest) = trimmed.strip_prefix("http://").or_else(|| trimmed.strip_prefix("https://")) {
		let _ = rest;
		let mut url = trimmed.to_string();
		if let Some(stripped) = url.strip_suffix("/broadcaster") {
			url = stripped.to_string();
		}
		while url.ends_with('/') {
			url.pop();
		}
		return Ok(Target { raw: raw_owned, canonical_url: url, prefix_kind: PrefixKind::RawUrl });
	}

	if let Some(name) = trimmed.strip_prefix("c:") {
		return bare_name(name).map(|n| Target {
			raw: raw_owned,
			canonical_url: format!("https://twitcasting.tv/{n}"),
			prefix_kind: PrefixKind::Channel,
		});
	}
	if let Some(name) = trimmed.strip_prefix("g:") {
		return bare_name(name).map(|n| Target {
			raw: raw_owned,
			canonical_url: format!("https://twitcasting.tv/g:{n}"),
			prefix_kind: PrefixKind::Group,
		});
	}
	if let Some(name) = trimmed.strip_prefix("ig:") {
		return bare_name(name).map(|n| Target {
			raw: raw_owned,
			canonical_url: format!("https://twitcasting.tv/ig:{n}"),
			prefix_kind: PrefixKind::Instagram,
		});
	}
	if let Some(name) = trimmed.strip_prefix("f:") {
		return bare_name(name).map(|n| Target {
			raw: raw_owned,
			canonical_url: format!("https://twitcasting.tv/{n}"),
			prefix_kind: PrefixKind::Facebook,
		});
	}
	if let Some(name) = trimmed.strip_prefix("tw:") {
		return bare_name(name).map(|n| Target {
			raw: raw_owned,
			canonical_url: format!("https://twitcasting.tv/{n}"),
			prefix_kind: PrefixKind::Twitter,
		});
	}

	bare_name(trimmed).map(|n| Target {
		raw: raw_owned,
		canonical_url: format!("https://twitcasting.tv/{n}"),
		prefix_kind: PrefixKind::RawUrl,
	})
}

fn bare_name(s: &str) -> Result<&str, InvalidUrl> {
	if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
		Ok(s)
	} else {
		Err(InvalidUrl(s.to_string()))
	}
}
