//! The abstract browser capability the core depends on (spec §6.6).
//!
//! The concrete engine (context creation, page navigation, the cookie store)
//! is an external collaborator; callers in `tc-detector` and `tc-recorder`
//! only ever see this trait, never a concrete CDP type, so the engine stays
//! swappable the way the teacher depends on an external Playwright driver
//! process rather than embedding a browser.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::cookie::Cookie;
use crate::error::Result;

/// Navigation wait strategy, mirrored from the capability contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
	Load,
	DomContentLoaded,
	NetworkIdle,
}

/// A single response observed by a page, handed to `on_response` subscribers.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
	pub url: String,
	pub status: u16,
}

/// One browser context: a cookie/storage-isolated browsing session.
#[async_trait]
pub trait BrowserContext: Send + Sync {
	async fn cookies(&self) -> Result<Vec<Cookie>>;
	async fn add_cookies(&self, cookies: &[Cookie]) -> Result<()>;
	/// Reads back the storage state (used as the 2s health-check probe).
	async fn storage_state(&self) -> Result<Value>;
	async fn new_page(&self) -> Result<Box<dyn Page>>;
	async fn close(&self) -> Result<()>;
	fn is_closed(&self) -> bool;
}

/// One browser tab.
#[async_trait]
pub trait Page: Send + Sync {
	async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<()>;
	async fn evaluate(&self, script: &str) -> Result<Value>;
	async fn url(&self) -> Result<String>;
	async fn close(&self) -> Result<()>;
	/// Registers a response callback; returns a subscription id used with `off_response`.
	async fn on_response(&self, callback: Box<dyn Fn(ResponseInfo) + Send + Sync>) -> Result<u64>;
	async fn off_response(&self, subscription_id: u64) -> Result<()>;
}

/// The driver: launches the external browser process and creates contexts.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
	/// Launches (or confirms) the underlying browser process.
	async fn launch(&self, headless: bool) -> Result<()>;
	async fn new_context(&self, opts: NewContextOptions) -> Result<Box<dyn BrowserContext>>;
	/// True if the underlying process is still connected and responsive.
	async fn is_connected(&self) -> bool;
	/// Stops the driver process entirely (used by the emergency restart path).
	async fn stop(&self) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct NewContextOptions {
	pub persistent_storage_dir: Option<std::path::PathBuf>,
	pub user_agent: Option<String>,
	pub viewport: Option<(u32, u32)>,
	pub locale: Option<String>,
	pub timezone: Option<String>,
}
