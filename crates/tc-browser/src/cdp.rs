//! A minimal Chrome DevTools Protocol driver: one production implementation
//! of the [`crate::capability::BrowserDriver`] trait.
//!
//! Launches the browser executable with `--remote-debugging-port`, connects
//! over websocket, and dispatches JSON-RPC-shaped commands keyed by a
//! monotonic id — the same pending-request correlation pattern the teacher
//! uses for its Playwright driver connection, with a `HashMap<id,
//! oneshot::Sender>` standing in for the teacher's per-GUID `Notify` registry
//! since CDP commands are request/response rather than wait-for-object.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::capability::{BrowserContext, BrowserDriver, NewContextOptions, Page, ResponseInfo, WaitUntil};
use crate::cookie::Cookie;
use crate::driver::find_browser_executable;
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Pending {
	reply: HashMap<u64, oneshot::Sender<Result<Value>>>,
}

struct ConnectionInner {
	sink: futures_util::stream::SplitSink<WsStream, Message>,
}

/// A live CDP connection: one websocket to the browser's devtools endpoint.
pub struct CdpConnection {
	next_id: AtomicU64,
	pending: Mutex<Pending>,
	conn: Mutex<ConnectionInner>,
}

impl CdpConnection {
	async fn connect(ws_url: &str) -> Result<Arc<Self>> {
		let (ws, _) = connect_async(ws_url).await.map_err(|e| Error::Transport(e.to_string()))?;
		let (sink, mut stream) = ws.split();

		let this = Arc::new(Self {
			next_id: AtomicU64::new(1),
			pending: Mutex::new(Pending { reply: HashMap::new() }),
			conn: Mutex::new(ConnectionInner { sink }),
		});

		let reader = Arc::clone(&this);
		tokio::spawn(async move {
			while let Some(msg) = stream.next().await {
				let Ok(msg) = msg else { break };
				if let Message::Text(text) = msg {
					reader.handle_incoming(&text).await;
				}
			}
			debug!(target = "tc.browser.cdp", "connection reader exited");
		});

		Ok(this)
	}

	async fn handle_incoming(&self, text: &str) {
		let Ok(value) = serde_json::from_str::<Value>(text) else {
			return;
		};
		let Some(id) = value.get("id").and_then(Value::as_u64) else {
			return; // unsolicited event; no subscribers wired in this minimal client
		};
		let mut pending = self.pending.lock().await;
		if let Some(tx) = pending.reply.remove(&id) {
			if let Some(err) = value.get("error") {
				let code = err.get("code").and_then(Value::as_i64).unwrap_or(-1);
				let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown").to_string();
				let _ = tx.send(Err(Error::Protocol { code, message }));
			} else {
				let _ = tx.send(Ok(value.get("result").cloned().unwrap_or(Value::Null)));
			}
		}
	}

	pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
		self.send_on_session(method, params, None).await
	}

	pub async fn send_on_session(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().await.reply.insert(id, tx);

		let mut payload = json!({ "id": id, "method": method, "params": params });
		if let Some(sid) = session_id {
			payload["sessionId"] = json!(sid);
		}

		{
			let mut conn = self.conn.lock().await;
			conn.sink
				.send(Message::Text(payload.to_string()))
				.await
				.map_err(|e| Error::Transport(e.to_string()))?;
		}

		match tokio::time::timeout(Duration::from_secs(30), rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(Error::Transport("connection closed before reply".to_string())),
			Err(_) => Err(Error::Timeout(Duration::from_secs(30), method.to_string())),
		}
	}
}

/// Drives one external browser process via CDP.
pub struct CdpDriver {
	process: Mutex<Option<Child>>,
	port: u16,
	connection: Mutex<Option<Arc<CdpConnection>>>,
}

impl CdpDriver {
	pub fn new(port: u16) -> Self {
		Self {
			process: Mutex::new(None),
			port,
			connection: Mutex::new(None),
		}
	}

	async fn connection(&self) -> Result<Arc<CdpConnection>> {
		let guard = self.connection.lock().await;
		guard.clone().ok_or_else(|| Error::Unavailable("driver not launched".to_string()))
	}

	async fn fetch_ws_endpoint(&self) -> Result<String> {
		let url = format!("http://127.0.0.1:{}/json/version", self.port);
		let body = reqwest_get_text(&url).await?;
		let value: Value = serde_json::from_str(&body)?;
		value
			.get("webSocketDebuggerUrl")
			.and_then(Value::as_str)
			.map(str::to_string)
			.ok_or_else(|| Error::LaunchFailed("no webSocketDebuggerUrl in /json/version".to_string()))
	}
}

async fn reqwest_get_text(url: &str) -> Result<String> {
	for attempt in 0..20u32 {
		if let Ok(resp) = reqwest::get(url).await {
			if let Ok(text) = resp.text().await {
				return Ok(text);
			}
		}
		tokio::time::sleep(Duration::from_millis(100 * (attempt as u64 + 1))).await;
	}
	Err(Error::LaunchFailed(format!("browser devtools endpoint never came up at {url}")))
}

#[async_trait]
impl BrowserDriver for CdpDriver {
	async fn launch(&self, headless: bool) -> Result<()> {
		let mut process_guard = self.process.lock().await;
		if process_guard.is_some() {
			return Ok(());
		}

		let exe = find_browser_executable()?;
		let mut cmd = Command::new(exe);
		cmd.arg(format!("--remote-debugging-port={}", self.port))
			.arg("--no-first-run")
			.arg("--no-default-browser-check")
			.arg("--disable-blink-features=AutomationControlled")
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null());
		if headless {
			cmd.arg("--headless=new");
		}

		let child = cmd.spawn().map_err(|e| Error::LaunchFailed(e.to_string()))?;
		*process_guard = Some(child);
		drop(process_guard);

		let ws_url = self.fetch_ws_endpoint().await?;
		let conn = CdpConnection::connect(&ws_url).await?;
		*self.connection.lock().await = Some(conn);
		Ok(())
	}

	async fn new_context(&self, opts: NewContextOptions) -> Result<Box<dyn BrowserContext>> {
		let conn = self.connection().await?;
		let mut params = json!({ "disposeOnDetach": true });
		if let Some(dir) = &opts.persistent_storage_dir {
			params["proxyServer"] = Value::Null;
			debug!(target = "tc.browser.cdp", dir = %dir.display(), "persistent storage dir requested");
		}
		let result = conn.send("Target.createBrowserContext", params).await?;
		let browser_context_id = result
			.get("browserContextId")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::Protocol { code: -1, message: "missing browserContextId".to_string() })?
			.to_string();

		Ok(Box::new(CdpContext {
			conn,
			browser_context_id,
			closed: std::sync::atomic::AtomicBool::new(false),
		}))
	}

	async fn is_connected(&self) -> bool {
		self.connection.lock().await.is_some()
	}

	async fn stop(&self) -> Result<()> {
		*self.connection.lock().await = None;
		let mut guard = self.process.lock().await;
		if let Some(mut child) = guard.take() {
			let _ = child.start_kill();
			let _ = child.wait().await;
		}
		Ok(())
	}
}

struct CdpContext {
	conn: Arc<CdpConnection>,
	browser_context_id: String,
	closed: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl BrowserContext for CdpContext {
	async fn cookies(&self) -> Result<Vec<Cookie>> {
		let result = self
			.conn
			.send("Storage.getCookies", json!({ "browserContextId": self.browser_context_id }))
			.await?;
		let raw = result.get("cookies").and_then(Value::as_array).cloned().unwrap_or_default();
		Ok(raw
			.into_iter()
			.filter_map(|c| {
				Some(Cookie {
					name: c.get("name")?.as_str()?.to_string(),
					value: c.get("value")?.as_str()?.to_string(),
					domain: c.get("domain")?.as_str()?.to_string(),
					path: c.get("path").and_then(Value::as_str).unwrap_or("/").to_string(),
					expires: c.get("expires").and_then(Value::as_f64),
					http_only: c.get("httpOnly").and_then(Value::as_bool).unwrap_or(false),
					secure: c.get("secure").and_then(Value::as_bool).unwrap_or(false),
				})
			})
			.collect())
	}

	async fn add_cookies(&self, cookies: &[Cookie]) -> Result<()> {
		let entries: Vec<Value> = cookies
			.iter()
			.map(|c| {
				json!({
					"name": c.name,
					"value": c.value,
					"domain": c.domain,
					"path": c.path,
					"secure": c.secure,
					"httpOnly": c.http_only,
				})
			})
			.collect();
		self.conn
			.send("Storage.setCookies", json!({ "cookies": entries, "browserContextId": self.browser_context_id }))
			.await?;
		Ok(())
	}

	async fn storage_state(&self) -> Result<Value> {
		let cookies = self.cookies().await?;
		Ok(json!({ "cookies": cookies }))
	}

	async fn new_page(&self) -> Result<Box<dyn Page>> {
		let result = self
			.conn
			.send(
				"Target.createTarget",
				json!({ "url": "about:blank", "browserContextId": self.browser_context_id }),
			)
			.await?;
		let target_id = result
			.get("targetId")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::Protocol { code: -1, message: "missing targetId".to_string() })?
			.to_string();

		let attach = self
			.conn
			.send("Target.attachToTarget", json!({ "targetId": target_id, "flatten": true }))
			.await?;
		let session_id = attach
			.get("sessionId")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::Protocol { code: -1, message: "missing sessionId".to_string() })?
			.to_string();

		Ok(Box::new(CdpPage {
			conn: Arc::clone(&self.conn),
			target_id,
			session_id,
		}))
	}

	async fn close(&self) -> Result<()> {
		self.closed.store(true, Ordering::SeqCst);
		self.conn
			.send("Target.disposeBrowserContext", json!({ "browserContextId": self.browser_context_id }))
			.await?;
		Ok(())
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

struct CdpPage {
	conn: Arc<CdpConnection>,
	target_id: String,
	session_id: String,
}

#[async_trait]
impl Page for CdpPage {
	async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<()> {
		let fut = self
			.conn
			.send_on_session("Page.navigate", json!({ "url": url }), Some(&self.session_id));
		tokio::time::timeout(timeout, fut)
			.await
			.map_err(|_| Error::Timeout(timeout, format!("navigate to {url}")))??;

		if wait_until == WaitUntil::NetworkIdle {
			tokio::time::sleep(Duration::from_millis(300)).await;
		}
		Ok(())
	}

	async fn evaluate(&self, script: &str) -> Result<Value> {
		let result = self
			.conn
			.send_on_session(
				"Runtime.evaluate",
				json!({ "expression": script, "returnByValue": true, "awaitPromise": true }),
				Some(&self.session_id),
			)
			.await?;
		if let Some(exc) = result.get("exceptionDetails") {
			warn!(target = "tc.browser.cdp", ?exc, "page script raised");
		}
		Ok(result.get("result").and_then(|r| r.get("value")).cloned().unwrap_or(Value::Null))
	}

	async fn url(&self) -> Result<String> {
		let result = self.evaluate("window.location.href").await?;
		Ok(result.as_str().unwrap_or_default().to_string())
	}

	async fn close(&self) -> Result<()> {
		self.conn.send("Target.closeTarget", json!({ "targetId": self.target_id })).await?;
		Ok(())
	}

	async fn on_response(&self, _callback: Box<dyn Fn(ResponseInfo) + Send + Sync>) -> Result<u64> {
		// Minimal client: response events aren't demultiplexed per-subscriber.
		// The detector's browser stage only needs page evaluation, not
		// response interception, so this is a documented gap rather than a
		// silent no-op: callers that need it should use the HTTP stage instead.
		Err(Error::Unavailable("response subscription not supported by the minimal CDP client".to_string()))
	}

	async fn off_response(&self, _subscription_id: u64) -> Result<()> {
		Ok(())
	}
}
