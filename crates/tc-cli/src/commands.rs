use std::sync::Arc;

use colored::Colorize;
use tc_browser::{BrowserSingleton, CdpDriver};
use tc_detector::{DetectorConfig, LivenessDetector};
use tc_monitor::MonitorEngine;
use tc_protocol::Config;
use tc_recorder::RecorderWrapper;
use tc_state::{EventLog, GuiBridgeLog};

use crate::cli::Command;
use crate::error::{CliError, Result};

const CDP_PORT: u16 = 9222;

pub async fn dispatch(command: Command, config: Config) -> Result<()> {
	match command {
		Command::Add { target } => add(&config, &target),
		Command::Remove { target } => remove(&config, &target),
		Command::List => list(&config),
		Command::Clear => clear(&config),
		Command::Check { target } => check(&config, &target).await,
		Command::Start => start(config).await,
		Command::Status => status(&config),
	}
}

fn require_targets_file(config: &Config) -> Result<()> {
	if !config.targets_file.exists() {
		return Err(CliError::MissingTargetsFile);
	}
	Ok(())
}

fn add(config: &Config, raw: &str) -> Result<()> {
	let target = tc_protocol::normalize_url(raw)?;
	let mut targets = tc_monitor::targets_file::load(&config.targets_file)?;
	if !targets.iter().any(|t| t.canonical_url == target.canonical_url) {
		targets.push(target.clone());
	}
	tc_monitor::targets_file::save(&config.targets_file, &targets, Some(&config.logs_dir))?;
	println!("{} {}", "added".green(), target.canonical_url);
	Ok(())
}

fn remove(config: &Config, raw: &str) -> Result<()> {
	require_targets_file(config)?;
	let target = tc_protocol::normalize_url(raw)?;
	let mut targets = tc_monitor::targets_file::load(&config.targets_file)?;
	let before = targets.len();
	targets.retain(|t| t.canonical_url != target.canonical_url);
	tc_monitor::targets_file::save(&config.targets_file, &targets, Some(&config.logs_dir))?;
	if targets.len() == before {
		println!("{} {} was not in the target list", "no-op:".yellow(), target.canonical_url);
	} else {
		println!("{} {}", "removed".green(), target.canonical_url);
	}
	Ok(())
}

fn list(config: &Config) -> Result<()> {
	require_targets_file(config)?;
	let targets = tc_monitor::targets_file::load(&config.targets_file)?;
	if targets.is_empty() {
		println!("no targets");
	}
	for target in targets {
		println!("{}", target.canonical_url);
	}
	Ok(())
}

fn clear(config: &Config) -> Result<()> {
	require_targets_file(config)?;
	tc_monitor::targets_file::save(&config.targets_file, &[], Some(&config.logs_dir))?;
	println!("{}", "cleared all targets".green());
	Ok(())
}

async fn check(config: &Config, raw: &str) -> Result<()> {
	let target = tc_protocol::normalize_url(raw)?;
	let detector = build_detector(config);
	let result = detector.check(&target.canonical_url).await?;
	println!("{:<12} {:?}", "method:".dimmed(), result.method);
	println!("{:<12} {:?}", "reason:".dimmed(), result.reason);
	println!("{:<12} {}", "live:".dimmed(), if result.is_live { "yes".green() } else { "no".red() });
	if let Some(movie_id) = &result.movie_id {
		println!("{:<12} {movie_id}", "movie_id:".dimmed());
	}
	Ok(())
}

async fn start(config: Config) -> Result<()> {
	let wrapper = build_wrapper(&config)?;
	let monitor_log = Arc::new(EventLog::new(&config.logs_dir, "monitor", config.event_log_rotate_bytes)?);
	let engine = MonitorEngine::new(config, wrapper, monitor_log);
	engine.initialize().await?;
	engine.start().await;

	tracing::info!(target = "tc.cli", "monitor loop started; press ctrl-c to stop");
	tokio::signal::ctrl_c().await.map_err(CliError::Io)?;
	engine.stop().await;
	Ok(())
}

fn status(config: &Config) -> Result<()> {
	let heartbeat_path = config.state_dir.join("heartbeat.json");
	let Some(doc) = tc_state::read_heartbeat(&heartbeat_path) else {
		println!("{}", "no heartbeat found; the monitor loop has never run here".yellow());
		return Ok(());
	};

	let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
	println!("{:<16} {:?}", "state:".dimmed(), doc.state);
	println!("{:<16} {}", "targets:".dimmed(), doc.targets);
	println!("{:<16} {}/{}", "active jobs:".dimmed(), doc.active_jobs, doc.max_concurrent);
	println!("{:<16} {}", "total checks:".dimmed(), doc.total_checks);
	println!("{:<16} {}", "total successes:".dimmed(), doc.total_successes);
	println!("{:<16} {}", "total errors:".dimmed(), doc.total_errors);
	println!("{:<16} {}", "recoveries:".dimmed(), doc.recovery_count);
	let staleness = if doc.is_stale(now) { "stale".red() } else { "fresh".green() };
	println!("{:<16} {} ({}s old)", "heartbeat:".dimmed(), staleness, doc.age_secs(now));
	Ok(())
}

fn build_detector(config: &Config) -> LivenessDetector {
	let driver = Arc::new(CdpDriver::new(CDP_PORT));
	let browser = Arc::new(BrowserSingleton::new(driver, config.cookie_dir.clone(), config.state_dir.join("storage_state.json")));
	LivenessDetector::new(
		browser,
		DetectorConfig {
			cookie_dir: config.cookie_dir.clone(),
			streaming_probe_tool_path: config.streaming_probe_tool_path.clone(),
			streaming_probe_timeout: std::time::Duration::from_secs(config.liveness_check_timeout_secs),
			http_timeout: std::time::Duration::from_secs(config.liveness_check_timeout_secs),
		},
	)
}

fn build_wrapper(config: &Config) -> Result<Arc<RecorderWrapper>> {
	let driver = Arc::new(CdpDriver::new(CDP_PORT));
	let browser = Arc::new(BrowserSingleton::new(driver, config.cookie_dir.clone(), config.state_dir.join("storage_state.json")));
	let detector = Arc::new(LivenessDetector::new(
		browser.clone(),
		DetectorConfig {
			cookie_dir: config.cookie_dir.clone(),
			streaming_probe_tool_path: config.streaming_probe_tool_path.clone(),
			streaming_probe_timeout: std::time::Duration::from_secs(config.liveness_check_timeout_secs),
			http_timeout: std::time::Duration::from_secs(config.liveness_check_timeout_secs),
		},
	));
	let event_log = Arc::new(EventLog::new(&config.logs_dir, "wrapper", config.event_log_rotate_bytes)?);
	let gui_bridge = Arc::new(GuiBridgeLog::new(config.logs_dir.join("monitor_gui_bridge.jsonl"))?);
	Ok(Arc::new(RecorderWrapper::new(config.clone(), browser, detector, event_log, gui_bridge)))
}
