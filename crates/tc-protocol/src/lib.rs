//! Shared wire types for the TwitCasting monitor: targets, the per-URL state
//! machine, recording jobs, the heartbeat document, event log lines, and
//! runtime configuration.
//!
//! # Design Philosophy
//!
//! Types in this crate are pure data plus the small amount of pure-function
//! logic (URL normalization, reason classification) that every other crate
//! needs identically. Nothing here talks to a browser, a subprocess, or the
//! filesystem beyond loading configuration.

pub mod config;
pub mod cookie_strength;
pub mod event;
pub mod heartbeat;
pub mod job;
pub mod reason;
pub mod state;
pub mod target;

pub use config::{Config, ConfigError};
pub use cookie_strength::CookieStrength;
pub use event::{Event, EventLine, GuiStateKind, GuiStateLine};
pub use heartbeat::{EngineState, HeartbeatDocument};
pub use job::{JobPhase, RecordResult, RecordingJob};
pub use reason::Reason;
pub use state::{RecordingState, TargetState};
pub use target::{normalize_url, InvalidUrl, PrefixKind, Target};
