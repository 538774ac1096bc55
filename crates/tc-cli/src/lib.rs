//! The `tc-recorder` binary's command surface (spec §6.3): target list
//! management, a one-shot liveness check, the foreground monitor loop, and a
//! heartbeat-backed status summary.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod styles;
