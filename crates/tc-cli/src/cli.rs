use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::styles::cli_styles;

#[derive(Parser, Debug)]
#[command(name = "tc-recorder")]
#[command(about = "TwitCasting broadcaster monitor and auto-recorder")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Path to config.toml; defaults to ./config.toml if present
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Add a broadcaster to the target list
	Add { target: String },
	/// Remove a broadcaster from the target list
	Remove { target: String },
	/// List the current target list
	List,
	/// Remove every target
	Clear,
	/// Run the three-stage liveness check against one target and print the result
	Check { target: String },
	/// Run the monitor loop in the foreground until interrupted
	Start,
	/// Print a summary of the last-written heartbeat document
	Status,
}
