use clap::Parser;
use colored::Colorize;

use tc_cli::cli::Cli;
use tc_cli::error::CliError;
use tc_cli::{commands, logging};
use tc_protocol::Config;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let config = match load_config(cli.config.as_deref()) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("{} {e}", "error:".red().bold());
			std::process::exit(1);
		}
	};

	if let Err(err) = commands::dispatch(cli.command, config).await {
		eprintln!("{} {err}", "error:".red().bold());
		std::process::exit(err.exit_code());
	}
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config, CliError> {
	match path {
		Some(p) => Ok(Config::load(p)?),
		None => {
			let default_path = std::path::Path::new("config.toml");
			if default_path.exists() {
				Ok(Config::load(default_path)?)
			} else {
				Ok(Config::default())
			}
		}
	}
}
