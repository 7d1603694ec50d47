//! Command-line interface handling for the spaces server.
//!
//! Options given here override the matching settings from the config file.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the space metadata service base URL
    pub spaces_url: Option<String>,
}

impl CliArgs {
    /// Parses the process arguments.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            spaces_url: matches.get_one::<String>("spaces-url").cloned(),
        }
    }
}

fn command() -> Command {
    Command::new("spaces")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time presence and movement server for 2D spaces")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 127.0.0.1:3001)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("spaces-url")
                .long("spaces-url")
                .value_name("URL")
                .help("Base URL of the space metadata service"),
        )
}
