use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

pub struct CliArgs {
    pub bind: String,
    pub db_path: Option<PathBuf>,
    pub periodicity_ms: u64,
    pub database_periodicity_ms: u64,
    pub verbose: bool,
}

fn validate_u64(value: &str) -> Result<u64, String> {
    value.parse::<u64>().map_err(|_| "must be a positive integer".to_owned())
}

pub fn parse_args() -> CliArgs {
    let matches = Command::new("telemetry master")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multiplexes instrument nodes and browser clients over WebSocket")
        .arg(
            Arg::new("periodicity")
                .help("Milliseconds between broadcast/poll ticks")
                .long("periodicity")
                .value_parser(validate_u64)
                .default_value("100"),
        )
        .arg(
            Arg::new("database_periodicity")
                .help("Milliseconds between persist ticks")
                .long("database_periodicity")
                .value_parser(validate_u64)
                .default_value("30000"),
        )
        .arg(
            Arg::new("verbose")
                .help("Enable debug-level logging")
                .short('v')
                .long("verbose")
                .value_parser(clap::value_parser!(u8).range(0..=1))
                .default_value("0"),
        )
        .arg(
            Arg::new("bind")
                .help("Address to bind the HTTP/WebSocket listener to")
                .long("bind")
                .default_value("0.0.0.0:8001"),
        )
        .arg(
            Arg::new("db_path")
                .help("Path to the SQLite database file")
                .long("db-path")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("no_persist")
                .help("Disable the persist tick entirely (in-memory only)")
                .long("no-persist")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let db_path = if matches.get_flag("no_persist") {
        None
    } else {
        Some(
            matches
                .get_one::<PathBuf>("db_path")
                .cloned()
                .unwrap_or_else(default_db_path),
        )
    };

    CliArgs {
        bind: matches.get_one::<String>("bind").expect("bind has a default").clone(),
        db_path,
        periodicity_ms: *matches.get_one::<u64>("periodicity").expect("periodicity has a default"),
        database_periodicity_ms: *matches
            .get_one::<u64>("database_periodicity")
            .expect("database_periodicity has a default"),
        verbose: *matches.get_one::<u8>("verbose").expect("verbose has a default") == 1,
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("telemetry-master")
        .join("telemetry.sqlite3")
}
