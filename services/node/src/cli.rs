use clap::{Arg, Command};

use crate::error::NodeError;

pub struct CliArgs {
    pub websocket: String,
    pub reference: String,
    pub arduport: Option<String>,
    pub emulate: bool,
    pub verbose: bool,
}

fn validate_reference(value: &str) -> Result<String, String> {
    let mut chars = value.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if value.is_empty() || !starts_ok || !rest_ok {
        return Err(format!(
            "'{value}' is not a legal node label (must not start with a digit, letters/digits/underscore only)"
        ));
    }
    Ok(value.to_owned())
}

pub fn parse_args() -> Result<CliArgs, NodeError> {
    let matches = Command::new("telemetry node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bridges one micro-controller's serial link to the telemetry master")
        .arg(
            Arg::new("websocket")
                .help("The master's nodes endpoint")
                .long("websocket")
                .default_value("ws://127.0.0.1:8001/nodes_ws"),
        )
        .arg(
            Arg::new("reference")
                .help("This node's label, used as its store table name")
                .long("reference")
                .value_parser(validate_reference)
                .required(true),
        )
        .arg(
            Arg::new("arduport")
                .help("Explicit serial device path; omit to auto-discover")
                .long("arduport"),
        )
        .arg(
            Arg::new("emulate")
                .help("Use the emulator transport's line settings")
                .long("emulate")
                .value_parser(clap::value_parser!(u8).range(0..=1))
                .default_value("0"),
        )
        .arg(
            Arg::new("verbose")
                .help("Enable debug-level logging")
                .short('v')
                .long("verbose")
                .value_parser(clap::value_parser!(u8).range(0..=1))
                .default_value("0"),
        )
        .get_matches();

    let reference = matches
        .get_one::<String>("reference")
        .expect("reference is required")
        .clone();
    validate_reference(&reference).map_err(NodeError::ConfigError)?;

    Ok(CliArgs {
        websocket: matches
            .get_one::<String>("websocket")
            .expect("websocket has a default")
            .clone(),
        reference,
        arduport: matches.get_one::<String>("arduport").cloned(),
        emulate: *matches.get_one::<u8>("emulate").expect("emulate has a default") == 1,
        verbose: *matches.get_one::<u8>("verbose").expect("verbose has a default") == 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legal_identifiers() {
        assert!(validate_reference("lab7").is_ok());
        assert!(validate_reference("_internal").is_ok());
        assert!(validate_reference("Lab_9").is_ok());
    }

    #[test]
    fn rejects_labels_starting_with_a_digit() {
        assert!(validate_reference("9lab").is_err());
    }

    #[test]
    fn rejects_empty_and_non_identifier_labels() {
        assert!(validate_reference("").is_err());
        assert!(validate_reference("lab-7").is_err());
        assert!(validate_reference("lab 7").is_err());
    }
}
