mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ctxbridge", version, about = "Cross-context proxy toolkit")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_check_with_file() {
        let cli = Cli::try_parse_from(["ctxbridge", "check", "envelope.json"])
            .expect("check args should parse");
        match cli.command {
            Command::Check(args) => {
                assert_eq!(args.file.unwrap().to_str(), Some("envelope.json"));
                assert!(args.namespace.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_selftest_options() {
        let cli = Cli::try_parse_from([
            "ctxbridge",
            "selftest",
            "--heartbeat-interval",
            "100ms",
            "--heartbeat-timeout",
            "2s",
            "--transfer",
            "--format",
            "json",
        ])
        .expect("selftest args should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        match cli.command {
            Command::Selftest(args) => {
                assert_eq!(args.heartbeat_interval, "100ms");
                assert_eq!(args.heartbeat_timeout, "2s");
                assert!(args.transfer);
                assert!(!args.no_heartbeat);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_log_level() {
        let err = Cli::try_parse_from(["ctxbridge", "--log-level", "loud", "version"])
            .expect_err("unknown level should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn requires_subcommand() {
        assert!(Cli::try_parse_from(["ctxbridge"]).is_err());
    }
}
