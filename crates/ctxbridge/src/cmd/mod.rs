use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use ctxbridge_proxy::DEFAULT_NAMESPACE;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod check;
pub mod selftest;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a message envelope read as JSON.
    Check(CheckArgs),
    /// Run provider and injector over an in-memory channel.
    Selftest(SelftestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Check(args) => check::run(args, format),
        Command::Selftest(args) => selftest::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// File holding the envelope. Reads stdin when omitted or `-`.
    pub file: Option<PathBuf>,
    /// Namespace the envelope must belong to.
    #[arg(long)]
    pub namespace: Option<String>,
}

#[derive(Args, Debug)]
pub struct SelftestArgs {
    /// Namespace shared by both sides.
    #[arg(long, env = "CTXBRIDGE_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,
    /// Delay between heartbeat probes (e.g. 300ms, 1s).
    #[arg(long, default_value = "300ms")]
    pub heartbeat_interval: String,
    /// Heartbeat deadline (e.g. 1s, 1500ms). Must exceed the interval.
    #[arg(long, default_value = "1s")]
    pub heartbeat_timeout: String,
    /// Skip the heartbeat before each call.
    #[arg(long)]
    pub no_heartbeat: bool,
    /// Hand transferable payload leaves to the adapter.
    #[arg(long)]
    pub transfer: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a humanized duration: `500ms`, `2s`, or bare seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        Ok(Duration::from_secs(value))
    }
}
