mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ctlwire", version, about = "Instrument controller client")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
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
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "ctlwire",
            "send",
            "10.0.0.5",
            "--port",
            "5000",
            "--command",
            "12327",
            "--param",
            "0=1",
            "--param",
            "3=-4",
            "--value",
            "-2.5",
            "--wait",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.port, 5000);
        assert_eq!(args.params, vec![(0, 1), (3, -4)]);
        assert_eq!(args.value, Some(-2.5));
        assert!(args.wait);
    }

    #[test]
    fn rejects_out_of_range_param() {
        let err = Cli::try_parse_from([
            "ctlwire", "send", "host", "--port", "1", "--command", "1", "--param", "9=1",
        ])
        .expect_err("index 9 should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_monitor_codes() {
        let cli = Cli::try_parse_from([
            "ctlwire", "monitor", "host", "--port", "5000", "--codes", "2001,2002", "--count", "3",
        ])
        .expect("monitor args should parse");
        let Command::Monitor(args) = cli.command else {
            panic!("expected monitor");
        };
        assert_eq!(args.codes, vec![2001, 2002]);
        assert_eq!(args.count, Some(3));
    }

    #[test]
    fn monitor_requires_codes() {
        let err = Cli::try_parse_from(["ctlwire", "monitor", "host", "--port", "5000"])
            .expect_err("codes are required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
