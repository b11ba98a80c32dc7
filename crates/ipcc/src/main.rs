mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, LinkArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ipcc", version, about = "Talk to the service processor over IPCC")]
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

    #[command(flatten)]
    link: LinkArgs,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, &cli.link, format);

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
    use std::time::Duration;

    #[test]
    fn parses_link_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ipcc",
            "ident",
            "--device",
            "/dev/ttyS1",
            "--attempts",
            "3",
            "--poll-timeout",
            "250ms",
        ])
        .expect("ident args should parse");

        assert!(matches!(cli.command, Command::Ident));
        assert_eq!(cli.link.attempts, 3);
        assert_eq!(cli.link.poll_timeout, Duration::from_millis(250));
        assert_eq!(
            cli.link.device.as_deref(),
            Some(std::path::Path::new("/dev/ttyS1"))
        );
    }

    #[test]
    fn link_defaults() {
        let cli = Cli::try_parse_from(["ipcc", "--sim", "status"]).expect("status should parse");
        assert!(cli.link.sim);
        assert_eq!(cli.link.attempts, 10);
        assert_eq!(cli.link.poll_timeout, Duration::from_millis(100));
        assert_eq!(cli.link.keepalive_limit, 50);
    }

    #[test]
    fn rejects_conflicting_keyset_sources() {
        let err = Cli::try_parse_from([
            "ipcc", "keyset", "--key", "3", "--data", "x", "--file", "/tmp/v",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn keyset_needs_a_value() {
        let err = Cli::try_parse_from(["ipcc", "keyset", "--key", "3"])
            .expect_err("missing value should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_inventory_index() {
        let cli = Cli::try_parse_from(["ipcc", "inventory", "--index", "7"])
            .expect("inventory args should parse");
        match cli.command {
            Command::Inventory(args) => assert_eq!(args.index, Some(7)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_poll_timeout() {
        let err = Cli::try_parse_from(["ipcc", "bsu", "--poll-timeout", "soon"])
            .expect_err("bad duration should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
