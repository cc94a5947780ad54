mod attempt;
mod config;
mod duration;
mod error;
mod logging;
mod process_group;
mod retry;
mod signals;
mod supervisor;
mod tracker;
mod watchdog;

use attempt::{AttemptRunner, CommandSpec, OutputSinks};
use clap::Parser;
use config::{Config, Overrides};
use duration::{format_duration, parse_duration};
use error::SuperviseError;
use process_group::ProcessGroupKiller;
use retry::RetryPolicy;
use signals::SignalHandler;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use supervisor::Supervisor;
use tokio_util::sync::CancellationToken;

/// Run a command and restart it whenever its output stalls:
/// if neither stdout nor stderr is written for longer than the stall
/// threshold, the command's process group is killed and the command is
/// started again after a backoff delay.
#[derive(Parser, Debug)]
#[command(name = "stallwatch", version, about)]
pub struct Cli {
    /// Output silence after which the command is killed and restarted [default: 1m]
    #[arg(long, visible_alias = "wait", value_name = "DURATION", value_parser = parse_duration)]
    stall_threshold: Option<Duration>,

    /// Delay before restarting a stalled command [default: 10s]
    #[arg(long, visible_alias = "wait-retry", value_name = "DURATION", value_parser = parse_duration)]
    retry_backoff: Option<Duration>,

    /// Maximum number of attempts, 0 for unbounded [default: 0]
    #[arg(long, visible_alias = "max-tries", value_name = "N")]
    max_attempts: Option<u32>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the resolved settings and exit without running the command
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (spawns, stall checks, retry decisions)
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Command to supervise, followed by its arguments
    #[arg(value_name = "COMMAND", trailing_var_arg = true)]
    command: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            stall_threshold: self.stall_threshold,
            retry_backoff: self.retry_backoff,
            max_attempts: self.max_attempts,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and are not errors.
            let code = if e.use_stderr() { error::SUPERVISOR_EXIT_CODE } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let config = Config::resolve(cli.config.as_deref(), &cli.overrides());
    let level = match &config {
        Ok(c) => c.log.level.clone(),
        Err(_) => "info".to_string(),
    };
    logging::init(cli.verbose, cli.quiet, &level);
    tracing::debug!(?cli, "parsed CLI arguments");

    let result = match config {
        Ok(config) => run(&cli, config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: &Cli, config: Config) -> Result<(), SuperviseError> {
    let command = CommandSpec::from_argv(&cli.command)
        .ok_or_else(|| SuperviseError::Usage("give command and parameters to run".to_string()))?;

    if cli.dry_run {
        print_settings(&command, &config);
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let _signals = SignalHandler::install(shutdown.clone()).map_err(SuperviseError::Signals)?;

    let settings = &config.supervisor;
    let runner = AttemptRunner::new(
        command,
        settings.stall_threshold,
        RetryPolicy::new(settings.max_attempts, settings.retry_backoff),
        OutputSinks::stdio(),
        Arc::new(ProcessGroupKiller),
    );
    Supervisor::new(runner, shutdown).run().await
}

fn print_settings(command: &CommandSpec, config: &Config) {
    let settings = &config.supervisor;
    println!("stallwatch v{}", env!("CARGO_PKG_VERSION"));
    println!("command:         {command}");
    println!("stall threshold: {}", format_duration(settings.stall_threshold));
    println!("retry backoff:   {}", format_duration(settings.retry_backoff));
    if settings.max_attempts == 0 {
        println!("max attempts:    unbounded");
    } else {
        println!("max attempts:    {}", settings.max_attempts);
    }
    println!("log level:       {}", config.log.level);
    println!("Dry run mode, settings validated, not running.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("stallwatch").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_command_args_pass_through() {
        let cli = parse(&["ping", "-c", "2", "127.0.0.1"]);
        assert_eq!(cli.command, vec!["ping", "-c", "2", "127.0.0.1"]);
        assert!(cli.stall_threshold.is_none());
    }

    #[test]
    fn test_options_before_command() {
        let cli = parse(&[
            "--stall-threshold",
            "1s",
            "--retry-backoff",
            "500ms",
            "--max-attempts",
            "3",
            "ping",
            "-c",
            "4",
        ]);
        assert_eq!(cli.stall_threshold, Some(Duration::from_secs(1)));
        assert_eq!(cli.retry_backoff, Some(Duration::from_millis(500)));
        assert_eq!(cli.max_attempts, Some(3));
        assert_eq!(cli.command, vec!["ping", "-c", "4"]);
    }

    #[test]
    fn test_legacy_option_names() {
        let cli = parse(&["--wait", "2s", "--wait-retry", "1s", "--max-tries", "20", "true"]);
        assert_eq!(cli.stall_threshold, Some(Duration::from_secs(2)));
        assert_eq!(cli.retry_backoff, Some(Duration::from_secs(1)));
        assert_eq!(cli.max_attempts, Some(20));
    }

    #[test]
    fn test_options_after_command_belong_to_command() {
        let cli = parse(&["sh", "-c", "echo hi", "--verbose"]);
        assert!(!cli.verbose);
        assert_eq!(cli.command, vec!["sh", "-c", "echo hi", "--verbose"]);
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result = Cli::try_parse_from(["stallwatch", "--stall-threshold", "soon", "true"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_command_parses_but_is_usage_error() {
        let cli = parse(&[]);
        assert!(CommandSpec::from_argv(&cli.command).is_none());
    }

    #[test]
    fn test_overrides_from_cli() {
        let cli = parse(&["--max-attempts", "4", "true"]);
        let overrides = cli.overrides();
        assert_eq!(overrides.max_attempts, Some(4));
        assert!(overrides.stall_threshold.is_none());
        assert!(overrides.retry_backoff.is_none());
    }
}
