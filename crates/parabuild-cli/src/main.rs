//! parabuild: build independent targets in parallel on a pool of workers.

use clap::{Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod reporter;

use commands::build::BuildOptions;
use reporter::ReporterKind;

#[derive(Parser)]
#[command(name = "parabuild", version)]
#[command(about = "Build independent targets in parallel", long_about = None)]
struct Cli {
    /// Build file to read
    #[arg(
        short,
        long,
        env = "PARABUILD_FILE",
        default_value = "parabuild.kdl",
        global = true
    )]
    file: PathBuf,

    /// Only build these targets (repeatable)
    #[arg(short = 't', long = "target")]
    targets: Vec<String>,

    /// Maximum number of parallel workers [default: build file, else CPU count]
    #[arg(short, long, env = "PARABUILD_CONCURRENCY")]
    concurrency: Option<NonZeroUsize>,

    /// Reporter to use (repeatable) [default: status on a terminal, else dumb]
    #[arg(short, long = "reporter", value_enum)]
    reporters: Vec<ReporterKind>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List targets in build order
    List,
    /// Validate the build file
    Validate,
    /// Serve build requests from a scheduler (started by parabuild itself)
    #[command(hide = true)]
    Worker,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn report(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(commands::exit_code(&err))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Some(Commands::Worker) => report(commands::worker::run().await),
        Some(Commands::List) => report(commands::list(&cli.file)),
        Some(Commands::Validate) => report(commands::validate(&cli.file)),
        None => {
            commands::build::run(BuildOptions {
                file: cli.file,
                targets: cli.targets,
                concurrency: cli.concurrency,
                reporters: cli.reporters,
            })
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_flags() {
        let cli = Cli::try_parse_from([
            "parabuild", "-f", "ci.kdl", "-t", "a", "-t", "b", "-c", "3", "-r", "simple", "-r",
            "dumb",
        ])
        .unwrap();

        assert_eq!(cli.file, PathBuf::from("ci.kdl"));
        assert_eq!(cli.targets, vec!["a", "b"]);
        assert_eq!(cli.concurrency.map(NonZeroUsize::get), Some(3));
        assert_eq!(cli.reporters, vec![ReporterKind::Simple, ReporterKind::Dumb]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(Cli::try_parse_from(["parabuild", "-c", "0"]).is_err());
    }

    #[test]
    fn test_subcommands() {
        let cli = Cli::try_parse_from(["parabuild", "list", "-f", "x.kdl"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::List)));
        assert_eq!(cli.file, PathBuf::from("x.kdl"));

        let cli = Cli::try_parse_from(["parabuild", "worker"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Worker)));
    }
}
