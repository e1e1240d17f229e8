// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `assetdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "assetdag",
    version,
    about = "Build and watch front-end assets through a declared task graph.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the project descriptor (TOML).
    #[arg(long, value_name = "PATH", default_value = "Assetdag.toml", global = true)]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ASSETDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// What to do. Without a subcommand the default task is run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Invoke a named task (or the configured default task).
    Run {
        /// Task name; defaults to `[config].default_task`.
        task: Option<String>,
    },
    /// List stages, tasks and watches declared in the descriptor.
    List,
    /// Print the resolved task tree without running anything.
    Plan {
        task: Option<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_has_no_subcommand() {
        let args = CliArgs::try_parse_from(["assetdag"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.config, "Assetdag.toml");
    }

    #[test]
    fn run_accepts_task_and_global_flags() {
        let args =
            CliArgs::try_parse_from(["assetdag", "run", "build", "--config", "site.toml"]).unwrap();
        assert_eq!(args.config, "site.toml");
        match args.command {
            Some(Command::Run { task }) => assert_eq!(task.as_deref(), Some("build")),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
