// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! `privhelper worker` is the privileged side and is meant to be started by
//! the service manager. Every other subcommand drives the client controller.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::registry::CommandId;

/// Command-line arguments for `privhelper`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "privhelper",
    version,
    about = "Run allow-listed commands through an authorized privileged worker.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML). Built-in defaults apply without one.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PRIVHELPER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the privileged worker (accept loop) until it is no longer needed.
    Worker,

    /// Report whether the installed worker matches this build.
    Status,

    /// Ask the running worker for its version.
    Version,

    /// Install (or reinstall) this binary as the privileged worker.
    Install,

    /// Ask the worker to remove itself.
    Uninstall {
        /// Replay the token stored in this file instead of minting one.
        #[arg(long, value_name = "PATH")]
        token_file: Option<PathBuf>,
    },

    /// Run an allow-listed command through the worker.
    Run {
        /// Command identifier (ls, ls-authorized).
        #[arg(value_name = "COMMAND")]
        command: CommandId,

        /// Arguments for the command's caller slots.
        #[arg(value_name = "ARGS")]
        args: Vec<String>,

        /// Replay the token stored in this file instead of minting one.
        #[arg(long, value_name = "PATH")]
        token_file: Option<PathBuf>,
    },

    /// Mint an authorization token and keep it in a file for later runs.
    Authorize {
        #[arg(long, value_name = "PATH")]
        token_file: PathBuf,
    },

    /// Discard a stored authorization token.
    Forget {
        #[arg(long, value_name = "PATH")]
        token_file: PathBuf,
    },

    /// Register the authorization rights of every authorized command.
    RegisterRights,
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
