//! The `botway` binary: module-mode supervisor and config management.
//!
//! Bots themselves are programs built on `botway-runtime`; `supervise` wraps
//! such a program, sets the module-mode env flag so `restart()` is
//! permitted, and re-runs it whenever it exits with the restart code.

use {
    botway_common::meta::{EXIT_CLOSE, EXIT_ERROR, EXIT_RESTART, MODULE_MODE_ENV, MODULE_MODE_SET},
    clap::{Parser, Subcommand},
    std::{path::PathBuf, process::ExitCode},
    tracing::{error, info, warn},
    tracing_subscriber::EnvFilter,
};

#[derive(Parser)]
#[command(name = "botway", about = "botway — chat-bot engine tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bot program, restarting it when it asks for a restart.
    Supervise {
        /// The bot program and its arguments.
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a commented default config file.
    Init {
        /// Directory to place botway.toml in.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

/// What the supervisor does with a child exit code.
#[derive(Debug, PartialEq, Eq)]
enum Supervision {
    Restart,
    Stop(u8),
}

fn supervise_step(code: Option<i32>) -> Supervision {
    match code {
        Some(code) if code == i32::from(EXIT_RESTART) => Supervision::Restart,
        Some(code) if code == i32::from(EXIT_CLOSE) => Supervision::Stop(EXIT_CLOSE),
        Some(code) if code == i32::from(EXIT_ERROR) => Supervision::Stop(EXIT_ERROR),
        Some(_) | None => Supervision::Stop(EXIT_ERROR),
    }
}

fn run_supervisor(command: &[String]) -> ExitCode {
    let (program, args) = match command.split_first() {
        Some(split) => split,
        None => return ExitCode::from(EXIT_ERROR),
    };

    loop {
        info!(program = %program, "starting supervised bot program");
        let status = std::process::Command::new(program)
            .args(args)
            .env(MODULE_MODE_ENV, MODULE_MODE_SET)
            .status();

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                error!(program = %program, error = %e, "failed to launch bot program");
                return ExitCode::from(EXIT_ERROR);
            },
        };

        match supervise_step(status.code()) {
            Supervision::Restart => {
                info!("bot program requested a restart");
            },
            Supervision::Stop(code) => {
                if status.code().is_none() {
                    warn!("bot program was killed by a signal");
                } else if code == EXIT_ERROR && status.code() != Some(i32::from(EXIT_ERROR)) {
                    warn!(code = status.code(), "bot program returned an unknown exit code");
                }
                return ExitCode::from(code);
            },
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Supervise { command } => run_supervisor(&command),
        Commands::Config {
            action: ConfigAction::Init { dir },
        } => match botway_config::write_default(&dir) {
            Ok(path) => {
                info!(path = %path.display(), "default config written, fill it in and start your bot");
                ExitCode::from(EXIT_CLOSE)
            },
            Err(e) => {
                error!(error = %e, "could not write config");
                ExitCode::from(EXIT_ERROR)
            },
        },
    }
}
