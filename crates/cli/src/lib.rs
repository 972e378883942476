pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "switchboard",
    about = "Switchboard operator CLI",
    long_about = "Inspect configuration, apply migrations, check PBX and database readiness, and place test calls.",
    after_help = "Examples:\n  switchboard doctor --json\n  switchboard config\n  switchboard call 1001 1002"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity, and manager login")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Place one outbound call through a fresh manager connection")]
    Call {
        #[arg(help = "Extension that rings first")]
        from: String,
        #[arg(help = "Destination dialled once the first leg answers")]
        to: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Call { from, to } => commands::call::run(&from, &to),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
