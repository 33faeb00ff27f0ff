mod cli;
mod commands;
mod exit_codes;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::exit_codes::ExitCode;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Success,
                _ => ExitCode::InvalidInput,
            };
            std::process::exit(code.as_i32());
        }
    };

    let code = match cli.command {
        cli::Command::Convert(args) => commands::convert(args),
        cli::Command::Exec(args) => commands::exec(args).await,
        cli::Command::Run(args) => commands::run_ir_file(args).await,
        cli::Command::Validate(args) => commands::validate_ir_file(args),
        cli::Command::Scenario(cmd) => match cmd {
            cli::ScenarioCommand::Validate(args) => commands::scenario_validate(args),
            cli::ScenarioCommand::Compile(args) => commands::scenario_compile(args),
            cli::ScenarioCommand::Run(args) => commands::scenario_run(args).await,
        },
    };

    std::process::exit(code.as_i32());
}
