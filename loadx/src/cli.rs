use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "loadx",
    author,
    version,
    about = "HTTP load generation and evaluation engine",
    long_about = "loadx turns curl command lines into canonical request records, groups them \
into flows with the .httpx scenario language, and runs those flows under a load profile. \
Responses are judged by out-of-process evaluator programs whose verdicts drive retries, \
request mutation, and flow control.",
    after_help = "Examples:\n  \
loadx convert curl https://api.example.com/users\n  \
loadx exec curl -X POST https://api.example.com/login -d '{\"user\":\"test\"}'\n  \
loadx run request.json\n  \
loadx scenario run journeys.httpx --scenario checkout --progress\n"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Translate a curl command line into a request record (JSON on stdout)
    Convert(CurlArgs),

    /// Translate a curl command line, execute it, and print the verdict
    Exec(CurlArgs),

    /// Execute a request record file
    Run(IrFileArgs),

    /// Validate a request record file against the schema
    Validate(IrFileArgs),

    /// Work with .httpx scenario files
    #[command(subcommand)]
    Scenario(ScenarioCommand),
}

#[derive(Debug, Args)]
pub struct CurlArgs {
    /// The curl command (the leading `curl` word is optional)
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true,
        value_name = "CURL"
    )]
    pub curl: Vec<String>,
}

#[derive(Debug, Args)]
pub struct IrFileArgs {
    /// Path to a request record (IR) JSON file
    pub file: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum ScenarioCommand {
    /// Parse and compile every scenario in the file, reporting errors
    Validate(ScenarioFileArgs),

    /// Compile one scenario and print the plan summary
    Compile(ScenarioSelectArgs),

    /// Compile and execute one scenario under its load profile
    Run(ScenarioRunArgs),
}

#[derive(Debug, Args)]
pub struct ScenarioFileArgs {
    /// Path to a .httpx scenario source file
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct ScenarioSelectArgs {
    /// Path to a .httpx scenario source file
    pub file: PathBuf,

    /// Scenario name when the file declares more than one
    #[arg(long)]
    pub scenario: Option<String>,
}

#[derive(Debug, Args)]
pub struct ScenarioRunArgs {
    /// Path to a .httpx scenario source file
    pub file: PathBuf,

    /// Scenario name when the file declares more than one
    #[arg(long)]
    pub scenario: Option<String>,

    /// Compile and print the plan without executing
    #[arg(long)]
    pub dry_run: bool,

    /// Print periodic progress lines while the run is active
    #[arg(long)]
    pub progress: bool,

    /// Per-request output and a per-VU breakdown in the summary
    #[arg(long, short)]
    pub verbose: bool,
}
