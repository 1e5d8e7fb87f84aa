use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cli-replay",
    version,
    about = "Deterministic interception and replay of CLI tools for shell-script testing"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a command with interception active, then verify the scenario
    Exec(ExecArgs),
    /// Print eval-style shell setup for interactive or scripted sessions
    Run(RunArgs),
    /// Check a session's progress against its scenario
    Verify(VerifyArgs),
    /// Validate scenario files without running anything
    Validate(ValidateArgs),
    /// Remove session state and intercept directories
    Clean(CleanArgs),
    /// Record real invocations and synthesize a scenario
    Record(RecordArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExecArgs {
    pub scenario: PathBuf,

    /// Restrict interception to these command names (comma separated);
    /// intersects with the scenario's own allowlist
    #[arg(long, value_delimiter = ',')]
    pub allowed_commands: Option<Vec<String>>,

    /// Verification report format (text on stderr is always emitted)
    #[arg(long, value_enum)]
    pub format: Option<ReportFormat>,

    /// Write the structured report here instead of stdout
    #[arg(long)]
    pub report_file: Option<PathBuf>,

    /// Validate and print the plan without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Child command to run with interception active
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    pub scenario: PathBuf,

    #[arg(long, value_delimiter = ',')]
    pub allowed_commands: Option<Vec<String>>,

    #[arg(long, value_enum, default_value_t = ShellKind::Bash)]
    pub shell: ShellKind,

    /// Validate and print the plan without creating anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(long, value_enum, default_value_t = VerifyFormat::Text)]
    pub format: VerifyFormat,

    /// Session id; defaults to CLI_REPLAY_SESSION
    #[arg(long)]
    pub session: Option<String>,

    pub scenario: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long, value_enum, default_value_t = ValidateFormat::Text)]
    pub format: ValidateFormat,

    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CleanArgs {
    /// Only remove sessions older than this duration (e.g. "30m")
    #[arg(long)]
    pub ttl: Option<String>,

    /// Treat the argument as a tree root and sweep every directory in it
    #[arg(long)]
    pub recursive: bool,

    /// Scenario file, or tree root with --recursive
    pub target: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RecordArgs {
    /// Scenario YAML to write
    #[arg(long)]
    pub output: PathBuf,

    /// Command name to record (repeatable)
    #[arg(long = "command", required = true)]
    pub commands: Vec<String>,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// Child command to run with recording shims active
    #[arg(last = true, required = true)]
    pub child: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Json,
    Junit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VerifyFormat {
    Text,
    Json,
    Junit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShellKind {
    Bash,
    Powershell,
    Cmd,
}
