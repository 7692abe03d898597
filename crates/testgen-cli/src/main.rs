use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use testgen_core::PipelineError;
use tracing_subscriber::{EnvFilter, fmt};

mod commands;

#[derive(Parser)]
#[command(name = "testgen", version)]
#[command(about = "testgen: propose, generate and publish unit tests for a GitHub repository")]
struct Cli {
    /// Config file (default: ./testgen.toml, then the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Args)]
struct RepoArgs {
    /// Repository as `owner/name` or a GitHub URL
    #[arg(long)]
    repo: String,

    /// GitHub token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,
}

#[derive(Args)]
struct SelectionArgs {
    #[command(flatten)]
    repo: RepoArgs,

    /// Source file to use as context (repeatable)
    #[arg(long = "file", required = true)]
    files: Vec<String>,
}

#[derive(Args)]
struct GenerateArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// 1-based number of the test case summary to implement (prompts if omitted)
    #[arg(long)]
    summary: Option<usize>,

    /// Name of the class under test
    #[arg(long = "class")]
    class_name: String,

    /// Target filename (default: `<Class>Test.<ext>`)
    #[arg(long)]
    filename: Option<String>,

    /// Also write the generated code to this path
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// List the repository's source files
    Files {
        #[command(flatten)]
        repo: RepoArgs,
    },

    /// Propose test case summaries for the selected files
    Summarize(SelectionArgs),

    /// Generate test code for one summary
    Generate(GenerateArgs),

    /// Generate test code, commit it to a new branch and open a pull request
    Run {
        #[command(flatten)]
        generate: GenerateArgs,

        /// Commit message and PR title (default: `Add test case for <Class>`)
        #[arg(long)]
        message: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    // stderr only; stdout carries command output
    let builder = fmt()
        .with_env_filter(EnvFilter::from_env("TESTGEN_LOG"))
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<PipelineError>() {
        Some(pipeline_err) => {
            eprintln!("error [{}]: {pipeline_err}", pipeline_err.kind());
            if let Some(branch) = pipeline_err.orphaned_branch() {
                eprintln!(
                    "warning: branch `{branch}` already exists on the remote; delete it before retrying to avoid duplicates"
                );
            }
        }
        None => eprintln!("error: {err:#}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Err(err) = commands::run(cli).await {
        report(&err);
        std::process::exit(1);
    }
    Ok(())
}
