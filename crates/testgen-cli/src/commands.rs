use anyhow::{Context, Result, bail};
use testgen_core::TestSummary;
use testgen_pipeline::{Orchestrator, TestgenConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{Cli, Command, GenerateArgs, RepoArgs, SelectionArgs};

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = TestgenConfig::load(cli.config.as_deref())?;
    let orch = Orchestrator::new(
        config.build_provider(),
        config.build_llm_client(),
        config.orchestrator_settings(),
    );
    tracing::debug!(session = %orch.session_id(), "Session started");

    match cli.command {
        Command::Files { repo } => {
            let files = orch.load_files(&repo.repo, &repo.token).await?;
            if let Some(snapshot_repo) = orch.snapshot().await.repo {
                eprintln!(
                    "{} source files in {}",
                    files.len(),
                    config.github.repository_url(&snapshot_repo)
                );
            }
            for file in files {
                println!("{}", file.path);
            }
        }
        Command::Summarize(selection) => {
            let summaries = summarize(&orch, &selection).await?;
            print_numbered(&summaries);
        }
        Command::Generate(args) => {
            let code = generate(&orch, &args).await?;
            if args.out.is_none() {
                println!("{code}");
            }
        }
        Command::Run { generate: args, message } => {
            generate(&orch, &args).await?;
            let outcome = orch.publish(message).await?;
            eprintln!("Pushed branch {}", outcome.branch);
            println!("{}", outcome.pull_request_url);
        }
    }

    let metrics = orch.metrics();
    tracing::debug!(
        rejected = metrics.rejected,
        orphaned_branches = metrics.orphaned_branches,
        "Session finished"
    );
    Ok(())
}

async fn connect(orch: &Orchestrator, repo: &RepoArgs) -> Result<()> {
    orch.load_files(&repo.repo, &repo.token).await?;
    Ok(())
}

async fn summarize(orch: &Orchestrator, selection: &SelectionArgs) -> Result<Vec<TestSummary>> {
    connect(orch, &selection.repo).await?;
    orch.set_selection(selection.files.iter().map(String::as_str)).await?;
    Ok(orch.generate_summaries().await?)
}

/// Run through code generation and return the generated source.
async fn generate(orch: &Orchestrator, args: &GenerateArgs) -> Result<String> {
    let summaries = summarize(orch, &args.selection).await?;
    let chosen = match args.summary {
        Some(n) => pick(&summaries, n)?,
        None => prompt_for_summary(&summaries).await?,
    };
    orch.choose_summary(chosen).await?;
    orch.set_class_name(&args.class_name).await?;
    if let Some(filename) = &args.filename {
        orch.set_filename(filename).await?;
    }

    let artifact = orch.generate_code().await?;
    eprintln!("Generated {} ({})", artifact.suggested_filename, artifact.language);
    if let Some(out) = &args.out {
        tokio::fs::write(out, &artifact.source_text)
            .await
            .with_context(|| format!("failed to write {}", out.display()))?;
        eprintln!("Wrote {}", out.display());
    }
    Ok(artifact.source_text)
}

fn pick(summaries: &[TestSummary], n: usize) -> Result<&TestSummary> {
    if n == 0 || n > summaries.len() {
        bail!(
            "--summary {n} is out of range; the model proposed {} test cases",
            summaries.len()
        );
    }
    Ok(&summaries[n - 1])
}

fn print_numbered(summaries: &[TestSummary]) {
    for (i, summary) in summaries.iter().enumerate() {
        println!("{:>2}. {summary}", i + 1);
    }
}

async fn prompt_for_summary(summaries: &[TestSummary]) -> Result<&TestSummary> {
    let mut stderr = tokio::io::stderr();
    let mut listing = String::new();
    for (i, summary) in summaries.iter().enumerate() {
        listing.push_str(&format!("{:>2}. {summary}\n", i + 1));
    }
    stderr.write_all(listing.as_bytes()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stderr
            .write_all(format!("Choose a test case [1-{}]: ", summaries.len()).as_bytes())
            .await?;
        stderr.flush().await?;

        let Some(line) = lines.next_line().await? else {
            bail!("no test case chosen (stdin closed); pass --summary <n>");
        };
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=summaries.len()).contains(&n) => return Ok(&summaries[n - 1]),
            _ => stderr.write_all(b"Please enter one of the listed numbers.\n").await?,
        }
    }
}
