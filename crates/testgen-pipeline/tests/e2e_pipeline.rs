//! End-to-end pipeline tests against real GitHub and a real model service.
//!
//! Skipped by default. The publish test opens a real pull request.
//!
//! ## Prerequisites
//! - `GITHUB_TOKEN` with `repo` scope on `TESTGEN_E2E_REPO` (`owner/name`)
//! - `TESTGEN_LLM_API_KEY` for the OpenAI-compatible endpoint in `testgen.toml`
//!
//! ## Run
//! ```bash
//! cargo test -p testgen-pipeline --test e2e_pipeline -- --ignored --nocapture
//! ```

use testgen_core::{RepositoryRef, Stage};
use testgen_pipeline::{Orchestrator, TestgenConfig};

fn env(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set for e2e tests"))
}

fn orchestrator() -> Orchestrator {
    let config = TestgenConfig::load(None).expect("config");
    Orchestrator::new(
        config.build_provider(),
        config.build_llm_client(),
        config.orchestrator_settings(),
    )
}

#[tokio::test]
#[ignore]
async fn e2e_lists_and_summarizes() {
    let orch = orchestrator();
    let files = orch
        .load_files(&env("TESTGEN_E2E_REPO"), &env("GITHUB_TOKEN"))
        .await
        .expect("listing should succeed");
    assert!(!files.is_empty(), "repository has no recognised source files");

    orch.select_file(&files[0].path).await.unwrap();
    let summaries = orch.generate_summaries().await.expect("summaries");
    assert!(!summaries.is_empty());
    assert!(summaries.iter().all(|s| !s.trim().is_empty()));
}

#[tokio::test]
#[ignore]
async fn e2e_full_pipeline_opens_pull_request() {
    let orch = orchestrator();
    let repo = env("TESTGEN_E2E_REPO");
    let files = orch.load_files(&repo, &env("GITHUB_TOKEN")).await.unwrap();
    let target = &files[0].path;
    orch.select_file(target).await.unwrap();

    let summaries = orch.generate_summaries().await.unwrap();
    orch.choose_summary(&summaries[0]).await.unwrap();

    let stem = target.rsplit('/').next().unwrap_or(target);
    let class_name = stem.split('.').next().unwrap_or(stem);
    orch.set_class_name(class_name).await.unwrap();
    let artifact = orch.generate_code().await.unwrap();
    assert!(!artifact.source_text.trim().is_empty());

    let outcome = orch.publish(None).await.unwrap();
    let full_name = RepositoryRef::parse(&repo).unwrap().full_name();
    assert!(
        outcome.pull_request_url.contains(&format!("/{full_name}/pull/")),
        "unexpected url {}",
        outcome.pull_request_url
    );
    assert_eq!(orch.snapshot().await.stage, Stage::Published);
    println!("Opened {} from {}", outcome.pull_request_url, outcome.branch);
}
