use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use testgen_core::{
    Credential, FileEntry, GeneratedArtifact, GenerationRequest, PipelineError, PipelineSnapshot,
    PipelineState, PublishOutcome, PublishRequest, RepositoryRef, SourceLanguage, StageInputs,
    StageKind, StageTicket, TestSummary,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::llm::LlmClient;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::provider::RepositoryProvider;
use crate::publish::{DEFAULT_BRANCH_PREFIX, DEFAULT_PR_BODY, PublishContext, Publisher};
use crate::stages::{CodeGenerator, FileLister, GeneratedCode, SummaryGenerator};

/// Tunables for one orchestrator. Built from `[llm]` and `[pipeline]` config.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub summary_count: usize,
    pub max_tokens: u32,
    pub language: Option<SourceLanguage>,
    pub branch_prefix: String,
    pub pr_body: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            summary_count: 5,
            max_tokens: 4096,
            language: None,
            branch_prefix: DEFAULT_BRANCH_PREFIX.into(),
            pr_body: DEFAULT_PR_BODY.into(),
        }
    }
}

/// Drives one pipeline session: list files, summarize, generate, publish.
///
/// Every stage follows the same shape. Under the state lock the stage is
/// gated and its inputs captured (`*Loading` entered); the lock is released
/// for the remote calls; it is taken again to record success or failure.
/// A second stage invoked while one is loading is refused with
/// `PreconditionError` instead of being queued.
pub struct Orchestrator {
    session_id: Uuid,
    lister: FileLister,
    summaries: SummaryGenerator,
    code: CodeGenerator,
    publisher: Publisher,
    metrics: Arc<PipelineMetrics>,
    state: Mutex<PipelineState>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn RepositoryProvider>,
        llm: Arc<dyn LlmClient>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            lister: FileLister::new(Arc::clone(&provider)),
            summaries: SummaryGenerator::new(
                Arc::clone(&provider),
                Arc::clone(&llm),
                settings.summary_count,
                settings.max_tokens,
            ),
            code: CodeGenerator::new(
                Arc::clone(&provider),
                llm,
                settings.language,
                settings.max_tokens,
            ),
            publisher: Publisher::new(provider)
                .with_branch_prefix(settings.branch_prefix)
                .with_pr_body(settings.pr_body),
            metrics: Arc::new(PipelineMetrics::new()),
            state: Mutex::new(PipelineState::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    /// Connect `repo` with `token` and list its source files.
    pub async fn load_files(&self, repo: &str, token: &str) -> Result<Vec<FileEntry>, PipelineError> {
        self.run_stage(
            StageKind::ListFiles,
            |state| {
                state.ensure_can_start(StageKind::ListFiles)?;
                let repo = RepositoryRef::parse(repo)?;
                let credential = Credential::new(token)?;
                state.begin_listing(repo, credential)
            },
            |inputs| async move {
                self.lister
                    .list_source_files(&inputs.repo, &inputs.credential)
                    .await
            },
            |state, ticket, files: Vec<FileEntry>| {
                state.complete_listing(ticket, files.clone())?;
                Ok(files)
            },
        )
        .await
    }

    pub async fn generate_summaries(&self) -> Result<Vec<TestSummary>, PipelineError> {
        self.run_stage(
            StageKind::Summaries,
            PipelineState::begin_summaries,
            |inputs| async move {
                self.summaries
                    .generate(&inputs.repo, &inputs.credential, &inputs.payload)
                    .await
            },
            |state, ticket, summaries: Vec<TestSummary>| {
                state.complete_summaries(ticket, summaries.clone())?;
                Ok(summaries)
            },
        )
        .await
    }

    /// Generate code from the session's selection, chosen summary and class name.
    pub async fn generate_code(&self) -> Result<GeneratedArtifact, PipelineError> {
        self.run_stage(
            StageKind::Code,
            |state| {
                let request = state.generation_request();
                self.begin_code(state, request)
            },
            |inputs| self.code_work(inputs),
            complete_code,
        )
        .await
    }

    /// Generate code for an explicit request instead of the session inputs.
    pub async fn generate_code_with(
        &self,
        request: GenerationRequest,
    ) -> Result<GeneratedArtifact, PipelineError> {
        self.run_stage(
            StageKind::Code,
            |state| self.begin_code(state, request),
            |inputs| self.code_work(inputs),
            complete_code,
        )
        .await
    }

    /// Check the request and resolve the target language before the stage
    /// starts, so bad input leaves the session where it was.
    fn begin_code(
        &self,
        state: &mut PipelineState,
        request: GenerationRequest,
    ) -> Result<StageInputs<(GenerationRequest, SourceLanguage)>, PipelineError> {
        state.check_code_request(&request)?;
        let language = self.code.target_language(&request.context_files)?;
        let inputs = state.begin_code(request)?;
        Ok(StageInputs {
            ticket: inputs.ticket,
            repo: inputs.repo,
            credential: inputs.credential,
            payload: (inputs.payload, language),
        })
    }

    async fn code_work(
        &self,
        inputs: StageInputs<(GenerationRequest, SourceLanguage)>,
    ) -> Result<GeneratedCode, PipelineError> {
        let (request, language) = &inputs.payload;
        self.code
            .generate(&inputs.repo, &inputs.credential, request, *language)
            .await
    }

    /// Commit the generated code to a new branch and open a pull request.
    /// `None` uses the default commit message for the class.
    pub async fn publish(
        &self,
        commit_message: Option<String>,
    ) -> Result<PublishOutcome, PipelineError> {
        self.run_stage(
            StageKind::Publish,
            |state| {
                let inputs = state.begin_publish(commit_message)?;
                let context = PublishContext {
                    class_name: state.class_name().to_string(),
                    summary: state.chosen_summary().unwrap_or_default().to_string(),
                };
                Ok(StageInputs {
                    ticket: inputs.ticket,
                    repo: inputs.repo,
                    credential: inputs.credential,
                    payload: (inputs.payload, context),
                })
            },
            |inputs: StageInputs<(PublishRequest, PublishContext)>| async move {
                let (request, context) = &inputs.payload;
                self.publisher
                    .publish(&inputs.repo, &inputs.credential, request, context)
                    .await
            },
            |state, ticket, outcome: PublishOutcome| {
                state.complete_publish(ticket, outcome.clone())?;
                Ok(outcome)
            },
        )
        .await
    }

    async fn run_stage<P, T, R, Fut>(
        &self,
        kind: StageKind,
        begin: impl FnOnce(&mut PipelineState) -> Result<StageInputs<P>, PipelineError>,
        work: impl FnOnce(StageInputs<P>) -> Fut,
        complete: impl FnOnce(&mut PipelineState, StageTicket, T) -> Result<R, PipelineError>,
    ) -> Result<R, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let inputs = {
            let mut state = self.state.lock().await;
            match begin(&mut *state) {
                Ok(inputs) => inputs,
                Err(err) => {
                    self.metrics.record_rejected();
                    tracing::warn!(
                        session = %self.session_id,
                        stage = %kind,
                        current = %state.stage(),
                        kind = %err.kind(),
                        error = %err,
                        "Stage rejected"
                    );
                    return Err(err);
                }
            }
        };

        let ticket = inputs.ticket;
        self.metrics.record_stage_started(kind);
        tracing::info!(session = %self.session_id, stage = %kind, repo = %inputs.repo, "Stage started");

        let started = Instant::now();
        let result = work(inputs).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut state = self.state.lock().await;
        match result {
            Ok(value) => {
                let output = complete(&mut *state, ticket, value).inspect_err(|err| {
                    tracing::warn!(session = %self.session_id, stage = %kind, error = %err, "Stage result discarded");
                })?;
                self.metrics.record_stage_succeeded(kind, elapsed_ms);
                tracing::info!(
                    session = %self.session_id,
                    stage = %kind,
                    to = %kind.loaded_stage(),
                    elapsed_ms,
                    "Stage succeeded"
                );
                Ok(output)
            }
            Err(err) => {
                self.metrics.record_stage_failed(kind);
                if err.orphaned_branch().is_some() {
                    self.metrics.record_orphaned_branch();
                }
                if let Err(stale) = state.fail(ticket, &err) {
                    tracing::debug!(session = %self.session_id, stage = %kind, reason = %stale, "Failure not recorded");
                }
                tracing::warn!(
                    session = %self.session_id,
                    stage = %kind,
                    kind = %err.kind(),
                    error = %err,
                    elapsed_ms,
                    "Stage failed"
                );
                Err(err)
            }
        }
    }

    // ── Session inputs ───────────────────────────────────────────────────────

    async fn input<R>(
        &self,
        command: &str,
        f: impl FnOnce(&mut PipelineState) -> Result<R, PipelineError>,
    ) -> Result<R, PipelineError> {
        let mut state = self.state.lock().await;
        f(&mut *state).inspect_err(|err| {
            self.metrics.record_rejected();
            tracing::debug!(session = %self.session_id, command, error = %err, "Input rejected");
        })
    }

    pub async fn select_file(&self, path: &str) -> Result<(), PipelineError> {
        self.input("select_file", |s| s.select_file(path)).await
    }

    pub async fn deselect_file(&self, path: &str) -> Result<(), PipelineError> {
        self.input("deselect_file", |s| s.deselect_file(path)).await
    }

    pub async fn set_selection<I, S>(&self, paths: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input("set_selection", |s| s.set_selection(paths)).await
    }

    pub async fn choose_summary(&self, summary: &str) -> Result<(), PipelineError> {
        self.input("choose_summary", |s| s.choose_summary(summary)).await
    }

    pub async fn set_class_name(&self, class_name: &str) -> Result<(), PipelineError> {
        self.input("set_class_name", |s| s.set_class_name(class_name)).await
    }

    pub async fn set_filename(&self, filename: &str) -> Result<(), PipelineError> {
        self.input("set_filename", |s| s.set_filename(filename)).await
    }

    // ── Recovery and inspection ──────────────────────────────────────────────

    /// Discard the session and return to `Initial`. Refused with
    /// `PreconditionError` while a stage is in flight.
    pub async fn reset(&self) -> Result<(), PipelineError> {
        self.input("reset", PipelineState::reset).await?;
        tracing::info!(session = %self.session_id, "Session reset");
        Ok(())
    }

    /// Leave `Error` for `FilesLoaded`, keeping the listed files and selection.
    pub async fn resume_from_files(&self) -> Result<(), PipelineError> {
        self.input("resume_from_files", PipelineState::resume_from_files)
            .await?;
        tracing::info!(session = %self.session_id, "Resumed from listed files");
        Ok(())
    }

    pub async fn snapshot(&self) -> PipelineSnapshot {
        self.state.lock().await.snapshot()
    }
}

fn complete_code(
    state: &mut PipelineState,
    ticket: StageTicket,
    code: GeneratedCode,
) -> Result<GeneratedArtifact, PipelineError> {
    state.complete_code(ticket, code.source_text, code.language)
}
