//! The three read-side stages: file listing, summary generation and code
//! generation. Each holds its collaborators and knows nothing about
//! session state; the orchestrator gates and records them.

use std::sync::Arc;

use testgen_core::{
    Credential, FileEntry, GenerationRequest, PipelineError, RepositoryRef, SelectionSet,
    SourceLanguage, TestSummary,
};

use crate::agent::CodeFile;
use crate::agent::summarizer::{SummarizeInput, SummaryAgent};
use crate::agent::test_writer::{TestCodeInput, TestWriterAgent};
use crate::llm::LlmClient;
use crate::provider::RepositoryProvider;

/// Fetch every path in order. The first failure aborts with `Fetch`.
async fn fetch_code_files<'a>(
    provider: &dyn RepositoryProvider,
    repo: &RepositoryRef,
    credential: &Credential,
    paths: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<CodeFile>, PipelineError> {
    let mut files = Vec::new();
    for path in paths {
        let content = provider
            .get_content(repo, credential, path)
            .await
            .map_err(|e| PipelineError::Fetch {
                path: path.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(repo = %repo, path = %path, bytes = content.len(), "Fetched file");
        files.push(CodeFile::new(path.clone(), content));
    }
    Ok(files)
}

pub struct FileLister {
    provider: Arc<dyn RepositoryProvider>,
}

impl FileLister {
    pub fn new(provider: Arc<dyn RepositoryProvider>) -> Self {
        Self { provider }
    }

    /// Source blobs from the repository tree, in provider order.
    pub async fn list_source_files(
        &self,
        repo: &RepositoryRef,
        credential: &Credential,
    ) -> Result<Vec<FileEntry>, PipelineError> {
        let entries = self.provider.list_files(repo, credential).await?;
        let total = entries.len();
        let files: Vec<FileEntry> = entries.into_iter().filter(FileEntry::is_source_file).collect();
        tracing::info!(repo = %repo, count = files.len(), total, "Listed source files");
        Ok(files)
    }
}

pub struct SummaryGenerator {
    provider: Arc<dyn RepositoryProvider>,
    llm: Arc<dyn LlmClient>,
    summary_count: usize,
    max_tokens: u32,
}

impl SummaryGenerator {
    pub fn new(
        provider: Arc<dyn RepositoryProvider>,
        llm: Arc<dyn LlmClient>,
        summary_count: usize,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            llm,
            summary_count,
            max_tokens,
        }
    }

    /// Fetch the selection, then ask the model once for summaries of all of it.
    pub async fn generate(
        &self,
        repo: &RepositoryRef,
        credential: &Credential,
        selection: &SelectionSet,
    ) -> Result<Vec<TestSummary>, PipelineError> {
        if selection.is_empty() {
            return Err(PipelineError::Validation("selection is empty".into()));
        }

        let code_files =
            fetch_code_files(self.provider.as_ref(), repo, credential, selection).await?;
        let agent =
            SummaryAgent::with_limits(self.llm.as_ref(), self.summary_count, self.max_tokens);
        let output = agent.summarize(&SummarizeInput { code_files }).await?;
        tracing::info!(
            repo = %repo,
            files = selection.len(),
            count = output.test_case_summaries.len(),
            "Generated test case summaries"
        );
        Ok(output.test_case_summaries)
    }
}

/// Test source produced by [`CodeGenerator`], before a filename is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub source_text: String,
    pub language: SourceLanguage,
}

pub struct CodeGenerator {
    provider: Arc<dyn RepositoryProvider>,
    llm: Arc<dyn LlmClient>,
    language: Option<SourceLanguage>,
    max_tokens: u32,
}

impl CodeGenerator {
    pub fn new(
        provider: Arc<dyn RepositoryProvider>,
        llm: Arc<dyn LlmClient>,
        language: Option<SourceLanguage>,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            llm,
            language,
            max_tokens,
        }
    }

    /// Configured language, else the dominant one among the context files.
    pub fn target_language(&self, context_files: &SelectionSet) -> Result<SourceLanguage, PipelineError> {
        self.language
            .or_else(|| SourceLanguage::dominant(context_files.iter().map(String::as_str)))
            .ok_or_else(|| {
                PipelineError::Validation(
                    "context files contain no recognised source language".into(),
                )
            })
    }

    /// Generate test code in `language`, normally from [`Self::target_language`].
    /// The request is checked before the first remote call.
    pub async fn generate(
        &self,
        repo: &RepositoryRef,
        credential: &Credential,
        request: &GenerationRequest,
        language: SourceLanguage,
    ) -> Result<GeneratedCode, PipelineError> {
        let class_name = request.class_name.trim();
        if class_name.is_empty() {
            return Err(PipelineError::Validation("class name is empty".into()));
        }
        if request.chosen_summary.trim().is_empty() {
            return Err(PipelineError::Validation("no test summary chosen".into()));
        }
        if request.context_files.is_empty() {
            return Err(PipelineError::Validation("no context files selected".into()));
        }

        let code_files =
            fetch_code_files(self.provider.as_ref(), repo, credential, &request.context_files)
                .await?;
        let input = TestCodeInput {
            code_files,
            test_case_summary: request.chosen_summary.clone(),
            class_name: class_name.to_string(),
            language,
        };
        let output = TestWriterAgent::with_max_tokens(self.llm.as_ref(), self.max_tokens)
            .write(&input)
            .await?;
        tracing::info!(
            repo = %repo,
            class = class_name,
            %language,
            bytes = output.test_code.len(),
            "Generated test code"
        );
        Ok(GeneratedCode {
            source_text: output.test_code,
            language,
        })
    }
}
