use serde::{Deserialize, Serialize};
use testgen_core::{PipelineError, TestSummary};

use super::{CodeFile, extract_json, render_code_files};
use crate::llm::{LlmClient, LlmMessage, LlmRequest};

const SUMMARIZER_PROMPT: &str = r#"You are a test case designer. You will receive a set of source files and propose test cases for them.

Each test case must be a single sentence describing one behavior to verify. Cover normal behavior, edge cases and error handling. Do not write any test code.

Output ONLY valid JSON in this exact format:
{
  "test_case_summaries": [
    "one-sentence description of a test case",
    "another one-sentence description"
  ]
}

Do not include any text outside the JSON object."#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeInput {
    pub code_files: Vec<CodeFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizeOutput {
    #[serde(alias = "testCaseSummaries")]
    pub test_case_summaries: Vec<TestSummary>,
}

impl SummarizeOutput {
    /// Reject an empty list or blank entries. Entries are never dropped.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.test_case_summaries.is_empty() {
            return Err(PipelineError::Generation(
                "model returned no test case summaries".into(),
            ));
        }
        if let Some(i) = self
            .test_case_summaries
            .iter()
            .position(|s| s.trim().is_empty())
        {
            return Err(PipelineError::Generation(format!(
                "test case summary #{} is blank",
                i + 1
            )));
        }
        Ok(())
    }
}

/// Proposes one-sentence test case summaries for a set of source files.
pub struct SummaryAgent<'a> {
    llm: &'a dyn LlmClient,
    summary_count: usize,
    max_tokens: u32,
}

impl<'a> SummaryAgent<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self {
            llm,
            summary_count: 5,
            max_tokens: 4096,
        }
    }

    pub fn with_limits(llm: &'a dyn LlmClient, summary_count: usize, max_tokens: u32) -> Self {
        Self {
            llm,
            summary_count,
            max_tokens,
        }
    }

    fn request(&self, input: &SummarizeInput) -> LlmRequest {
        let content = format!(
            "Propose about {} test cases for these files.\n\n{}",
            self.summary_count,
            render_code_files(&input.code_files),
        );
        LlmRequest {
            system_prompt: SUMMARIZER_PROMPT.into(),
            messages: vec![LlmMessage::user(content)],
            max_tokens: self.max_tokens,
            json_output: true,
        }
    }

    /// One model call for the whole file set.
    pub async fn summarize(&self, input: &SummarizeInput) -> Result<SummarizeOutput, PipelineError> {
        let response = self.llm.chat(&self.request(input)).await?;
        let output = parse_summaries(&response.content)?;
        output.validate()?;
        tracing::debug!(count = output.test_case_summaries.len(), "Parsed test case summaries");
        Ok(output)
    }
}

fn parse_summaries(raw: &str) -> Result<SummarizeOutput, PipelineError> {
    if let Some(output) = extract_json::<SummarizeOutput>(raw) {
        return Ok(output);
    }
    // Some models answer with the bare array.
    if let Ok(list) = serde_json::from_str::<Vec<TestSummary>>(raw.trim()) {
        return Ok(SummarizeOutput {
            test_case_summaries: list,
        });
    }
    Err(PipelineError::Generation(format!(
        "model reply is not a list of test case summaries: {}",
        raw.chars().take(200).collect::<String>()
    )))
}
