use serde::{Deserialize, Serialize};
use testgen_core::{PipelineError, SourceLanguage};

use super::{CodeFile, extract_json, last_fenced_block, render_code_files, strip_think_blocks, unwrap_code_fence};
use crate::llm::{LlmClient, LlmMessage, LlmRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCodeInput {
    pub code_files: Vec<CodeFile>,
    pub test_case_summary: String,
    pub class_name: String,
    pub language: SourceLanguage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCodeOutput {
    #[serde(alias = "testCode")]
    pub test_code: String,
}

impl TestCodeOutput {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.test_code.trim().is_empty() {
            return Err(PipelineError::Generation("model returned empty test code".into()));
        }
        Ok(())
    }
}

fn system_prompt(language: SourceLanguage) -> String {
    format!(
        r#"You are a {framework} test code generator for {language} projects. Given source files, a class name and a test case summary, write a complete test file for that class which verifies the described test case.

The test file must compile as-is: include every import, a test class or suite named after the class under test, and no placeholders.

Output ONLY valid JSON in this exact format:
{{
  "test_code": "full contents of the test file"
}}

Do not include any text outside the JSON object. Do not wrap the code in markdown fences."#,
        framework = language.test_framework(),
    )
}

/// Writes test code for one chosen test case summary.
pub struct TestWriterAgent<'a> {
    llm: &'a dyn LlmClient,
    max_tokens: u32,
}

impl<'a> TestWriterAgent<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self {
            llm,
            max_tokens: 4096,
        }
    }

    pub fn with_max_tokens(llm: &'a dyn LlmClient, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    fn request(&self, input: &TestCodeInput) -> LlmRequest {
        let content = format!(
            "Code files:\n\n{files}\nClass name:\n{class}\n\nTest case summary:\n{summary}\n",
            files = render_code_files(&input.code_files),
            class = input.class_name,
            summary = input.test_case_summary,
        );
        LlmRequest {
            system_prompt: system_prompt(input.language),
            messages: vec![LlmMessage::user(content)],
            max_tokens: self.max_tokens,
            json_output: true,
        }
    }

    pub async fn write(&self, input: &TestCodeInput) -> Result<TestCodeOutput, PipelineError> {
        let response = self.llm.chat(&self.request(input)).await?;
        let output = parse_test_code(&response.content, input.language)?;
        output.validate()?;
        Ok(output)
    }
}

fn parse_test_code(raw: &str, language: SourceLanguage) -> Result<TestCodeOutput, PipelineError> {
    if let Some(output) = extract_json::<TestCodeOutput>(raw) {
        return Ok(TestCodeOutput {
            test_code: unwrap_code_fence(&output.test_code).to_string(),
        });
    }

    // Plain fenced code instead of the JSON envelope.
    let cleaned = strip_think_blocks(raw);
    if let Some(code) = last_fenced_block(&cleaned, |body| !body.is_empty()) {
        tracing::warn!(%language, "Model reply was not JSON, using fenced code block");
        return Ok(TestCodeOutput {
            test_code: code.to_string(),
        });
    }

    Err(PipelineError::Generation(format!(
        "model reply does not contain test code: {}",
        raw.chars().take(200).collect::<String>()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubLlmClient;

    fn input() -> TestCodeInput {
        TestCodeInput {
            code_files: vec![CodeFile::new(
                "src/main/java/Calculator.java",
                "public class Calculator { int add(int a, int b) { return a + b; } }",
            )],
            test_case_summary: "adds two positive numbers".into(),
            class_name: "Calculator".into(),
            language: SourceLanguage::Java,
        }
    }

    #[tokio::test]
    async fn writes_code_from_json_reply() {
        let reply = serde_json::json!({
            "test_code": "import org.junit.jupiter.api.Test;\nclass CalculatorTest {}"
        });
        let client = StubLlmClient::constant(&reply.to_string());
        let output = TestWriterAgent::new(&client).write(&input()).await.unwrap();
        assert!(output.test_code.starts_with("import org.junit"));
    }

    #[tokio::test]
    async fn prompt_names_framework_class_and_summary() {
        let client = StubLlmClient::constant(r#"{"test_code": "class CalculatorTest {}"}"#);
        TestWriterAgent::new(&client).write(&input()).await.unwrap();

        let request = &client.requests()[0];
        assert!(request.system_prompt.contains("JUnit 5"));
        let user = &request.messages[0].content;
        assert!(user.contains("Calculator.java"));
        assert!(user.contains("Class name:\nCalculator"));
        assert!(user.contains("adds two positive numbers"));
    }

    #[tokio::test]
    async fn strips_fence_inside_json_field() {
        let reply = serde_json::json!({ "test_code": "```java\nclass CalculatorTest {}\n```" });
        let client = StubLlmClient::constant(&reply.to_string());
        let output = TestWriterAgent::new(&client).write(&input()).await.unwrap();
        assert_eq!(output.test_code, "class CalculatorTest {}");
    }

    #[tokio::test]
    async fn falls_back_to_fenced_code() {
        let client =
            StubLlmClient::constant("Here you go:\n```java\nclass CalculatorTest {}\n```\n");
        let output = TestWriterAgent::new(&client).write(&input()).await.unwrap();
        assert_eq!(output.test_code, "class CalculatorTest {}");
    }

    #[tokio::test]
    async fn empty_code_is_generation_error() {
        let client = StubLlmClient::constant(r#"{"test_code": "   "}"#);
        let err = TestWriterAgent::new(&client).write(&input()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
    }

    #[tokio::test]
    async fn prose_only_is_generation_error() {
        let client = StubLlmClient::constant("Sorry, I cannot help with that.");
        let err = TestWriterAgent::new(&client).write(&input()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let client = StubLlmClient::failing("503 from model service");
        let err = TestWriterAgent::new(&client).write(&input()).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
