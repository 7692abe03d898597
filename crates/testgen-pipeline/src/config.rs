use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use testgen_core::{PipelineError, RepositoryRef, SourceLanguage};

use crate::github::{DEFAULT_API_URL, GitHubProvider};
use crate::llm::{LlmClient, OpenAiCompatibleClient, StubLlmClient};
use crate::orchestrator::OrchestratorSettings;
use crate::provider::RepositoryProvider;
use crate::publish::{DEFAULT_BRANCH_PREFIX, DEFAULT_PR_BODY};

pub const CONFIG_FILE_NAME: &str = "testgen.toml";
pub const API_KEY_ENV: &str = "TESTGEN_LLM_API_KEY";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestgenConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub enum LlmProvider {
    #[default]
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
    #[serde(rename = "stub")]
    Stub,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitHubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_web_url")]
    pub web_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            web_url: default_web_url(),
        }
    }
}

impl GitHubConfig {
    /// Browser URL of a repository.
    pub fn repository_url(&self, repo: &RepositoryRef) -> String {
        format!("{}/{}/{}", self.web_url.trim_end_matches('/'), repo.owner, repo.name)
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}
fn default_web_url() -> String {
    "https://github.com".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_summary_count")]
    pub summary_count: usize,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_pr_body")]
    pub pr_body: String,
    /// Pin the test language instead of inferring it from the context files.
    pub language: Option<SourceLanguage>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            summary_count: default_summary_count(),
            branch_prefix: default_branch_prefix(),
            pr_body: default_pr_body(),
            language: None,
        }
    }
}

fn default_summary_count() -> usize {
    5
}
fn default_branch_prefix() -> String {
    DEFAULT_BRANCH_PREFIX.into()
}
fn default_pr_body() -> String {
    DEFAULT_PR_BODY.into()
}

impl TestgenConfig {
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            PipelineError::Config(msg) => PipelineError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, PipelineError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// `explicit` if given (it must exist), else `./testgen.toml`, else the
    /// per-user config directory. Defaults when nothing is found.
    pub fn load(explicit: Option<&Path>) -> Result<Self, PipelineError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::discover() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading config");
                Self::from_file(&path)
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("testgen").join(CONFIG_FILE_NAME))
            .filter(|path| path.is_file())
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.pipeline.summary_count == 0 {
            return Err(PipelineError::Config(
                "pipeline.summary_count must be at least 1".into(),
            ));
        }
        if self.llm.max_tokens == 0 {
            return Err(PipelineError::Config("llm.max_tokens must be at least 1".into()));
        }
        Ok(())
    }

    pub fn build_llm_client(&self) -> Arc<dyn LlmClient> {
        match self.llm.provider {
            LlmProvider::OpenAiCompatible => {
                let api_key = std::env::var(API_KEY_ENV)
                    .ok()
                    .filter(|k| !k.trim().is_empty())
                    .or_else(|| self.llm.api_key.clone());
                Arc::new(OpenAiCompatibleClient::new(
                    self.llm.base_url.clone(),
                    self.llm.model.clone(),
                    api_key,
                ))
            }
            // One summary reply then one code reply, cycling.
            LlmProvider::Stub => Arc::new(StubLlmClient::new(vec![
                r#"{"test_case_summaries": ["stub test case"]}"#.into(),
                r#"{"test_code": "// stub test"}"#.into(),
            ])),
        }
    }

    pub fn build_provider(&self) -> Arc<dyn RepositoryProvider> {
        Arc::new(GitHubProvider::new(self.github.api_url.clone()))
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            summary_count: self.pipeline.summary_count,
            max_tokens: self.llm.max_tokens,
            language: self.pipeline.language,
            branch_prefix: self.pipeline.branch_prefix.clone(),
            pr_body: self.pipeline.pr_body.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_uses_defaults() {
        let config = TestgenConfig::from_toml("").unwrap();
        assert_eq!(config.llm.provider, LlmProvider::OpenAiCompatible);
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.pipeline.summary_count, 5);
        assert_eq!(config.pipeline.branch_prefix, "testgen");
        assert!(config.pipeline.language.is_none());
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
[llm]
provider = "openai-compatible"
base_url = "http://localhost:11434/v1"
model = "llama3"
api_key = "sk-test"
max_tokens = 8192

[github]
api_url = "https://ghe.example.com/api/v3"
web_url = "https://ghe.example.com"

[pipeline]
summary_count = 8
branch_prefix = "bots/tests"
pr_body = "Tests {class_name}"
language = "java"
"#;
        let config = TestgenConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.llm.api_key, Some("sk-test".into()));
        assert_eq!(config.llm.max_tokens, 8192);
        assert_eq!(config.github.web_url, "https://ghe.example.com");
        let repo = RepositoryRef::parse("acme/widgets").unwrap();
        assert_eq!(
            config.github.repository_url(&repo),
            "https://ghe.example.com/acme/widgets"
        );
        assert_eq!(config.pipeline.language, Some(SourceLanguage::Java));

        let settings = config.orchestrator_settings();
        assert_eq!(settings.summary_count, 8);
        assert_eq!(settings.branch_prefix, "bots/tests");
        assert_eq!(settings.pr_body, "Tests {class_name}");
    }

    #[test]
    fn parses_stub_provider() {
        let config = TestgenConfig::from_toml("[llm]\nprovider = \"stub\"\n").unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Stub);
    }

    #[test]
    fn rejects_unknown_provider_and_zero_counts() {
        let err = TestgenConfig::from_toml("[llm]\nprovider = \"carrier-pigeon\"\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = TestgenConfig::from_toml("[pipeline]\nsummary_count = 0\n").unwrap_err();
        assert!(err.to_string().contains("summary_count"));
    }

    #[test]
    fn rejects_unknown_section() {
        assert!(TestgenConfig::from_toml("[registry]\nurl = \"x\"\n").is_err());
    }

    #[test]
    fn rejects_misspelled_key() {
        let err = TestgenConfig::from_toml("[pipeline]\nsumary_count = 3\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn loads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nbranch_prefix = \"from-file\"").unwrap();
        let config = TestgenConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.pipeline.branch_prefix, "from-file");
    }

    #[test]
    fn missing_explicit_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TestgenConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn stub_provider_replies_parse() {
        let config = TestgenConfig::from_toml("[llm]\nprovider = \"stub\"\n").unwrap();
        let llm = config.build_llm_client();
        let request = crate::llm::LlmRequest {
            system_prompt: String::new(),
            messages: vec![],
            max_tokens: 16,
            json_output: true,
        };
        let first = llm.chat(&request).await.unwrap();
        assert!(first.content.contains("test_case_summaries"));
        let second = llm.chat(&request).await.unwrap();
        assert!(second.content.contains("test_code"));
    }
}
