use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Blob,
    Tree,
}

/// One entry of a repository file tree, as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub kind: EntryKind,
}

impl FileEntry {
    pub fn blob(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Blob,
        }
    }

    pub fn tree(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Tree,
        }
    }

    /// A blob whose extension is in the recognized source allow-list.
    pub fn is_source_file(&self) -> bool {
        self.kind == EntryKind::Blob && SourceLanguage::from_path(&self.path).is_some()
    }
}

/// Languages whose source files are exposed to later stages.
///
/// Declaration order doubles as the tie-break order when picking the
/// target language of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLanguage {
    Java,
    TypeScript,
    Tsx,
    JavaScript,
    Python,
}

impl SourceLanguage {
    pub const ALL: [SourceLanguage; 5] = [
        Self::Java,
        Self::TypeScript,
        Self::Tsx,
        Self::JavaScript,
        Self::Python,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::TypeScript => "ts",
            Self::Tsx => "tsx",
            Self::JavaScript => "js",
            Self::Python => "py",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|lang| lang.extension() == ext)
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let (stem, ext) = file_name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Self::from_extension(ext)
    }

    /// Test framework named in the code-generation prompt.
    pub fn test_framework(self) -> &'static str {
        match self {
            Self::Java => "JUnit 5",
            Self::TypeScript | Self::Tsx | Self::JavaScript => "Jest",
            Self::Python => "pytest",
        }
    }

    /// Most frequent language among `paths`; ties go to declaration order.
    pub fn dominant<'a>(paths: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut counts = [0usize; 5];
        for path in paths {
            if let Some(lang) = Self::from_path(path) {
                counts[lang as usize] += 1;
            }
        }
        Self::ALL
            .into_iter()
            .filter(|lang| counts[*lang as usize] > 0)
            .max_by(|a, b| {
                counts[*a as usize]
                    .cmp(&counts[*b as usize])
                    .then_with(|| b.cmp(a))
            })
    }
}

impl std::fmt::Display for SourceLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Java => "Java",
            Self::TypeScript => "TypeScript",
            Self::Tsx => "TypeScript (TSX)",
            Self::JavaScript => "JavaScript",
            Self::Python => "Python",
        };
        f.write_str(name)
    }
}

/// User-chosen subset of listed source paths. Iteration order is sorted.
pub type SelectionSet = BTreeSet<String>;

/// A one-sentence description of a single test case.
pub type TestSummary = String;

/// Input to the code generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub context_files: SelectionSet,
    pub chosen_summary: TestSummary,
    pub class_name: String,
}

impl GenerationRequest {
    /// Check the request against the summaries returned by the last generation.
    pub fn validate(&self, summaries: &[TestSummary]) -> Result<(), PipelineError> {
        if self.class_name.trim().is_empty() {
            return Err(PipelineError::Validation("class name is empty".into()));
        }
        if self.chosen_summary.trim().is_empty() {
            return Err(PipelineError::Validation("no test summary chosen".into()));
        }
        if !summaries.iter().any(|s| s == &self.chosen_summary) {
            return Err(PipelineError::Validation(format!(
                "summary `{}` is not in the current summary set",
                self.chosen_summary
            )));
        }
        if self.context_files.is_empty() {
            return Err(PipelineError::Validation("no context files selected".into()));
        }
        Ok(())
    }
}

/// Generated test source plus the filename it should be committed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub source_text: String,
    pub suggested_filename: String,
    pub language: SourceLanguage,
}

/// Default test filename for a class: `<ClassName>Test.<ext>`.
pub fn default_test_filename(class_name: &str, language: SourceLanguage) -> String {
    format!("{}Test.{}", class_name.trim(), language.extension())
}

/// What the publisher commits and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub filename: String,
    pub content: String,
    pub commit_message: String,
}

impl PublishRequest {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.filename.trim().is_empty() {
            return Err(PipelineError::Validation("target filename is empty".into()));
        }
        if self.content.is_empty() {
            return Err(PipelineError::Validation("content to publish is empty".into()));
        }
        Ok(())
    }
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub pull_request_url: String,
    pub branch: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_allow_listed_extensions() {
        assert!(FileEntry::blob("src/Calculator.java").is_source_file());
        assert!(FileEntry::blob("web/App.tsx").is_source_file());
        assert!(FileEntry::blob("lib/util.js").is_source_file());
        assert!(FileEntry::blob("pkg/mod.py").is_source_file());
        assert!(!FileEntry::blob("README.md").is_source_file());
        assert!(!FileEntry::blob("src/.ts").is_source_file());
        assert!(!FileEntry::blob("Makefile").is_source_file());
        assert!(!FileEntry::tree("src.java").is_source_file());
    }

    #[test]
    fn dominant_language_prefers_majority_then_declaration_order() {
        let paths = ["a/Widget.ts", "a/Panel.ts", "a/Main.java"];
        assert_eq!(
            SourceLanguage::dominant(paths.iter().copied()),
            Some(SourceLanguage::TypeScript)
        );

        let tie = ["x.py", "Y.java"];
        assert_eq!(
            SourceLanguage::dominant(tie.iter().copied()),
            Some(SourceLanguage::Java)
        );

        let none = ["README.md"];
        assert_eq!(SourceLanguage::dominant(none.iter().copied()), None);
    }

    #[test]
    fn default_filename_follows_class_name() {
        assert_eq!(
            default_test_filename("Calculator", SourceLanguage::Java),
            "CalculatorTest.java"
        );
        assert_eq!(
            default_test_filename("Widget", SourceLanguage::TypeScript),
            "WidgetTest.ts"
        );
    }

    fn request(summary: &str, class_name: &str) -> GenerationRequest {
        GenerationRequest {
            context_files: ["src/Widget.ts".to_string()].into_iter().collect(),
            chosen_summary: summary.into(),
            class_name: class_name.into(),
        }
    }

    #[test]
    fn generation_request_validation() {
        let summaries = vec!["resizes on update".to_string()];
        assert!(request("resizes on update", "Widget").validate(&summaries).is_ok());
        assert!(matches!(
            request("resizes on update", " ").validate(&summaries),
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            request("never generated", "Widget").validate(&summaries),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn publish_request_validation() {
        let ok = PublishRequest {
            filename: "WidgetTest.ts".into(),
            content: "test('x', () => {})".into(),
            commit_message: "Add test".into(),
        };
        assert!(ok.validate().is_ok());

        let no_name = PublishRequest {
            filename: String::new(),
            ..ok.clone()
        };
        assert!(matches!(no_name.validate(), Err(PipelineError::Validation(_))));

        let no_content = PublishRequest {
            content: String::new(),
            ..ok
        };
        assert!(matches!(no_content.validate(), Err(PipelineError::Validation(_))));
    }
}
