//! Workflow state machine for a single pipeline session.
//!
//! [`transition`] is the pure transition table. [`PipelineState`] owns every
//! entity the session accumulates and only changes them through `begin_*`,
//! `complete_*` and `fail` calls, each of which validates its preconditions
//! before mutating anything.
//!
//! ```text
//! Initial -> FilesLoading -> FilesLoaded -> SummariesLoading -> SummariesLoaded
//!         -> CodeLoading -> CodeLoaded -> PublishLoading -> Published
//! any *Loading -> Error
//! Error -> FilesLoaded (resume)     any idle stage -> Initial (reset)
//! CodeLoaded -> CodeLoading (regenerate)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PipelineError};
use crate::repo::{Credential, RepositoryRef};
use crate::types::{
    FileEntry, GeneratedArtifact, GenerationRequest, PublishOutcome, PublishRequest,
    SelectionSet, SourceLanguage, TestSummary, default_test_filename,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initial,
    FilesLoading,
    FilesLoaded,
    SummariesLoading,
    SummariesLoaded,
    CodeLoading,
    CodeLoaded,
    PublishLoading,
    Published,
    Error,
}

impl Stage {
    /// `*Loading` stages mark a remote operation in flight.
    pub fn is_loading(self) -> bool {
        matches!(
            self,
            Self::FilesLoading | Self::SummariesLoading | Self::CodeLoading | Self::PublishLoading
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initial => "Initial",
            Self::FilesLoading => "FilesLoading",
            Self::FilesLoaded => "FilesLoaded",
            Self::SummariesLoading => "SummariesLoading",
            Self::SummariesLoaded => "SummariesLoaded",
            Self::CodeLoading => "CodeLoading",
            Self::CodeLoaded => "CodeLoaded",
            Self::PublishLoading => "PublishLoading",
            Self::Published => "Published",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// The four remote-call steps of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    ListFiles,
    Summaries,
    Code,
    Publish,
}

impl StageKind {
    pub fn loading_stage(self) -> Stage {
        match self {
            Self::ListFiles => Stage::FilesLoading,
            Self::Summaries => Stage::SummariesLoading,
            Self::Code => Stage::CodeLoading,
            Self::Publish => Stage::PublishLoading,
        }
    }

    pub fn loaded_stage(self) -> Stage {
        match self {
            Self::ListFiles => Stage::FilesLoaded,
            Self::Summaries => Stage::SummariesLoaded,
            Self::Code => Stage::CodeLoaded,
            Self::Publish => Stage::Published,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ListFiles => "list files",
            Self::Summaries => "generate summaries",
            Self::Code => "generate code",
            Self::Publish => "publish",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    Start(StageKind),
    Succeeded,
    Failed,
    Reset,
    ResumeFromFiles,
}

/// Pure transition table. Data preconditions are checked by [`PipelineState`].
pub fn transition(from: Stage, event: StageEvent) -> Result<Stage, PipelineError> {
    use Stage::*;

    let to = match (from, event) {
        (s, StageEvent::Reset) if !s.is_loading() => Some(Initial),
        (Initial, StageEvent::Start(StageKind::ListFiles)) => Some(FilesLoading),
        (FilesLoaded, StageEvent::Start(StageKind::Summaries)) => Some(SummariesLoading),
        (SummariesLoaded | CodeLoaded, StageEvent::Start(StageKind::Code)) => Some(CodeLoading),
        (CodeLoaded, StageEvent::Start(StageKind::Publish)) => Some(PublishLoading),
        (FilesLoading, StageEvent::Succeeded) => Some(FilesLoaded),
        (SummariesLoading, StageEvent::Succeeded) => Some(SummariesLoaded),
        (CodeLoading, StageEvent::Succeeded) => Some(CodeLoaded),
        (PublishLoading, StageEvent::Succeeded) => Some(Published),
        (s, StageEvent::Failed) if s.is_loading() => Some(Error),
        (Error, StageEvent::ResumeFromFiles) => Some(FilesLoaded),
        _ => None,
    };

    to.ok_or_else(|| {
        let reason = match event {
            StageEvent::Start(kind) if from.is_loading() => {
                format!("cannot {kind} while {from} is in flight")
            }
            StageEvent::Start(kind) => format!("cannot {kind} from {from}"),
            StageEvent::Succeeded | StageEvent::Failed => {
                format!("no stage is in flight (current stage {from})")
            }
            StageEvent::ResumeFromFiles => format!("cannot resume from {from}"),
            StageEvent::Reset => format!("cannot reset while {from} is in flight"),
        };
        PipelineError::Precondition(reason)
    })
}

/// A recorded stage change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
}

/// Why the session is in [`Stage::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageKind,
    pub kind: ErrorKind,
    pub message: String,
    pub orphaned_branch: Option<String>,
}

/// Proof that a stage was started. Only `begin_*` hands these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct StageTicket {
    pub kind: StageKind,
}

/// Inputs captured when a stage starts.
#[derive(Debug, Clone)]
pub struct StageInputs<T> {
    pub ticket: StageTicket,
    pub repo: RepositoryRef,
    pub credential: Credential,
    pub payload: T,
}

pub fn default_commit_message(class_name: &str) -> String {
    format!("Add test case for {}", class_name.trim())
}

/// The single mutable record of a pipeline session.
#[derive(Debug)]
pub struct PipelineState {
    stage: Stage,
    repo: Option<RepositoryRef>,
    credential: Option<Credential>,
    files: Vec<FileEntry>,
    selection: SelectionSet,
    summaries: Vec<TestSummary>,
    chosen_summary: Option<TestSummary>,
    class_name: String,
    filename: Option<String>,
    artifact: Option<GeneratedArtifact>,
    publish: Option<PublishOutcome>,
    last_error: Option<StageFailure>,
    history: Vec<TransitionRecord>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            stage: Stage::Initial,
            repo: None,
            credential: None,
            files: Vec::new(),
            selection: SelectionSet::new(),
            summaries: Vec::new(),
            chosen_summary: None,
            class_name: String::new(),
            filename: None,
            artifact: None,
            publish: None,
            last_error: None,
            history: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn summaries(&self) -> &[TestSummary] {
        &self.summaries
    }

    pub fn chosen_summary(&self) -> Option<&str> {
        self.chosen_summary.as_deref()
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn artifact(&self) -> Option<&GeneratedArtifact> {
        self.artifact.as_ref()
    }

    pub fn publish_outcome(&self) -> Option<&PublishOutcome> {
        self.publish.as_ref()
    }

    pub fn last_error(&self) -> Option<&StageFailure> {
        self.last_error.as_ref()
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    fn apply(&mut self, event: StageEvent) -> Result<(), PipelineError> {
        let to = transition(self.stage, event)?;
        tracing::debug!(from = %self.stage, to = %to, "Stage transition");
        self.history.push(TransitionRecord {
            from: self.stage,
            to,
            at: Utc::now(),
        });
        self.stage = to;
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), PipelineError> {
        if self.stage.is_loading() {
            return Err(PipelineError::Precondition(format!(
                "{} is in flight",
                self.stage
            )));
        }
        Ok(())
    }

    fn ticket(&self, kind: StageKind) -> StageTicket {
        StageTicket { kind }
    }

    fn check_ticket(&self, ticket: StageTicket) -> Result<(), PipelineError> {
        if self.stage != ticket.kind.loading_stage() {
            return Err(PipelineError::Precondition(format!(
                "`{}` is not in flight (current stage {}); result discarded",
                ticket.kind, self.stage
            )));
        }
        Ok(())
    }

    fn session(&self) -> Result<(RepositoryRef, Credential), PipelineError> {
        match (&self.repo, &self.credential) {
            (Some(repo), Some(credential)) => Ok((repo.clone(), credential.clone())),
            _ => Err(PipelineError::Precondition(
                "no repository connected".into(),
            )),
        }
    }

    // ── Stage starts ─────────────────────────────────────────────────────────

    /// Whether `kind` may start from the current stage, ignoring data checks.
    pub fn ensure_can_start(&self, kind: StageKind) -> Result<(), PipelineError> {
        transition(self.stage, StageEvent::Start(kind)).map(|_| ())
    }

    pub fn begin_listing(
        &mut self,
        repo: RepositoryRef,
        credential: Credential,
    ) -> Result<StageInputs<()>, PipelineError> {
        transition(self.stage, StageEvent::Start(StageKind::ListFiles))?;
        self.repo = Some(repo.clone());
        self.credential = Some(credential.clone());
        self.apply(StageEvent::Start(StageKind::ListFiles))?;
        Ok(StageInputs {
            ticket: self.ticket(StageKind::ListFiles),
            repo,
            credential,
            payload: (),
        })
    }

    pub fn begin_summaries(&mut self) -> Result<StageInputs<SelectionSet>, PipelineError> {
        transition(self.stage, StageEvent::Start(StageKind::Summaries))?;
        if self.selection.is_empty() {
            return Err(PipelineError::Precondition(
                "select at least one file before generating summaries".into(),
            ));
        }
        let (repo, credential) = self.session()?;
        self.apply(StageEvent::Start(StageKind::Summaries))?;
        Ok(StageInputs {
            ticket: self.ticket(StageKind::Summaries),
            repo,
            credential,
            payload: self.selection.clone(),
        })
    }

    /// Build a generation request from the session's current inputs.
    pub fn generation_request(&self) -> GenerationRequest {
        GenerationRequest {
            context_files: self.selection.clone(),
            chosen_summary: self.chosen_summary.clone().unwrap_or_default(),
            class_name: self.class_name.clone(),
        }
    }

    /// Whether `request` may start code generation now: the stage gate
    /// (`Precondition`), then the request itself (`Validation`). Every
    /// context file must be a listed source file.
    pub fn check_code_request(&self, request: &GenerationRequest) -> Result<(), PipelineError> {
        transition(self.stage, StageEvent::Start(StageKind::Code))?;
        request.validate(&self.summaries)?;
        for path in &request.context_files {
            self.ensure_listed(path)?;
        }
        Ok(())
    }

    pub fn begin_code(
        &mut self,
        request: GenerationRequest,
    ) -> Result<StageInputs<GenerationRequest>, PipelineError> {
        self.check_code_request(&request)?;
        let (repo, credential) = self.session()?;
        self.chosen_summary = Some(request.chosen_summary.clone());
        self.class_name = request.class_name.trim().to_string();
        self.apply(StageEvent::Start(StageKind::Code))?;
        Ok(StageInputs {
            ticket: self.ticket(StageKind::Code),
            repo,
            credential,
            payload: request,
        })
    }

    pub fn begin_publish(
        &mut self,
        commit_message: Option<String>,
    ) -> Result<StageInputs<PublishRequest>, PipelineError> {
        transition(self.stage, StageEvent::Start(StageKind::Publish))?;
        let content = match &self.artifact {
            Some(artifact) if !artifact.source_text.is_empty() => artifact.source_text.clone(),
            _ => {
                return Err(PipelineError::Precondition(
                    "no generated code to publish".into(),
                ));
            }
        };
        let Some(filename) = self.filename.clone() else {
            return Err(PipelineError::Precondition(
                "no target filename resolved".into(),
            ));
        };
        let commit_message = commit_message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_commit_message(&self.class_name));
        let request = PublishRequest {
            filename,
            content,
            commit_message,
        };
        request.validate()?;
        let (repo, credential) = self.session()?;
        self.apply(StageEvent::Start(StageKind::Publish))?;
        Ok(StageInputs {
            ticket: self.ticket(StageKind::Publish),
            repo,
            credential,
            payload: request,
        })
    }

    // ── Stage completions ────────────────────────────────────────────────────

    pub fn complete_listing(
        &mut self,
        ticket: StageTicket,
        files: Vec<FileEntry>,
    ) -> Result<(), PipelineError> {
        self.check_ticket(ticket)?;
        self.files = files;
        self.selection.retain(|path| self.files.iter().any(|f| &f.path == path));
        self.last_error = None;
        self.apply(StageEvent::Succeeded)
    }

    pub fn complete_summaries(
        &mut self,
        ticket: StageTicket,
        summaries: Vec<TestSummary>,
    ) -> Result<(), PipelineError> {
        self.check_ticket(ticket)?;
        self.summaries = summaries;
        self.chosen_summary = None;
        self.artifact = None;
        self.publish = None;
        self.last_error = None;
        self.apply(StageEvent::Succeeded)
    }

    /// Record generated code. The filename is derived from the class name
    /// only when the session has none yet.
    pub fn complete_code(
        &mut self,
        ticket: StageTicket,
        source_text: String,
        language: SourceLanguage,
    ) -> Result<GeneratedArtifact, PipelineError> {
        self.check_ticket(ticket)?;
        let filename = match &self.filename {
            Some(existing) => existing.clone(),
            None => {
                let derived = default_test_filename(&self.class_name, language);
                self.filename = Some(derived.clone());
                derived
            }
        };
        let artifact = GeneratedArtifact {
            source_text,
            suggested_filename: filename,
            language,
        };
        self.artifact = Some(artifact.clone());
        self.publish = None;
        self.last_error = None;
        self.apply(StageEvent::Succeeded)?;
        Ok(artifact)
    }

    pub fn complete_publish(
        &mut self,
        ticket: StageTicket,
        outcome: PublishOutcome,
    ) -> Result<(), PipelineError> {
        self.check_ticket(ticket)?;
        self.publish = Some(outcome);
        self.last_error = None;
        self.apply(StageEvent::Succeeded)
    }

    /// Move to `Error`, keeping every entity accumulated so far.
    pub fn fail(&mut self, ticket: StageTicket, error: &PipelineError) -> Result<(), PipelineError> {
        self.check_ticket(ticket)?;
        self.last_error = Some(StageFailure {
            stage: ticket.kind,
            kind: error.kind(),
            message: error.to_string(),
            orphaned_branch: error.orphaned_branch().map(str::to_string),
        });
        self.apply(StageEvent::Failed)
    }

    // ── Recovery ─────────────────────────────────────────────────────────────

    /// Discard everything, history included, and return to `Initial`.
    /// Refused while a stage is in flight.
    pub fn reset(&mut self) -> Result<(), PipelineError> {
        let from = self.stage;
        transition(from, StageEvent::Reset)?;
        *self = Self::new();
        tracing::debug!(from = %from, "Session reset");
        Ok(())
    }

    /// Return from `Error` to `FilesLoaded`, keeping the listed files, the
    /// selection and the user's class name and filename.
    pub fn resume_from_files(&mut self) -> Result<(), PipelineError> {
        transition(self.stage, StageEvent::ResumeFromFiles)?;
        if self.files.is_empty() {
            return Err(PipelineError::Precondition(
                "no listed files to resume from; reset instead".into(),
            ));
        }
        self.summaries.clear();
        self.chosen_summary = None;
        self.artifact = None;
        self.publish = None;
        self.last_error = None;
        self.apply(StageEvent::ResumeFromFiles)
    }

    // ── Session inputs ───────────────────────────────────────────────────────

    fn ensure_listed(&self, path: &str) -> Result<(), PipelineError> {
        if self.files.is_empty() {
            return Err(PipelineError::Precondition("no files listed yet".into()));
        }
        if !self.files.iter().any(|f| f.path == path) {
            return Err(PipelineError::Validation(format!(
                "`{path}` is not a listed source file"
            )));
        }
        Ok(())
    }

    pub fn select_file(&mut self, path: &str) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.ensure_listed(path)?;
        self.selection.insert(path.to_string());
        Ok(())
    }

    pub fn deselect_file(&mut self, path: &str) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.selection.remove(path);
        Ok(())
    }

    /// Replace the selection. All paths are checked before anything changes.
    pub fn set_selection<I, S>(&mut self, paths: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_idle()?;
        let selection: SelectionSet = paths.into_iter().map(Into::into).collect();
        for path in &selection {
            self.ensure_listed(path)?;
        }
        self.selection = selection;
        Ok(())
    }

    pub fn choose_summary(&mut self, summary: &str) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        if !self.summaries.iter().any(|s| s == summary) {
            return Err(PipelineError::Validation(format!(
                "summary `{summary}` is not in the current summary set"
            )));
        }
        self.chosen_summary = Some(summary.to_string());
        Ok(())
    }

    pub fn set_class_name(&mut self, class_name: &str) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.class_name = class_name.trim().to_string();
        Ok(())
    }

    /// Set the target filename. A blank name clears it so the next
    /// generation derives one again.
    pub fn set_filename(&mut self, filename: &str) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        let filename = filename.trim();
        self.filename = (!filename.is_empty()).then(|| filename.to_string());
        if let (Some(artifact), Some(name)) = (self.artifact.as_mut(), self.filename.as_ref()) {
            artifact.suggested_filename = name.clone();
        }
        Ok(())
    }

    /// Read-only view for presentation. Never includes the credential.
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            stage: self.stage,
            repo: self.repo.clone(),
            files: self.files.clone(),
            selection: self.selection.clone(),
            summaries: self.summaries.clone(),
            chosen_summary: self.chosen_summary.clone(),
            class_name: self.class_name.clone(),
            filename: self.filename.clone(),
            artifact: self.artifact.clone(),
            pull_request_url: self.publish.as_ref().map(|p| p.pull_request_url.clone()),
            last_error: self.last_error.clone(),
            history: self.history.clone(),
        }
    }
}

/// Point-in-time copy of [`PipelineState`] handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub stage: Stage,
    pub repo: Option<RepositoryRef>,
    pub files: Vec<FileEntry>,
    pub selection: SelectionSet,
    pub summaries: Vec<TestSummary>,
    pub chosen_summary: Option<TestSummary>,
    pub class_name: String,
    pub filename: Option<String>,
    pub artifact: Option<GeneratedArtifact>,
    pub pull_request_url: Option<String>,
    pub last_error: Option<StageFailure>,
    pub history: Vec<TransitionRecord>,
}

impl PipelineSnapshot {
    pub fn is_loading(&self) -> bool {
        self.stage.is_loading()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepositoryRef {
        RepositoryRef::parse("acme/widgets").unwrap()
    }

    fn cred() -> Credential {
        Credential::new("ghp_test").unwrap()
    }

    fn listed_state() -> PipelineState {
        let mut state = PipelineState::new();
        let inputs = state.begin_listing(repo(), cred()).unwrap();
        state
            .complete_listing(
                inputs.ticket,
                vec![FileEntry::blob("src/Widget.ts"), FileEntry::blob("src/Panel.ts")],
            )
            .unwrap();
        state
    }

    fn summarized_state() -> PipelineState {
        let mut state = listed_state();
        state.select_file("src/Widget.ts").unwrap();
        let inputs = state.begin_summaries().unwrap();
        state
            .complete_summaries(
                inputs.ticket,
                vec!["constructs with default size".into(), "resizes on update".into()],
            )
            .unwrap();
        state
    }

    #[test]
    fn transition_table_forward_path() {
        let mut stage = Stage::Initial;
        for event in [
            StageEvent::Start(StageKind::ListFiles),
            StageEvent::Succeeded,
            StageEvent::Start(StageKind::Summaries),
            StageEvent::Succeeded,
            StageEvent::Start(StageKind::Code),
            StageEvent::Succeeded,
            StageEvent::Start(StageKind::Publish),
            StageEvent::Succeeded,
        ] {
            stage = transition(stage, event).unwrap();
        }
        assert_eq!(stage, Stage::Published);
    }

    #[test]
    fn transition_table_rejects_skips() {
        for (from, kind) in [
            (Stage::Initial, StageKind::Summaries),
            (Stage::Initial, StageKind::Code),
            (Stage::FilesLoaded, StageKind::Code),
            (Stage::FilesLoaded, StageKind::Publish),
            (Stage::SummariesLoaded, StageKind::Publish),
            (Stage::SummariesLoaded, StageKind::Summaries),
            (Stage::Published, StageKind::ListFiles),
            (Stage::Error, StageKind::Code),
        ] {
            let err = transition(from, StageEvent::Start(kind)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Precondition, "{from} -> {kind}");
        }
    }

    #[test]
    fn loading_stages_are_mutually_exclusive() {
        for loading in [
            Stage::FilesLoading,
            Stage::SummariesLoading,
            Stage::CodeLoading,
            Stage::PublishLoading,
        ] {
            for kind in [
                StageKind::ListFiles,
                StageKind::Summaries,
                StageKind::Code,
                StageKind::Publish,
            ] {
                let err = transition(loading, StageEvent::Start(kind)).unwrap_err();
                assert!(err.to_string().contains("in flight"));
            }
            assert_eq!(transition(loading, StageEvent::Failed).unwrap(), Stage::Error);
        }
    }

    #[test]
    fn failure_only_from_loading() {
        assert!(transition(Stage::FilesLoaded, StageEvent::Failed).is_err());
        assert!(transition(Stage::Initial, StageEvent::Succeeded).is_err());
    }

    #[test]
    fn reset_from_every_idle_stage() {
        for stage in [
            Stage::Initial,
            Stage::FilesLoaded,
            Stage::CodeLoaded,
            Stage::Published,
            Stage::Error,
        ] {
            assert_eq!(transition(stage, StageEvent::Reset).unwrap(), Stage::Initial);
        }
        for stage in [
            Stage::FilesLoading,
            Stage::SummariesLoading,
            Stage::CodeLoading,
            Stage::PublishLoading,
        ] {
            let err = transition(stage, StageEvent::Reset).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Precondition);
        }
    }

    #[test]
    fn summaries_require_selection() {
        let mut state = listed_state();
        let err = state.begin_summaries().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(state.stage(), Stage::FilesLoaded);
    }

    #[test]
    fn selection_must_be_listed() {
        let mut state = listed_state();
        let err = state.select_file("src/Unknown.ts").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = state
            .set_selection(["src/Widget.ts", "src/Unknown.ts"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(state.selection().is_empty());

        state.set_selection(["src/Widget.ts", "src/Panel.ts"]).unwrap();
        assert_eq!(state.selection().len(), 2);
        state.deselect_file("src/Panel.ts").unwrap();
        assert_eq!(state.selection().len(), 1);
    }

    #[test]
    fn selecting_before_listing_is_a_precondition_error() {
        let mut state = PipelineState::new();
        let err = state.select_file("src/Widget.ts").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn code_stage_validates_request_without_moving() {
        let mut state = summarized_state();
        state.choose_summary("resizes on update").unwrap();

        let err = state.begin_code(state.generation_request()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(state.stage(), Stage::SummariesLoaded);

        let mut request = state.generation_request();
        request.class_name = "Widget".into();
        request.chosen_summary = "not a summary".into();
        let err = state.begin_code(request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(state.stage(), Stage::SummariesLoaded);
    }

    #[test]
    fn filename_derived_once() {
        let mut state = summarized_state();
        state.choose_summary("resizes on update").unwrap();
        state.set_class_name("Widget").unwrap();

        let inputs = state.begin_code(state.generation_request()).unwrap();
        let artifact = state
            .complete_code(inputs.ticket, "test code".into(), SourceLanguage::TypeScript)
            .unwrap();
        assert_eq!(artifact.suggested_filename, "WidgetTest.ts");

        state.set_filename("widget.spec.ts").unwrap();
        state.set_class_name("Other").unwrap();
        let inputs = state.begin_code(state.generation_request()).unwrap();
        let artifact = state
            .complete_code(inputs.ticket, "test code v2".into(), SourceLanguage::TypeScript)
            .unwrap();
        assert_eq!(artifact.suggested_filename, "widget.spec.ts");
    }

    #[test]
    fn publish_requires_artifact_and_uses_default_message() {
        let mut state = summarized_state();
        state.choose_summary("resizes on update").unwrap();
        state.set_class_name("Widget").unwrap();
        let inputs = state.begin_code(state.generation_request()).unwrap();
        state
            .complete_code(inputs.ticket, "test code".into(), SourceLanguage::TypeScript)
            .unwrap();

        let inputs = state.begin_publish(None).unwrap();
        assert_eq!(inputs.payload.filename, "WidgetTest.ts");
        assert_eq!(inputs.payload.commit_message, "Add test case for Widget");
        assert_eq!(state.stage(), Stage::PublishLoading);
    }

    #[test]
    fn failure_preserves_entities_and_resume_keeps_files() {
        let mut state = listed_state();
        state.select_file("src/Widget.ts").unwrap();
        let inputs = state.begin_summaries().unwrap();
        state
            .fail(inputs.ticket, &PipelineError::Generation("empty output".into()))
            .unwrap();

        assert_eq!(state.stage(), Stage::Error);
        assert_eq!(state.files().len(), 2);
        let failure = state.last_error().unwrap();
        assert_eq!(failure.stage, StageKind::Summaries);
        assert_eq!(failure.kind, ErrorKind::Generation);

        state.resume_from_files().unwrap();
        assert_eq!(state.stage(), Stage::FilesLoaded);
        assert_eq!(state.selection().len(), 1);
        assert!(state.last_error().is_none());
    }

    #[test]
    fn resume_requires_error_stage() {
        let mut state = listed_state();
        let err = state.resume_from_files().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn reset_refused_while_stage_in_flight() {
        let mut state = PipelineState::new();
        let inputs = state.begin_listing(repo(), cred()).unwrap();
        let err = state.reset().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(state.stage(), Stage::FilesLoading);

        state
            .complete_listing(inputs.ticket, vec![FileEntry::blob("src/A.java")])
            .unwrap();
        assert_eq!(state.files().len(), 1);
    }

    #[test]
    fn reset_empties_session_and_history() {
        let mut state = summarized_state();
        assert!(!state.history().is_empty());
        state.reset().unwrap();
        assert_eq!(state.stage(), Stage::Initial);
        assert!(state.files().is_empty());
        assert!(state.summaries().is_empty());
        assert!(state.history().is_empty());
        assert!(state.snapshot().repo.is_none());
    }

    #[test]
    fn stale_ticket_is_refused() {
        let mut state = PipelineState::new();
        let inputs = state.begin_listing(repo(), cred()).unwrap();
        state
            .fail(inputs.ticket, &PipelineError::Transient("timeout".into()))
            .unwrap();
        let err = state
            .complete_listing(inputs.ticket, vec![FileEntry::blob("src/A.java")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(state.stage(), Stage::Error);
    }

    #[test]
    fn code_request_files_must_be_listed() {
        let mut state = summarized_state();
        let request = GenerationRequest {
            context_files: [".env".to_string()].into(),
            chosen_summary: "resizes on update".into(),
            class_name: "Widget".into(),
        };
        let err = state.begin_code(request.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains(".env"));
        assert_eq!(state.stage(), Stage::SummariesLoaded);

        let mut listed = request;
        listed.context_files = ["src/Panel.ts".to_string()].into();
        state.begin_code(listed).unwrap();
        assert_eq!(state.stage(), Stage::CodeLoading);
    }

    #[test]
    fn inputs_rejected_while_loading() {
        let mut state = listed_state();
        state.select_file("src/Widget.ts").unwrap();
        state.begin_summaries().unwrap();
        assert_eq!(
            state.set_class_name("Widget").unwrap_err().kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            state.deselect_file("src/Widget.ts").unwrap_err().kind(),
            ErrorKind::Precondition
        );
    }

    #[test]
    fn snapshot_omits_credential() {
        let state = listed_state();
        let json = serde_json::to_string(&state.snapshot()).unwrap();
        assert!(!json.contains("ghp_test"));
        assert!(json.contains("files_loaded"));
    }
}
