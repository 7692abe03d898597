pub mod error;
pub mod repo;
pub mod state;
pub mod types;

pub use error::{ErrorKind, PipelineError};
pub use repo::{Credential, RepositoryRef};
pub use state::{
    PipelineSnapshot, PipelineState, Stage, StageFailure, StageInputs, StageKind, StageTicket,
    TransitionRecord,
};
pub use types::{
    EntryKind, FileEntry, GeneratedArtifact, GenerationRequest, PublishOutcome, PublishRequest,
    SelectionSet, SourceLanguage, TestSummary,
};
