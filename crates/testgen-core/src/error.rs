use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The failure kinds a stage operation can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    Transient,
    Fetch,
    Generation,
    Publish,
    Precondition,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "ValidationError",
            Self::Auth => "AuthError",
            Self::NotFound => "NotFoundError",
            Self::Transient => "TransientError",
            Self::Fetch => "FetchError",
            Self::Generation => "GenerationError",
            Self::Publish => "PublishError",
            Self::Precondition => "PreconditionError",
            Self::Config => "ConfigError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("credential rejected by provider: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider unavailable: {0}")]
    Transient(String),

    #[error("failed to fetch {path}: {message}")]
    Fetch { path: String, message: String },

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("{}", publish_message(.message, .branch.as_deref()))]
    Publish {
        message: String,
        /// Branch created before the failing step, left in place.
        branch: Option<String>,
    },

    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error("configuration error: {0}")]
    Config(String),
}

fn publish_message(message: &str, branch: Option<&str>) -> String {
    match branch {
        Some(branch) => format!(
            "publish failed: {message} (branch `{branch}` was already created and has not been removed)"
        ),
        None => format!("publish failed: {message}"),
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Auth(_) => ErrorKind::Auth,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Fetch { .. } => ErrorKind::Fetch,
            Self::Generation(_) => ErrorKind::Generation,
            Self::Publish { .. } => ErrorKind::Publish,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Branch left behind by a partially completed publish, if any.
    pub fn orphaned_branch(&self) -> Option<&str> {
        match self {
            Self::Publish { branch, .. } => branch.as_deref(),
            _ => None,
        }
    }

    /// Rewrap any error as a publish failure, keeping its message.
    pub fn into_publish(self, branch: Option<String>) -> Self {
        match self {
            Self::Publish { message, branch: None } => Self::Publish { message, branch },
            Self::Publish { .. } => self,
            other => Self::Publish {
                message: other.to_string(),
                branch,
            },
        }
    }
}
