use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A hosted repository, identified by owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, PipelineError> {
        let owner = owner.into();
        let name = name.into();
        validate_component("owner", &owner)?;
        validate_component("name", &name)?;
        Ok(Self { owner, name })
    }

    /// Parse `owner/name` or a repository URL.
    ///
    /// Accepted forms:
    /// - `acme/widgets`
    /// - `https://github.com/acme/widgets` (optionally `www.`, `http://`, trailing `/` or `.git`)
    /// - `git@github.com:acme/widgets.git`
    pub fn parse(input: &str) -> Result<Self, PipelineError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Validation(
                "repository reference is empty".into(),
            ));
        }

        let path = if let Some(rest) = trimmed.strip_prefix("git@") {
            rest.split_once(':').map(|(_, path)| path).ok_or_else(|| {
                PipelineError::Validation(format!("malformed SSH repository reference: {trimmed}"))
            })?
        } else if let Some(rest) = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
        {
            let rest = rest.strip_prefix("www.").unwrap_or(rest);
            rest.split_once('/').map(|(_, path)| path).ok_or_else(|| {
                PipelineError::Validation(format!("repository URL has no path: {trimmed}"))
            })?
        } else {
            trimmed
        };

        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);

        let Some((owner, name)) = path.split_once('/') else {
            return Err(PipelineError::Validation(format!(
                "expected `owner/name`, got `{trimmed}`"
            )));
        };
        Self::new(owner, name)
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn validate_component(label: &str, value: &str) -> Result<(), PipelineError> {
    if value.is_empty() {
        return Err(PipelineError::Validation(format!(
            "repository {label} is empty"
        )));
    }
    if value
        .chars()
        .any(|c| c == '/' || c == '\\' || c == ':' || c.is_whitespace())
    {
        return Err(PipelineError::Validation(format!(
            "repository {label} `{value}` contains a separator or whitespace"
        )));
    }
    Ok(())
}

/// Opaque bearer token for the repository provider.
///
/// Held in memory only. Not serializable, and `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Result<Self, PipelineError> {
        let token = token.into();
        let token = token.trim();
        if token.is_empty() {
            return Err(PipelineError::Validation("credential is empty".into()));
        }
        Ok(Self(token.to_string()))
    }

    /// The raw token, for building request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
