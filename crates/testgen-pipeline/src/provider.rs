use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use testgen_core::{Credential, FileEntry, PipelineError, RepositoryRef};

/// Boxed future returned by provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PipelineError>> + Send + 'a>>;

/// Default branch of a repository and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHead {
    pub name: String,
    pub sha: String,
}

/// A single-file commit on top of `parent_sha`, advancing `branch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCommit {
    pub branch: String,
    pub parent_sha: String,
    pub path: String,
    pub content: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

/// Repository hosting service: file trees, content, branches and pull requests.
///
/// Failures are reported as `Auth`, `NotFound` or `Transient`. Nothing is
/// retried here.
pub trait RepositoryProvider: Send + Sync {
    /// Full recursive tree of the default branch, in provider order.
    fn list_files<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
    ) -> ProviderFuture<'a, Vec<FileEntry>>;

    /// Text content of `path` on the default branch.
    fn get_content<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        path: &'a str,
    ) -> ProviderFuture<'a, String>;

    fn default_branch<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
    ) -> ProviderFuture<'a, BranchHead>;

    fn create_branch<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        name: &'a str,
        from_sha: &'a str,
    ) -> ProviderFuture<'a, ()>;

    /// Create or update one file and return the new commit SHA.
    fn commit_file<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        commit: &'a FileCommit,
    ) -> ProviderFuture<'a, String>;

    fn open_pull_request<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        draft: &'a PullRequestDraft,
    ) -> ProviderFuture<'a, PullRequest>;
}
