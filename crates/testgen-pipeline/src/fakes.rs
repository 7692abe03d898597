//! In-memory [`RepositoryProvider`] for tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use testgen_core::{Credential, FileEntry, PipelineError, RepositoryRef};

use crate::provider::{
    BranchHead, FileCommit, ProviderFuture, PullRequest, PullRequestDraft, RepositoryProvider,
};

/// Provider operations, for call recording and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    ListFiles,
    GetContent,
    DefaultBranch,
    CreateBranch,
    CommitFile,
    OpenPullRequest,
}

/// Holds an operation at its entry point until released.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl PauseHandle {
    /// Resolves once a call has reached the paused operation.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Debug, Default)]
struct FakeRepo {
    default_branch: String,
    entries: Vec<FileEntry>,
    contents: HashMap<String, String>,
    /// Branch name to head commit SHA, default branch included.
    heads: BTreeMap<String, String>,
    commits: Vec<FileCommit>,
    pull_requests: Vec<PullRequestDraft>,
}

#[derive(Debug, Default)]
struct Inner {
    repos: HashMap<String, FakeRepo>,
    failures: HashMap<FakeOp, PipelineError>,
    pauses: HashMap<FakeOp, PauseHandle>,
    calls: Vec<FakeOp>,
    next_sha: u64,
    next_pr: u64,
}

impl Inner {
    fn sha(&mut self) -> String {
        self.next_sha += 1;
        format!("{:040x}", self.next_sha)
    }
}

pub struct InMemoryProvider {
    web_url: String,
    token: Option<String>,
    inner: Mutex<Inner>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            web_url: "https://github.com".into(),
            token: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_web_url(mut self, web_url: impl Into<String>) -> Self {
        self.web_url = web_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Only this token is accepted; anything else fails with `Auth`.
    pub fn require_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Add a repository whose default branch `main` holds `files` as blobs,
    /// listed in the given order.
    pub fn with_repo(self, full_name: &str, files: &[(&str, &str)]) -> Self {
        {
            let mut inner = self.lock();
            let head = inner.sha();
            let repo = inner.repos.entry(full_name.to_string()).or_default();
            repo.default_branch = "main".into();
            repo.heads.insert("main".into(), head);
            for (path, content) in files {
                repo.entries.push(FileEntry::blob(*path));
                repo.contents.insert(path.to_string(), content.to_string());
            }
        }
        self
    }

    /// Append a raw tree entry (directory, README, ...) to a repository listing.
    pub fn with_entry(self, full_name: &str, entry: FileEntry) -> Self {
        self.lock()
            .repos
            .entry(full_name.to_string())
            .or_default()
            .entries
            .push(entry);
        self
    }

    /// Make every later call of `op` fail with `error`.
    pub fn fail_on(&self, op: FakeOp, error: PipelineError) {
        self.lock().failures.insert(op, error);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Hold the next call of `op` until [`PauseHandle::release`].
    pub fn pause_on(&self, op: FakeOp) -> PauseHandle {
        let handle = PauseHandle::default();
        self.lock().pauses.insert(op, handle.clone());
        handle
    }

    pub fn calls(&self) -> Vec<FakeOp> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: FakeOp) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Branches other than the default branch.
    pub fn branches(&self, full_name: &str) -> Vec<String> {
        let inner = self.lock();
        inner
            .repos
            .get(full_name)
            .map(|repo| {
                repo.heads
                    .keys()
                    .filter(|name| **name != repo.default_branch)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Content committed to `path` on `branch`, latest commit wins.
    pub fn committed_file(&self, full_name: &str, branch: &str, path: &str) -> Option<String> {
        let inner = self.lock();
        inner.repos.get(full_name).and_then(|repo| {
            repo.commits
                .iter()
                .rev()
                .find(|c| c.branch == branch && c.path == path)
                .map(|c| c.content.clone())
        })
    }

    pub fn commits(&self, full_name: &str) -> Vec<FileCommit> {
        let inner = self.lock();
        inner
            .repos
            .get(full_name)
            .map(|repo| repo.commits.clone())
            .unwrap_or_default()
    }

    pub fn pull_requests(&self, full_name: &str) -> Vec<PullRequestDraft> {
        let inner = self.lock();
        inner
            .repos
            .get(full_name)
            .map(|repo| repo.pull_requests.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the call, honour any pause, then check auth, injected failures
    /// and repository existence.
    async fn enter(
        &self,
        op: FakeOp,
        repo: &RepositoryRef,
        credential: &Credential,
    ) -> Result<(), PipelineError> {
        let pause = {
            let mut inner = self.lock();
            inner.calls.push(op);
            inner.pauses.remove(&op)
        };
        if let Some(pause) = pause {
            pause.entered.notify_one();
            pause.release.notified().await;
        }

        if let Some(token) = &self.token
            && credential.expose() != token
        {
            return Err(PipelineError::Auth("Bad credentials".into()));
        }

        let inner = self.lock();
        if let Some(err) = inner.failures.get(&op) {
            return Err(err.clone());
        }
        if !inner.repos.contains_key(&repo.full_name()) {
            return Err(PipelineError::NotFound(format!(
                "repository {} does not exist",
                repo.full_name()
            )));
        }
        Ok(())
    }

    fn with_repo_mut<T>(
        &self,
        repo: &RepositoryRef,
        f: impl FnOnce(&mut FakeRepo, &mut u64, &mut u64) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut inner = self.lock();
        let Inner {
            repos,
            next_sha,
            next_pr,
            ..
        } = &mut *inner;
        let fake = repos
            .get_mut(&repo.full_name())
            .ok_or_else(|| PipelineError::NotFound(repo.full_name()))?;
        f(fake, next_sha, next_pr)
    }
}

impl RepositoryProvider for InMemoryProvider {
    fn list_files<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
    ) -> ProviderFuture<'a, Vec<FileEntry>> {
        Box::pin(async move {
            self.enter(FakeOp::ListFiles, repo, credential).await?;
            self.with_repo_mut(repo, |fake, _, _| Ok(fake.entries.clone()))
        })
    }

    fn get_content<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        path: &'a str,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            self.enter(FakeOp::GetContent, repo, credential).await?;
            self.with_repo_mut(repo, |fake, _, _| {
                fake.contents
                    .get(path)
                    .cloned()
                    .ok_or_else(|| PipelineError::NotFound(format!("no file at {path}")))
            })
        })
    }

    fn default_branch<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
    ) -> ProviderFuture<'a, BranchHead> {
        Box::pin(async move {
            self.enter(FakeOp::DefaultBranch, repo, credential).await?;
            self.with_repo_mut(repo, |fake, _, _| {
                let sha = fake
                    .heads
                    .get(&fake.default_branch)
                    .cloned()
                    .ok_or_else(|| PipelineError::NotFound("repository is empty".into()))?;
                Ok(BranchHead {
                    name: fake.default_branch.clone(),
                    sha,
                })
            })
        })
    }

    fn create_branch<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        name: &'a str,
        from_sha: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.enter(FakeOp::CreateBranch, repo, credential).await?;
            self.with_repo_mut(repo, |fake, _, _| {
                if fake.heads.contains_key(name) {
                    return Err(PipelineError::Transient(format!(
                        "reference refs/heads/{name} already exists"
                    )));
                }
                fake.heads.insert(name.to_string(), from_sha.to_string());
                Ok(())
            })
        })
    }

    fn commit_file<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        commit: &'a FileCommit,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            self.enter(FakeOp::CommitFile, repo, credential).await?;
            self.with_repo_mut(repo, |fake, next_sha, _| {
                let Some(head) = fake.heads.get_mut(&commit.branch) else {
                    return Err(PipelineError::NotFound(format!(
                        "branch {} does not exist",
                        commit.branch
                    )));
                };
                *next_sha += 1;
                let sha = format!("{:040x}", *next_sha);
                *head = sha.clone();
                fake.commits.push(commit.clone());
                Ok(sha)
            })
        })
    }

    fn open_pull_request<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        draft: &'a PullRequestDraft,
    ) -> ProviderFuture<'a, PullRequest> {
        Box::pin(async move {
            self.enter(FakeOp::OpenPullRequest, repo, credential).await?;
            let web_url = self.web_url.clone();
            self.with_repo_mut(repo, |fake, _, next_pr| {
                if !fake.heads.contains_key(&draft.head) {
                    return Err(PipelineError::NotFound(format!(
                        "head branch {} does not exist",
                        draft.head
                    )));
                }
                *next_pr += 1;
                fake.pull_requests.push(draft.clone());
                Ok(PullRequest {
                    number: *next_pr,
                    html_url: format!("{web_url}/{}/{}/pull/{}", repo.owner, repo.name, next_pr),
                })
            })
        })
    }
}
