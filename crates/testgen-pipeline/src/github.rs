//! GitHub REST v3 implementation of [`RepositoryProvider`].
//!
//! Commits go through the git data API (tree with inline content, commit,
//! ref update), so file content never needs base64 encoding.

use reqwest::header::{ACCEPT, HeaderMap, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use testgen_core::{Credential, FileEntry, PipelineError, RepositoryRef};

use crate::provider::{
    BranchHead, FileCommit, ProviderFuture, PullRequest, PullRequestDraft, RepositoryProvider,
};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

pub struct GitHubProvider {
    http: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    tree: GitObject,
}

#[derive(Debug, Deserialize)]
struct Created {
    sha: String,
}

impl GitHubProvider {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{api_url}/repos/{owner}/{name}/{segments...}`. Segments containing `/`
    /// are split so file paths and branch names keep their separators.
    fn endpoint(&self, repo: &RepositoryRef, segments: &[&str]) -> Result<Url, PipelineError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| PipelineError::Config(format!("invalid GitHub API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| PipelineError::Config("GitHub API URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["repos", repo.owner.as_str(), repo.name.as_str()])
            .extend(segments.iter().flat_map(|s| s.split('/')));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, credential: &Credential) -> RequestBuilder {
        self.request_as(method, url, credential, JSON_MEDIA_TYPE)
    }

    /// A request carrying exactly one `Accept` header, `media_type`.
    fn request_as(
        &self,
        method: Method,
        url: Url,
        credential: &Credential,
        media_type: &'static str,
    ) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(credential.expose())
            .header(USER_AGENT, concat!("testgen/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, media_type)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(req: RequestBuilder, what: &str) -> Result<reqwest::Response, PipelineError> {
        let resp = req
            .send()
            .await
            .map_err(|e| PipelineError::Transient(format!("{what}: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let rate_limited = is_rate_limited(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status, rate_limited, what, &body))
    }

    async fn send_json<T: DeserializeOwned>(
        req: RequestBuilder,
        what: &str,
    ) -> Result<T, PipelineError> {
        let resp = Self::send(req, what).await?;
        resp.json::<T>()
            .await
            .map_err(|e| PipelineError::Transient(format!("{what}: unexpected response: {e}")))
    }

    async fn fetch_default_branch(
        &self,
        repo: &RepositoryRef,
        credential: &Credential,
    ) -> Result<BranchHead, PipelineError> {
        let url = self.endpoint(repo, &[])?;
        let info: RepoInfo =
            Self::send_json(self.request(Method::GET, url, credential), "get repository").await?;

        let url = self.endpoint(repo, &["git", "ref", "heads", &info.default_branch])?;
        let head: GitRef = Self::send_json(
            self.request(Method::GET, url, credential),
            "resolve default branch",
        )
        .await?;

        Ok(BranchHead {
            name: info.default_branch,
            sha: head.object.sha,
        })
    }
}

fn is_rate_limited(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0")
}

/// Map a non-success status onto the provider error kinds.
pub(crate) fn classify_status(
    status: StatusCode,
    rate_limited: bool,
    what: &str,
    body: &str,
) -> PipelineError {
    let detail = github_message(body).unwrap_or_else(|| body.chars().take(200).collect());
    let message = format!("{what}: {status} {detail}").trim_end().to_string();
    match status {
        StatusCode::UNAUTHORIZED => PipelineError::Auth(message),
        StatusCode::FORBIDDEN if rate_limited => PipelineError::Transient(message),
        StatusCode::FORBIDDEN => PipelineError::Auth(message),
        StatusCode::NOT_FOUND => PipelineError::NotFound(message),
        _ => PipelineError::Transient(message),
    }
}

fn github_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json["message"].as_str().map(str::to_string)
}

impl RepositoryProvider for GitHubProvider {
    fn list_files<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
    ) -> ProviderFuture<'a, Vec<FileEntry>> {
        Box::pin(async move {
            let head = self.fetch_default_branch(repo, credential).await?;
            let mut url = self.endpoint(repo, &["git", "trees", &head.sha])?;
            url.query_pairs_mut().append_pair("recursive", "1");

            let tree: TreeResponse =
                Self::send_json(self.request(Method::GET, url, credential), "list files").await?;
            if tree.truncated {
                tracing::warn!(repo = %repo, "GitHub truncated the file tree; listing is partial");
            }

            let entries = tree
                .tree
                .into_iter()
                .filter_map(|item| match item.kind.as_str() {
                    "blob" => Some(FileEntry::blob(item.path)),
                    "tree" => Some(FileEntry::tree(item.path)),
                    _ => None,
                })
                .collect::<Vec<_>>();
            tracing::debug!(repo = %repo, count = entries.len(), "Fetched file tree");
            Ok(entries)
        })
    }

    fn get_content<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        path: &'a str,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let url = self.endpoint(repo, &["contents", path])?;
            let req = self.request_as(Method::GET, url, credential, RAW_MEDIA_TYPE);
            let resp = Self::send(req, &format!("get content of {path}")).await?;
            resp.text()
                .await
                .map_err(|e| PipelineError::Transient(format!("read content of {path}: {e}")))
        })
    }

    fn default_branch<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
    ) -> ProviderFuture<'a, BranchHead> {
        Box::pin(self.fetch_default_branch(repo, credential))
    }

    fn create_branch<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        name: &'a str,
        from_sha: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let url = self.endpoint(repo, &["git", "refs"])?;
            let body = serde_json::json!({
                "ref": format!("refs/heads/{name}"),
                "sha": from_sha,
            });
            Self::send(
                self.request(Method::POST, url, credential).json(&body),
                &format!("create branch {name}"),
            )
            .await?;
            Ok(())
        })
    }

    fn commit_file<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        commit: &'a FileCommit,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let url = self.endpoint(repo, &["git", "commits", &commit.parent_sha])?;
            let parent: CommitInfo = Self::send_json(
                self.request(Method::GET, url, credential),
                "read parent commit",
            )
            .await?;

            let url = self.endpoint(repo, &["git", "trees"])?;
            let body = serde_json::json!({
                "base_tree": parent.tree.sha,
                "tree": [{
                    "path": commit.path,
                    "mode": "100644",
                    "type": "blob",
                    "content": commit.content,
                }],
            });
            let tree: Created = Self::send_json(
                self.request(Method::POST, url, credential).json(&body),
                "create tree",
            )
            .await?;

            let url = self.endpoint(repo, &["git", "commits"])?;
            let body = serde_json::json!({
                "message": commit.message,
                "tree": tree.sha,
                "parents": [commit.parent_sha],
            });
            let created: Created = Self::send_json(
                self.request(Method::POST, url, credential).json(&body),
                "create commit",
            )
            .await?;

            let url = self.endpoint(repo, &["git", "refs", "heads", &commit.branch])?;
            let body = serde_json::json!({ "sha": created.sha, "force": false });
            Self::send(
                self.request(Method::PATCH, url, credential).json(&body),
                &format!("update branch {}", commit.branch),
            )
            .await?;

            Ok(created.sha)
        })
    }

    fn open_pull_request<'a>(
        &'a self,
        repo: &'a RepositoryRef,
        credential: &'a Credential,
        draft: &'a PullRequestDraft,
    ) -> ProviderFuture<'a, PullRequest> {
        Box::pin(async move {
            let url = self.endpoint(repo, &["pulls"])?;
            let body = serde_json::json!({
                "title": draft.title,
                "head": draft.head,
                "base": draft.base,
                "body": draft.body,
            });
            Self::send_json(
                self.request(Method::POST, url, credential).json(&body),
                "open pull request",
            )
            .await
        })
    }
}
