use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use testgen_core::{Credential, PipelineError, PublishOutcome, PublishRequest, RepositoryRef};

use crate::provider::{FileCommit, PullRequestDraft, RepositoryProvider};

pub const DEFAULT_BRANCH_PREFIX: &str = "testgen";

pub const DEFAULT_PR_BODY: &str = "Adds a generated test for `{class_name}`.

Test case: {summary}

File: `{filename}`
";

/// Disambiguates branches created within the same second.
static BRANCH_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_branch_seq() -> u64 {
    BRANCH_SEQ.fetch_add(1, Ordering::Relaxed) + 1
}

/// `<prefix>/<stem>-<yyyymmddHHMMSS>-<seq>`, where `stem` is the lowercased
/// file stem with every run of non-alphanumerics replaced by `-`.
pub fn branch_name(prefix: &str, filename: &str, at: DateTime<Utc>, seq: u64) -> String {
    let file = filename.rsplit('/').next().unwrap_or(filename);
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };

    let mut slug = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "test" } else { slug };

    let leaf = format!("{slug}-{}-{seq}", at.format("%Y%m%d%H%M%S"));
    match prefix.trim_matches('/') {
        "" => leaf,
        prefix => format!("{prefix}/{leaf}"),
    }
}

/// Fill `{filename}`, `{class_name}` and `{summary}` in a PR body template.
pub fn render_pr_body(template: &str, filename: &str, class_name: &str, summary: &str) -> String {
    template
        .replace("{filename}", filename)
        .replace("{class_name}", class_name)
        .replace("{summary}", summary)
}

/// What the PR body describes, beyond the file itself.
#[derive(Debug, Clone, Default)]
pub struct PublishContext {
    pub class_name: String,
    pub summary: String,
}

/// Commits a generated test to a fresh branch and opens a pull request.
///
/// Steps run strictly in order: resolve the default branch, create the new
/// branch, commit the file, open the PR. Nothing is rolled back. A failure
/// after the branch exists names that branch in the returned error.
pub struct Publisher {
    provider: Arc<dyn RepositoryProvider>,
    branch_prefix: String,
    pr_body_template: String,
}

impl Publisher {
    pub fn new(provider: Arc<dyn RepositoryProvider>) -> Self {
        Self {
            provider,
            branch_prefix: DEFAULT_BRANCH_PREFIX.into(),
            pr_body_template: DEFAULT_PR_BODY.into(),
        }
    }

    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }

    pub fn with_pr_body(mut self, template: impl Into<String>) -> Self {
        self.pr_body_template = template.into();
        self
    }

    pub async fn publish(
        &self,
        repo: &RepositoryRef,
        credential: &Credential,
        request: &PublishRequest,
        context: &PublishContext,
    ) -> Result<PublishOutcome, PipelineError> {
        request.validate()?;
        let path = request.filename.trim().trim_start_matches('/');

        let base = self
            .provider
            .default_branch(repo, credential)
            .await
            .map_err(|e| e.into_publish(None))?;

        let branch = branch_name(&self.branch_prefix, path, Utc::now(), next_branch_seq());
        self.provider
            .create_branch(repo, credential, &branch, &base.sha)
            .await
            .map_err(|e| e.into_publish(None))?;
        tracing::info!(repo = %repo, branch = %branch, base = %base.name, "Created branch");

        let commit = FileCommit {
            branch: branch.clone(),
            parent_sha: base.sha.clone(),
            path: path.to_string(),
            content: request.content.clone(),
            message: request.commit_message.clone(),
        };
        let sha = self
            .provider
            .commit_file(repo, credential, &commit)
            .await
            .map_err(|e| orphaned(e, &branch))?;
        tracing::debug!(repo = %repo, branch = %branch, path, sha = %sha, "Committed file");

        let draft = PullRequestDraft {
            title: request.commit_message.clone(),
            head: branch.clone(),
            base: base.name,
            body: render_pr_body(
                &self.pr_body_template,
                path,
                &context.class_name,
                &context.summary,
            ),
        };
        let pr = self
            .provider
            .open_pull_request(repo, credential, &draft)
            .await
            .map_err(|e| orphaned(e, &branch))?;
        tracing::info!(repo = %repo, branch = %branch, number = pr.number, url = %pr.html_url, "Opened pull request");

        Ok(PublishOutcome {
            pull_request_url: pr.html_url,
            branch,
        })
    }
}

fn orphaned(error: PipelineError, branch: &str) -> PipelineError {
    tracing::warn!(branch, error = %error, "Publish failed after branch creation; branch left in place");
    error.into_publish(Some(branch.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeOp, InMemoryProvider};
    use chrono::TimeZone;
    use testgen_core::ErrorKind;

    fn repo() -> RepositoryRef {
        RepositoryRef::parse("acme/widgets").unwrap()
    }

    fn cred() -> Credential {
        Credential::new("ghp_test").unwrap()
    }

    fn request() -> PublishRequest {
        PublishRequest {
            filename: "WidgetTest.ts".into(),
            content: "test('resizes', () => {});".into(),
            commit_message: "Add test case for Widget".into(),
        }
    }

    fn context() -> PublishContext {
        PublishContext {
            class_name: "Widget".into(),
            summary: "resizes on update".into(),
        }
    }

    #[test]
    fn branch_name_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            branch_name("testgen", "WidgetTest.ts", at, 3),
            "testgen/widgettest-20260304050607-3"
        );
        assert_eq!(
            branch_name("bots/testgen/", "src/test/My_Widget Test.spec.ts", at, 1),
            "bots/testgen/my-widget-test-spec-20260304050607-1"
        );
        assert_eq!(branch_name("", "...", at, 9), "test-20260304050607-9");
    }

    #[test]
    fn branch_sequence_is_monotonic() {
        let a = next_branch_seq();
        let b = next_branch_seq();
        assert!(b > a);
    }

    #[test]
    fn pr_body_placeholders() {
        let body = render_pr_body(DEFAULT_PR_BODY, "WidgetTest.ts", "Widget", "resizes on update");
        assert!(body.contains("`Widget`"));
        assert!(body.contains("Test case: resizes on update"));
        assert!(body.contains("`WidgetTest.ts`"));
        assert!(!body.contains('{'));
    }

    #[tokio::test]
    async fn publishes_to_new_branch_and_opens_pr() {
        let provider = Arc::new(InMemoryProvider::new().with_repo("acme/widgets", &[]));
        let publisher = Publisher::new(provider.clone());
        let outcome = publisher
            .publish(&repo(), &cred(), &request(), &context())
            .await
            .unwrap();

        assert_eq!(outcome.pull_request_url, "https://github.com/acme/widgets/pull/1");
        assert!(outcome.branch.starts_with("testgen/widgettest-"));
        assert_eq!(
            provider.committed_file("acme/widgets", &outcome.branch, "WidgetTest.ts"),
            Some("test('resizes', () => {});".into())
        );
        let prs = provider.pull_requests("acme/widgets");
        assert_eq!(prs[0].title, "Add test case for Widget");
        assert_eq!(prs[0].base, "main");
        assert!(prs[0].body.contains("resizes on update"));
        assert_eq!(
            provider.calls(),
            vec![
                FakeOp::DefaultBranch,
                FakeOp::CreateBranch,
                FakeOp::CommitFile,
                FakeOp::OpenPullRequest
            ]
        );
    }

    #[tokio::test]
    async fn repeated_publishes_use_distinct_branches() {
        let provider = Arc::new(InMemoryProvider::new().with_repo("acme/widgets", &[]));
        let publisher = Publisher::new(provider.clone()).with_branch_prefix("ci");
        let first = publisher
            .publish(&repo(), &cred(), &request(), &context())
            .await
            .unwrap();
        let second = publisher
            .publish(&repo(), &cred(), &request(), &context())
            .await
            .unwrap();
        assert_ne!(first.branch, second.branch);
        assert_eq!(provider.branches("acme/widgets").len(), 2);
    }

    #[tokio::test]
    async fn empty_content_fails_before_any_call() {
        let provider = Arc::new(InMemoryProvider::new().with_repo("acme/widgets", &[]));
        let mut req = request();
        req.content.clear();
        let err = Publisher::new(provider.clone())
            .publish(&repo(), &cred(), &req, &context())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn failure_before_branch_has_no_orphan() {
        let provider = Arc::new(InMemoryProvider::new().with_repo("acme/widgets", &[]));
        provider.fail_on(FakeOp::CreateBranch, PipelineError::Auth("read-only token".into()));
        let err = Publisher::new(provider.clone())
            .publish(&repo(), &cred(), &request(), &context())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Publish);
        assert_eq!(err.orphaned_branch(), None);
        assert!(err.to_string().contains("read-only token"));
    }

    #[tokio::test]
    async fn commit_failure_names_created_branch() {
        let provider = Arc::new(InMemoryProvider::new().with_repo("acme/widgets", &[]));
        provider.fail_on(FakeOp::CommitFile, PipelineError::Transient("502 Bad Gateway".into()));
        let err = Publisher::new(provider.clone())
            .publish(&repo(), &cred(), &request(), &context())
            .await
            .unwrap_err();

        let branches = provider.branches("acme/widgets");
        assert_eq!(branches.len(), 1);
        assert_eq!(err.orphaned_branch(), Some(branches[0].as_str()));
        assert!(err.to_string().contains(&branches[0]));
        assert!(provider.pull_requests("acme/widgets").is_empty());
    }
}
