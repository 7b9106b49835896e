//! Production fetch and tag-lookup collaborators, backed by git through the
//! subprocess layer.

use async_trait::async_trait;
use std::path::Path;

use super::source::{SourceUrl, TagLookup, REF_PARAM};
use crate::subprocess::{GitRunner, SubprocessManager};

/// Downloads a resolved source URL into a destination directory. At-least-once
/// best-effort; no retries at this layer.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, dest: &Path, url: &SourceUrl) -> anyhow::Result<()>;
}

pub struct GitFetcher {
    subprocess: SubprocessManager,
}

impl GitFetcher {
    pub fn new(subprocess: SubprocessManager) -> Self {
        Self { subprocess }
    }
}

#[async_trait]
impl Fetcher for GitFetcher {
    async fn fetch(&self, dest: &Path, url: &SourceUrl) -> anyhow::Result<()> {
        let repo_url = url.repo_root_url();
        let reference = url.query(REF_PARAM);
        self.subprocess
            .git()
            .clone_repository(&repo_url, reference, dest)
            .await?;
        Ok(())
    }
}

pub struct GitTagLookup {
    subprocess: SubprocessManager,
}

impl GitTagLookup {
    pub fn new(subprocess: SubprocessManager) -> Self {
        Self { subprocess }
    }
}

#[async_trait]
impl TagLookup for GitTagLookup {
    async fn latest_release_tag(&self, repo_root: &str) -> anyhow::Result<Option<String>> {
        Ok(self.subprocess.git().latest_release_tag(repo_root).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_git_fetcher_clones_repo_root_with_pinned_ref() {
        let (subprocess, mut mock) = SubprocessManager::mock();
        mock.expect_command("git")
            .with_args(|args| {
                args.first().map(String::as_str) == Some("clone")
                    && args.windows(2).any(|w| w == ["--branch", "v1.2.0"])
                    && args.iter().any(|a| a == "https://example.com/org/repo.git")
            })
            .returns_success()
            .finish();

        let url =
            SourceUrl::parse("git::https://example.com/org/repo.git//modules/foo?ref=v1.2.0")
                .unwrap();
        let dest = TempDir::new().unwrap();

        GitFetcher::new(subprocess)
            .fetch(dest.path(), &url)
            .await
            .unwrap();
        assert!(mock.verify_called("git", 1));
    }

    #[tokio::test]
    async fn test_git_tag_lookup_propagates_failure() {
        let (subprocess, mut mock) = SubprocessManager::mock();
        mock.expect_command("git")
            .returns_stderr("fatal: could not read from remote repository")
            .returns_exit_code(128)
            .finish();

        let result = GitTagLookup::new(subprocess)
            .latest_release_tag("https://example.com/org/repo.git")
            .await;
        assert!(result.is_err());
    }
}
