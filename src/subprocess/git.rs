use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::builder::ProcessCommandBuilder;
use super::error::ProcessError;
use super::runner::{ProcessOutput, ProcessRunner};

#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Latest release tag of the remote repository, or `None` when the
    /// repository carries no release-shaped tags.
    async fn latest_release_tag(&self, repo_url: &str) -> Result<Option<String>, ProcessError>;

    /// Shallow-clone `repo_url` into `dest`, checking out `reference` when given.
    async fn clone_repository(
        &self,
        repo_url: &str,
        reference: Option<&str>,
        dest: &Path,
    ) -> Result<(), ProcessError>;
}

pub struct GitRunnerImpl {
    runner: Arc<dyn ProcessRunner>,
}

/// Parse one `git ls-remote --tags --refs` line (format: "<oid>\trefs/tags/<tag>").
/// Returns the tag name if the line is a tag ref.
#[inline]
fn parse_ls_remote_line(line: &str) -> Option<&str> {
    line.split('\t').nth(1)?.strip_prefix("refs/tags/")
}

/// Parse full `ls-remote` output into tag names. Pure, performs no I/O.
fn parse_ls_remote_tags(output: &str) -> Vec<&str> {
    output.lines().filter_map(parse_ls_remote_line).collect()
}

/// Pick the highest release tag. A release tag is `vX.Y.Z` or `X.Y.Z` with no
/// pre-release component; anything else (branch-style tags, RCs) is ignored.
fn select_latest_release<'a>(tags: &[&'a str]) -> Option<&'a str> {
    tags.iter()
        .filter_map(|tag| {
            let version = semver::Version::parse(tag.trim_start_matches('v')).ok()?;
            if version.pre.is_empty() {
                Some((version, *tag))
            } else {
                None
            }
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, tag)| tag)
}

fn check_command_success(output: &ProcessOutput, command: String) -> Result<(), ProcessError> {
    if output.status.success() {
        Ok(())
    } else {
        Err(ProcessError::CommandFailed {
            command,
            code: output.status.code().unwrap_or(-1),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

impl GitRunnerImpl {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl GitRunner for GitRunnerImpl {
    async fn latest_release_tag(&self, repo_url: &str) -> Result<Option<String>, ProcessError> {
        let command = ProcessCommandBuilder::new("git")
            .args(["ls-remote", "--tags", "--refs", repo_url])
            .env("GIT_TERMINAL_PROMPT", "0")
            .build();
        let line = command.display_line();

        let output = self.runner.run(command).await?;
        check_command_success(&output, line)?;

        let tags = parse_ls_remote_tags(&output.stdout);
        Ok(select_latest_release(&tags).map(str::to_string))
    }

    async fn clone_repository(
        &self,
        repo_url: &str,
        reference: Option<&str>,
        dest: &Path,
    ) -> Result<(), ProcessError> {
        let mut builder = ProcessCommandBuilder::new("git")
            .args(["clone", "--depth", "1"])
            .env("GIT_TERMINAL_PROMPT", "0");

        if let Some(reference) = reference {
            builder = builder.args(["--branch", reference]);
        }

        let command = builder
            .arg(repo_url)
            .arg(dest.to_string_lossy().as_ref())
            .build();
        let line = command.display_line();

        let output = self.runner.run(command).await?;
        check_command_success(&output, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::mock::MockProcessRunner;
    use tempfile::TempDir;

    #[test]
    fn test_parse_ls_remote_tags() {
        let output = concat!(
            "8b1f3c\trefs/tags/v0.1.0\n",
            "9c2a4d\trefs/tags/v0.2.0\n",
            "malformed line\n",
            "aa11bb\trefs/heads/main\n",
        );
        let tags = parse_ls_remote_tags(output);
        assert_eq!(tags, vec!["v0.1.0", "v0.2.0"]);
    }

    #[test]
    fn test_select_latest_release_orders_by_semver() {
        let tags = vec!["v0.9.0", "v0.10.0", "v0.2.1"];
        assert_eq!(select_latest_release(&tags), Some("v0.10.0"));
    }

    #[test]
    fn test_select_latest_release_skips_prereleases_and_noise() {
        let tags = vec!["v1.0.0-rc1", "nightly", "1.2.0", "v1.1.0"];
        assert_eq!(select_latest_release(&tags), Some("1.2.0"));
    }

    #[test]
    fn test_select_latest_release_empty() {
        assert_eq!(select_latest_release(&[]), None);
        assert_eq!(select_latest_release(&["not-a-version"]), None);
    }

    #[tokio::test]
    async fn test_latest_release_tag_success() {
        let mut mock_runner = MockProcessRunner::new();
        mock_runner
            .expect_command("git")
            .with_args(|args| args.first().map(String::as_str) == Some("ls-remote"))
            .returns_stdout("1111\trefs/tags/v1.2.0\n2222\trefs/tags/v1.1.0\n")
            .returns_success()
            .finish();

        let git = GitRunnerImpl::new(Arc::new(mock_runner));
        let tag = git
            .latest_release_tag("https://example.com/org/repo.git")
            .await
            .unwrap();
        assert_eq!(tag, Some("v1.2.0".to_string()));
    }

    #[tokio::test]
    async fn test_latest_release_tag_no_tags() {
        let mut mock_runner = MockProcessRunner::new();
        mock_runner
            .expect_command("git")
            .returns_stdout("")
            .returns_success()
            .finish();

        let git = GitRunnerImpl::new(Arc::new(mock_runner));
        let tag = git
            .latest_release_tag("https://example.com/org/repo.git")
            .await
            .unwrap();
        assert_eq!(tag, None);
    }

    #[tokio::test]
    async fn test_latest_release_tag_failure_includes_stderr() {
        let mut mock_runner = MockProcessRunner::new();
        mock_runner
            .expect_command("git")
            .returns_stderr("fatal: repository not found")
            .returns_exit_code(128)
            .finish();

        let git = GitRunnerImpl::new(Arc::new(mock_runner));
        let err = git
            .latest_release_tag("https://example.com/org/missing.git")
            .await
            .unwrap_err();

        match err {
            ProcessError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 128);
                assert!(stderr.contains("repository not found"));
            }
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clone_repository_passes_branch_for_pinned_ref() {
        let mut mock_runner = MockProcessRunner::new();
        mock_runner
            .expect_command("git")
            .with_args(|args| {
                args.first().map(String::as_str) == Some("clone")
                    && args.windows(2).any(|w| w == ["--branch", "v1.2.0"])
            })
            .returns_success()
            .finish();

        let git = GitRunnerImpl::new(Arc::new(mock_runner.clone()));
        let dest = TempDir::new().unwrap();
        git.clone_repository(
            "https://example.com/org/repo.git",
            Some("v1.2.0"),
            dest.path(),
        )
        .await
        .unwrap();

        assert!(mock_runner.verify_called("git", 1));
    }
}
