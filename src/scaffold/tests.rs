use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use super::extract::{HclVariableParser, VariableParser};
use super::fetch::Fetcher;
use super::render::{Formatter, HclFormatter, TemplateEngine, TeraRenderer};
use super::source::{SourceUrl, TagLookup};
use super::vars::VariableDeclaration;
use super::*;

const MODULE_TF: &str = r#"
variable "bucket_name" {
  description = "Bucket to create"
  type        = string
}

variable "acl" {
  description = "Canned ACL"
  type        = string
  default     = "private"
}
"#;

struct StaticTags(Option<&'static str>);

#[async_trait]
impl TagLookup for StaticTags {
    async fn latest_release_tag(&self, _repo_root: &str) -> anyhow::Result<Option<String>> {
        Ok(self.0.map(str::to_string))
    }
}

/// Writes a fixed file set into every fetch destination; optionally fails on
/// the n-th fetch (0 = module fetch, 1 = template fetch).
struct ScriptedFetcher {
    files: Vec<(String, String)>,
    fail_on_call: Option<usize>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            fail_on_call: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, dest: &Path, _url: &SourceUrl) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call) {
            anyhow::bail!("simulated fetch failure");
        }
        for (relative, content) in &self.files {
            let path = dest.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        Ok(())
    }
}

struct FailingParser;

impl VariableParser for FailingParser {
    fn parse(&self, _dir: &Path) -> anyhow::Result<Vec<VariableDeclaration>> {
        anyhow::bail!("simulated parse failure")
    }
}

struct FailingEngine;

impl TemplateEngine for FailingEngine {
    fn render(
        &self,
        _template_dir: &Path,
        _output_dir: &Path,
        _env: &tera::Context,
    ) -> anyhow::Result<()> {
        anyhow::bail!("simulated render failure")
    }
}

struct FailingFormatter;

impl Formatter for FailingFormatter {
    fn format(&self, _target_dir: &Path) -> anyhow::Result<()> {
        anyhow::bail!("simulated format failure")
    }
}

fn collaborators(fetcher: ScriptedFetcher, tag: Option<&'static str>) -> Collaborators {
    Collaborators {
        fetcher: Arc::new(fetcher),
        tags: Arc::new(StaticTags(tag)),
        variables: Arc::new(HclVariableParser),
        engine: Arc::new(TeraRenderer),
        formatter: Arc::new(HclFormatter),
    }
}

fn request(source: &str, template: Option<&str>, target: &Path) -> ScaffoldRequest {
    ScaffoldRequest {
        source_url: source.to_string(),
        template_url: template.map(str::to_string),
        target_dir: target.to_path_buf(),
        var_flags: vec![],
        var_files: vec![],
    }
}

/// Run the stages with an externally owned scratch set so the test can check
/// that every scratch path is gone after cleanup.
async fn run_and_collect_scratch(
    req: &ScaffoldRequest,
    collab: &Collaborators,
) -> (Result<(), ScaffoldError>, Vec<PathBuf>) {
    let mut scratch = ScratchSet::default();
    let result = run_stages(req, collab, &mut scratch).await;
    let paths = scratch.paths();
    drop(scratch);
    (result, paths)
}

fn assert_all_removed(paths: &[PathBuf]) {
    for path in paths {
        assert!(!path.exists(), "scratch dir {} survived cleanup", path.display());
    }
}

#[tokio::test]
async fn test_pipeline_success_with_default_template() {
    let target = TempDir::new().unwrap();
    let collab = collaborators(
        ScriptedFetcher::with_files(&[("modules/foo/main.tf", MODULE_TF)]),
        Some("v1.2.0"),
    );
    let req = request(
        "git::https://example.com/org/repo.git//modules/foo",
        None,
        target.path(),
    );

    run(&req, &collab).await.unwrap();

    let wrapper = std::fs::read_to_string(target.path().join("wrapper.hcl")).unwrap();
    assert!(wrapper
        .contains("source = \"git::https://example.com/org/repo.git//modules/foo?ref=v1.2.0\""));
    assert!(wrapper.contains("bucket_name = \"\""));
    assert!(wrapper.contains("# acl = \"private\""));
    // The template config stub stays out of the output.
    assert!(!target.path().join("scaffold.yml").exists());
}

#[tokio::test]
async fn test_scratch_dirs_removed_on_success() {
    let target = TempDir::new().unwrap();
    let collab = collaborators(
        ScriptedFetcher::with_files(&[("main.tf", MODULE_TF)]),
        None,
    );
    let req = request("git::https://example.com/org/repo.git", None, target.path());

    let (result, scratch_paths) = run_and_collect_scratch(&req, &collab).await;
    result.unwrap();

    // Module fetch plus default-template scratch.
    assert_eq!(scratch_paths.len(), 2);
    assert_all_removed(&scratch_paths);
}

#[tokio::test]
async fn test_missing_source_url() {
    let target = TempDir::new().unwrap();
    let collab = collaborators(ScriptedFetcher::with_files(&[]), None);
    let req = request("  ", None, target.path());

    let err = run(&req, &collab).await.unwrap_err();
    assert!(matches!(err, ScaffoldError::MissingSourceUrl));
}

#[tokio::test]
async fn test_invalid_source_url() {
    let target = TempDir::new().unwrap();
    let collab = collaborators(ScriptedFetcher::with_files(&[]), None);
    let req = request("not a url at all", None, target.path());

    let err = run(&req, &collab).await.unwrap_err();
    assert!(matches!(err, ScaffoldError::InvalidSourceUrl { .. }));
}

#[tokio::test]
async fn test_fetch_failure_cleans_scratch() {
    let target = TempDir::new().unwrap();
    let collab = collaborators(
        ScriptedFetcher::with_files(&[("main.tf", MODULE_TF)]).failing_on_call(0),
        None,
    );
    let req = request("git::https://example.com/org/repo.git", None, target.path());

    let (result, scratch_paths) = run_and_collect_scratch(&req, &collab).await;
    match result.unwrap_err() {
        ScaffoldError::FetchFailed { stage, .. } => assert_eq!(stage, Stage::Fetch),
        other => panic!("Expected FetchFailed, got {other}"),
    }
    assert!(!scratch_paths.is_empty());
    assert_all_removed(&scratch_paths);
}

#[tokio::test]
async fn test_missing_module_subpath_is_a_fetch_failure() {
    let target = TempDir::new().unwrap();
    // The fetched repository has no modules/foo directory.
    let collab = collaborators(
        ScriptedFetcher::with_files(&[("main.tf", MODULE_TF)]),
        None,
    );
    let req = request(
        "git::https://example.com/org/repo.git//modules/foo",
        None,
        target.path(),
    );

    let (result, scratch_paths) = run_and_collect_scratch(&req, &collab).await;
    assert!(matches!(
        result.unwrap_err(),
        ScaffoldError::FetchFailed { stage: Stage::Fetch, .. }
    ));
    assert_all_removed(&scratch_paths);
}

#[tokio::test]
async fn test_variable_parse_failure_cleans_scratch() {
    let target = TempDir::new().unwrap();
    let mut collab = collaborators(
        ScriptedFetcher::with_files(&[("main.tf", MODULE_TF)]),
        None,
    );
    collab.variables = Arc::new(FailingParser);
    let req = request("git::https://example.com/org/repo.git", None, target.path());

    let (result, scratch_paths) = run_and_collect_scratch(&req, &collab).await;
    assert!(matches!(
        result.unwrap_err(),
        ScaffoldError::VariableParseFailed { .. }
    ));
    assert_all_removed(&scratch_paths);
}

#[tokio::test]
async fn test_template_fetch_failure_cleans_scratch() {
    let target = TempDir::new().unwrap();
    let collab = collaborators(
        ScriptedFetcher::with_files(&[("main.tf", MODULE_TF)]).failing_on_call(1),
        None,
    );
    let mut req = request("git::https://example.com/org/repo.git", None, target.path());
    req.template_url = Some("git::https://example.com/org/templates.git".to_string());

    let (result, scratch_paths) = run_and_collect_scratch(&req, &collab).await;
    match result.unwrap_err() {
        ScaffoldError::FetchFailed { stage, .. } => assert_eq!(stage, Stage::ResolveTemplate),
        other => panic!("Expected FetchFailed, got {other}"),
    }
    // Module scratch plus template scratch were both created, both removed.
    assert_eq!(scratch_paths.len(), 2);
    assert_all_removed(&scratch_paths);
}

#[tokio::test]
async fn test_render_failure_cleans_scratch_and_leaves_target_untouched() {
    let target = TempDir::new().unwrap();
    let mut collab = collaborators(
        ScriptedFetcher::with_files(&[("main.tf", MODULE_TF)]),
        None,
    );
    collab.engine = Arc::new(FailingEngine);
    let req = request("git::https://example.com/org/repo.git", None, target.path());

    let (result, scratch_paths) = run_and_collect_scratch(&req, &collab).await;
    assert!(matches!(result.unwrap_err(), ScaffoldError::RenderFailed { .. }));
    assert_all_removed(&scratch_paths);
    assert!(std::fs::read_dir(target.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_format_failure_is_fatal() {
    let target = TempDir::new().unwrap();
    let mut collab = collaborators(
        ScriptedFetcher::with_files(&[("main.tf", MODULE_TF)]),
        None,
    );
    collab.formatter = Arc::new(FailingFormatter);
    let req = request("git::https://example.com/org/repo.git", None, target.path());

    let (result, scratch_paths) = run_and_collect_scratch(&req, &collab).await;
    assert!(matches!(result.unwrap_err(), ScaffoldError::FormatFailed { .. }));
    assert_all_removed(&scratch_paths);
    // Rendered output stays as the render stage left it.
    assert!(target.path().join("wrapper.hcl").exists());
}

#[tokio::test]
async fn test_module_provided_template_directory_is_used() {
    let target = TempDir::new().unwrap();
    let collab = collaborators(
        ScriptedFetcher::with_files(&[
            ("main.tf", MODULE_TF),
            (".scaffold/custom.hcl", "source is {{ source_url }}\n"),
        ]),
        Some("v2.0.0"),
    );
    let req = request("git::https://example.com/org/repo.git", None, target.path());

    run(&req, &collab).await.unwrap();

    let custom = std::fs::read_to_string(target.path().join("custom.hcl")).unwrap();
    assert_eq!(
        custom,
        "source is git::https://example.com/org/repo.git?ref=v2.0.0\n"
    );
    assert!(!target.path().join("wrapper.hcl").exists());
}

#[tokio::test]
async fn test_user_vars_reach_the_render_environment() {
    let target = TempDir::new().unwrap();
    let collab = collaborators(
        ScriptedFetcher::with_files(&[
            ("main.tf", MODULE_TF),
            (".scaffold/env.hcl", "environment = \"{{ Environment }}\"\n"),
        ]),
        None,
    );
    let mut req = request("git::https://example.com/org/repo.git", None, target.path());
    req.var_flags = vec!["Environment=prod".to_string()];

    run(&req, &collab).await.unwrap();

    let rendered = std::fs::read_to_string(target.path().join("env.hcl")).unwrap();
    assert_eq!(rendered, "environment = \"prod\"\n");
}

#[tokio::test]
async fn test_explicit_ref_override_wins_over_discovered_tag() {
    let target = TempDir::new().unwrap();
    let collab = collaborators(
        ScriptedFetcher::with_files(&[("main.tf", MODULE_TF)]),
        Some("v1.0.0"),
    );
    let mut req = request("git::https://example.com/org/repo.git", None, target.path());
    req.var_flags = vec!["Ref=v9.9.9".to_string()];

    run(&req, &collab).await.unwrap();

    let wrapper = std::fs::read_to_string(target.path().join("wrapper.hcl")).unwrap();
    assert!(wrapper.contains("?ref=v9.9.9"));
    assert!(!wrapper.contains("v1.0.0"));
}

#[tokio::test]
async fn test_nonempty_target_directory_only_warns() {
    let target = TempDir::new().unwrap();
    std::fs::write(target.path().join("existing.txt"), "already here").unwrap();

    let collab = collaborators(
        ScriptedFetcher::with_files(&[("main.tf", MODULE_TF)]),
        None,
    );
    let req = request("git::https://example.com/org/repo.git", None, target.path());

    run(&req, &collab).await.unwrap();

    assert!(target.path().join("existing.txt").exists());
    assert!(target.path().join("wrapper.hcl").exists());
}

#[tokio::test]
async fn test_missing_tag_leaves_source_unpinned() {
    let target = TempDir::new().unwrap();
    let collab = collaborators(
        ScriptedFetcher::with_files(&[("main.tf", MODULE_TF)]),
        None,
    );
    let req = request("git::https://example.com/org/repo.git", None, target.path());

    run(&req, &collab).await.unwrap();

    let wrapper = std::fs::read_to_string(target.path().join("wrapper.hcl")).unwrap();
    assert!(wrapper.contains("source = \"git::https://example.com/org/repo.git\""));
    assert!(!wrapper.contains("?ref="));
}
