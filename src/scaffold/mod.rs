//! The scaffolding pipeline: resolve a module source URL, fetch the module,
//! classify its declared variables, resolve a template, and render a wrapper
//! configuration into the target directory.
//!
//! Stages run strictly sequentially:
//! Validate → ResolveSource → Fetch → ExtractVariables → Classify →
//! ResolveTemplate → BuildEnvironment → Render → PostFormat. Fatal errors
//! abort with the failing stage attached; a missed ref lookup or a skipped
//! transport rewrite only degrades the result with a warning. Scratch
//! directories are released on every exit path.

pub mod extract;
pub mod fetch;
pub mod render;
pub mod source;
pub mod template;
pub mod vars;

#[cfg(test)]
mod tests;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::ScaffoldError;
use crate::subprocess::SubprocessManager;
use extract::{HclVariableParser, VariableParser};
use fetch::{Fetcher, GitFetcher, GitTagLookup};
use render::{Formatter, HclFormatter, TemplateEngine, TeraRenderer};
use source::{SourceUrl, TagLookup};
use vars::VariableDeclaration;

/// Reserved environment keys injected by the pipeline. These are the only
/// keys allowed to shadow user-supplied variables.
pub const REQUIRED_VARIABLES_KEY: &str = "required_variables";
pub const OPTIONAL_VARIABLES_KEY: &str = "optional_variables";
pub const SOURCE_URL_KEY: &str = "source_url";

/// Pipeline stages, attached to fatal errors for diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    ResolveSource,
    Fetch,
    ExtractVariables,
    Classify,
    ResolveTemplate,
    BuildEnvironment,
    Render,
    PostFormat,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "input validation",
            Stage::ResolveSource => "source URL resolution",
            Stage::Fetch => "module fetch",
            Stage::ExtractVariables => "variable extraction",
            Stage::Classify => "variable classification",
            Stage::ResolveTemplate => "template resolution",
            Stage::BuildEnvironment => "environment assembly",
            Stage::Render => "rendering",
            Stage::PostFormat => "output formatting",
        };
        write!(f, "{name}")
    }
}

pub struct ScaffoldRequest {
    pub source_url: String,
    pub template_url: Option<String>,
    pub target_dir: PathBuf,
    pub var_flags: Vec<String>,
    pub var_files: Vec<PathBuf>,
}

/// The external collaborators of the pipeline, behind traits so tests can
/// substitute each one.
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub tags: Arc<dyn TagLookup>,
    pub variables: Arc<dyn VariableParser>,
    pub engine: Arc<dyn TemplateEngine>,
    pub formatter: Arc<dyn Formatter>,
}

impl Collaborators {
    pub fn production() -> Self {
        let subprocess = SubprocessManager::production();
        Self {
            fetcher: Arc::new(GitFetcher::new(subprocess.clone())),
            tags: Arc::new(GitTagLookup::new(subprocess)),
            variables: Arc::new(HclVariableParser),
            engine: Arc::new(TeraRenderer),
            formatter: Arc::new(HclFormatter),
        }
    }
}

/// Scratch directories owned by one pipeline run. Every acquisition pairs with
/// a release: dropping the set removes every directory, last acquired first,
/// on success, failure, and unwind alike.
#[derive(Default)]
pub struct ScratchSet {
    dirs: Vec<TempDir>,
}

impl ScratchSet {
    pub fn create(&mut self, prefix: &str, stage: Stage) -> Result<PathBuf, ScaffoldError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|source| ScaffoldError::Io {
                stage,
                message: "failed to create scratch directory".to_string(),
                source,
            })?;
        let path = dir.path().to_path_buf();
        debug!("Created scratch directory {}", path.display());
        self.dirs.push(dir);
        Ok(path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.dirs.iter().map(|d| d.path().to_path_buf()).collect()
    }
}

impl Drop for ScratchSet {
    fn drop(&mut self) {
        while let Some(dir) = self.dirs.pop() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to clean up scratch directory {}: {e}", path.display());
            }
        }
    }
}

/// Run the scaffolding pipeline. Scratch directories created along the way are
/// removed unconditionally before this returns.
pub async fn run(
    request: &ScaffoldRequest,
    collaborators: &Collaborators,
) -> Result<(), ScaffoldError> {
    let mut scratch = ScratchSet::default();
    let result = run_stages(request, collaborators, &mut scratch).await;
    drop(scratch);
    result
}

async fn run_stages(
    request: &ScaffoldRequest,
    collaborators: &Collaborators,
    scratch: &mut ScratchSet,
) -> Result<(), ScaffoldError> {
    validate(request)?;

    let user_vars = vars::parse_user_vars(&request.var_flags, &request.var_files)?;

    let url = source::resolve(&request.source_url, &user_vars, collaborators.tags.as_ref())
        .await
        .map_err(|e| ScaffoldError::InvalidSourceUrl {
            url: request.source_url.clone(),
            reason: e.to_string(),
        })?;

    info!(
        "Scaffolding module {url} into {}",
        request.target_dir.display()
    );

    let fetch_dir = scratch.create("modwrap-module", Stage::Fetch)?;
    collaborators
        .fetcher
        .fetch(&fetch_dir, &url)
        .await
        .map_err(|source| ScaffoldError::FetchFailed {
            url: url.to_string(),
            stage: Stage::Fetch,
            source,
        })?;

    let module_dir = match url.subpath() {
        Some(subpath) => fetch_dir.join(subpath),
        None => fetch_dir,
    };
    if !module_dir.is_dir() {
        return Err(ScaffoldError::FetchFailed {
            url: url.to_string(),
            stage: Stage::Fetch,
            source: anyhow::anyhow!(
                "module subpath `{}` not present in fetched repository",
                url.subpath().unwrap_or_default()
            ),
        });
    }

    let declarations = collaborators.variables.parse(&module_dir).map_err(|source| {
        ScaffoldError::VariableParseFailed {
            dir: module_dir.clone(),
            source,
        }
    })?;

    let (required, optional) = vars::classify(declarations);
    debug!(
        "Classified {} required and {} optional variables",
        required.len(),
        optional.len()
    );

    let template_dir = template::resolve_template(
        request.template_url.as_deref(),
        &module_dir,
        &user_vars,
        collaborators.tags.as_ref(),
        collaborators.fetcher.as_ref(),
        scratch,
    )
    .await?;

    let env = build_environment(&user_vars, &required, &optional, &url);

    info!("Rendering wrapper into {}", request.target_dir.display());
    collaborators
        .engine
        .render(&template_dir, &request.target_dir, &env)
        .map_err(|source| ScaffoldError::RenderFailed {
            dir: template_dir.clone(),
            source,
        })?;

    collaborators
        .formatter
        .format(&request.target_dir)
        .map_err(|source| ScaffoldError::FormatFailed {
            dir: request.target_dir.clone(),
            source,
        })?;

    info!("Scaffolding completed");
    Ok(())
}

fn validate(request: &ScaffoldRequest) -> Result<(), ScaffoldError> {
    if request.source_url.trim().is_empty() {
        return Err(ScaffoldError::MissingSourceUrl);
    }

    match is_directory_empty(&request.target_dir) {
        Ok(true) => {}
        // Advisory only: scaffolding into a populated directory is allowed.
        Ok(false) => warn!(
            "The target directory {} is not empty",
            request.target_dir.display()
        ),
        Err(source) => {
            return Err(ScaffoldError::Io {
                stage: Stage::Validate,
                message: format!(
                    "cannot read target directory {}",
                    request.target_dir.display()
                ),
                source,
            })
        }
    }

    Ok(())
}

fn is_directory_empty(dir: &Path) -> std::io::Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}

/// Merge user variables, the classified declaration lists, and the resolved
/// source URL into one render environment. User variables go in first; only
/// the three reserved keys may shadow them.
fn build_environment(
    user_vars: &std::collections::HashMap<String, String>,
    required: &[VariableDeclaration],
    optional: &[VariableDeclaration],
    url: &SourceUrl,
) -> tera::Context {
    let mut env = tera::Context::new();
    for (name, value) in user_vars {
        env.insert(name, value);
    }
    env.insert(REQUIRED_VARIABLES_KEY, required);
    env.insert(OPTIONAL_VARIABLES_KEY, optional);
    env.insert(SOURCE_URL_KEY, &url.to_string());
    env
}
