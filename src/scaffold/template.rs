//! Template source resolution: an explicit template URL, the module's own
//! `.scaffold` directory, or the bundled default template.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::fetch::Fetcher;
use super::source::{self, TagLookup};
use super::{ScratchSet, Stage};
use crate::error::ScaffoldError;

/// Conventional template subdirectory inside a fetched module.
pub const TEMPLATE_SUBDIR: &str = ".scaffold";

/// Template configuration stub; part of the template directory, never rendered
/// into the output.
pub const TEMPLATE_CONFIG_FILE: &str = "scaffold.yml";

pub const WRAPPER_TEMPLATE_FILE: &str = "wrapper.hcl";

pub const DEFAULT_TEMPLATE_CONFIG: &str = "\
# Variables declared by the default wrapper template. Override with --var.
variables:
  - name: source_url
    description: Resolved module source URL
    type: string
";

pub const DEFAULT_WRAPPER_TEMPLATE: &str = r#"# Wrapper generated by modwrap.
terraform {
  source = "{{ source_url }}"
}

inputs = {
  # ---------------------------------------------------------------------------
  # Required variables
  # ---------------------------------------------------------------------------
  {%- for var in required_variables %}
  # Description: {{ var.description }}
  # Type: {{ var.var_type }}
  {{ var.name }} = {{ var.default_value_placeholder }}  # TODO: fill in value
  {%- endfor %}

  # ---------------------------------------------------------------------------
  # Optional variables
  # Uncomment the ones you wish to set
  # ---------------------------------------------------------------------------
  {%- for var in optional_variables %}
  # Description: {{ var.description }}
  # Type: {{ var.var_type }}
  # {{ var.name }} = {{ var.default_value }}
  {%- endfor %}
}
"#;

/// Determine the template directory for rendering.
///
/// An explicit template URL goes through the same resolution as the module URL
/// (transport rewrite, ref pinning) and is fetched into a fresh scratch
/// directory; a fetch failure there is fatal. Without a template URL the
/// module's `.scaffold` directory is used when present, and the bundled
/// default template otherwise; that path never fails constructively.
pub async fn resolve_template(
    template_url: Option<&str>,
    module_dir: &Path,
    vars: &HashMap<String, String>,
    tags: &dyn TagLookup,
    fetcher: &dyn Fetcher,
    scratch: &mut ScratchSet,
) -> Result<PathBuf, ScaffoldError> {
    if let Some(raw) = template_url.filter(|raw| !raw.is_empty()) {
        let url = source::resolve(raw, vars, tags)
            .await
            .map_err(|e| ScaffoldError::InvalidTemplateUrl {
                url: raw.to_string(),
                reason: e.to_string(),
            })?;

        info!("Using template from {url}");

        let dest = scratch.create("modwrap-template", Stage::ResolveTemplate)?;
        fetcher
            .fetch(&dest, &url)
            .await
            .map_err(|source| ScaffoldError::FetchFailed {
                url: url.to_string(),
                stage: Stage::ResolveTemplate,
                source,
            })?;

        let template_dir = match url.subpath() {
            Some(subpath) => dest.join(subpath),
            None => dest,
        };
        if !template_dir.is_dir() {
            return Err(ScaffoldError::FetchFailed {
                url: url.to_string(),
                stage: Stage::ResolveTemplate,
                source: anyhow::anyhow!(
                    "template directory `{}` not present in fetched repository",
                    template_dir.display()
                ),
            });
        }
        return Ok(template_dir);
    }

    let conventional = module_dir.join(TEMPLATE_SUBDIR);
    if conventional.is_dir() {
        debug!("Using module-provided template directory {}", conventional.display());
        return Ok(conventional);
    }

    debug!("No template supplied, materializing the bundled default template");
    let dest = scratch.create("modwrap-default-template", Stage::ResolveTemplate)?;
    materialize_default_template(&dest).map_err(|source| ScaffoldError::Io {
        stage: Stage::ResolveTemplate,
        message: "failed to write default template".to_string(),
        source,
    })?;
    Ok(dest)
}

pub fn materialize_default_template(dir: &Path) -> std::io::Result<()> {
    std::fs::write(dir.join(WRAPPER_TEMPLATE_FILE), DEFAULT_WRAPPER_TEMPLATE)?;
    std::fs::write(dir.join(TEMPLATE_CONFIG_FILE), DEFAULT_TEMPLATE_CONFIG)
}
