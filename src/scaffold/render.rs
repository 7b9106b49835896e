//! Rendering collaborators: the tera-backed template engine and the
//! deterministic post-render formatter.

use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use super::template::TEMPLATE_CONFIG_FILE;

/// Renders every file of a template directory into the output directory,
/// preserving relative paths.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, template_dir: &Path, output_dir: &Path, env: &tera::Context)
        -> anyhow::Result<()>;
}

pub struct TeraRenderer;

impl TemplateEngine for TeraRenderer {
    fn render(
        &self,
        template_dir: &Path,
        output_dir: &Path,
        env: &tera::Context,
    ) -> anyhow::Result<()> {
        for entry in WalkDir::new(template_dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            // The config stub describes the template; it is not output.
            if entry.file_name() == TEMPLATE_CONFIG_FILE {
                continue;
            }

            let relative = entry.path().strip_prefix(template_dir)?;
            let content = std::fs::read_to_string(entry.path())?;
            let rendered = tera::Tera::one_off(&content, env, false)?;

            let target = output_dir.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, rendered)?;
            debug!("Rendered {} -> {}", relative.display(), target.display());
        }
        Ok(())
    }
}

/// Deterministic formatting pass over rendered output, applied once after
/// rendering. Failure here is fatal: malformed output is worse than none.
pub trait Formatter: Send + Sync {
    fn format(&self, target_dir: &Path) -> anyhow::Result<()>;
}

/// Normalizes whitespace in generated `.hcl` files: trailing whitespace is
/// stripped, blank-line runs collapse to one, and the file ends with exactly
/// one newline.
pub struct HclFormatter;

impl Formatter for HclFormatter {
    fn format(&self, target_dir: &Path) -> anyhow::Result<()> {
        for entry in WalkDir::new(target_dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("hcl") {
                continue;
            }

            let content = std::fs::read_to_string(entry.path())?;
            let formatted = normalize_whitespace(&content);
            if formatted != content {
                std::fs::write(entry.path(), formatted)?;
                debug!("Formatted {}", entry.path().display());
            }
        }
        Ok(())
    }
}

/// Pure whitespace normalization. Idempotent.
fn normalize_whitespace(content: &str) -> String {
    let mut lines = Vec::new();
    let mut previous_blank = false;

    for line in content.lines() {
        let line = line.trim_end();
        let blank = line.is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        lines.push(line);
    }

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    while lines.first().is_some_and(|line| line.is_empty()) {
        lines.remove(0);
    }

    let mut formatted = lines.join("\n");
    formatted.push('\n');
    formatted
}
