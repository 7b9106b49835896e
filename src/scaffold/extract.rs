//! Extraction of `variable` declarations from a fetched module's source files.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use super::vars::VariableDeclaration;

/// Collaborator reading the variables a module declares. Discovery order is
/// file order (lexicographic) then declaration order within a file.
pub trait VariableParser: Send + Sync {
    fn parse(&self, dir: &Path) -> anyhow::Result<Vec<VariableDeclaration>>;
}

static VARIABLE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*variable\s+"([^"]+)"\s*\{"#).unwrap());
static DESCRIPTION_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*description\s*=\s*"((?:[^"\\]|\\.)*)""#).unwrap());
static TYPE_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*type\s*=\s*(.+)$").unwrap());
static DEFAULT_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*default\s*=\s*").unwrap());

/// Parses `variable "name" { ... }` blocks out of the module's root `.tf`
/// files with compiled patterns. Not a full HCL parser; it understands the
/// declaration subset that matters for classification.
pub struct HclVariableParser;

impl VariableParser for HclVariableParser {
    fn parse(&self, dir: &Path) -> anyhow::Result<Vec<VariableDeclaration>> {
        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("tf"))
            .collect();
        files.sort();

        let mut declarations = Vec::new();
        for file in files {
            let content = std::fs::read_to_string(&file)?;
            declarations.extend(parse_declarations(&content));
        }
        Ok(declarations)
    }
}

/// Parse every variable block in one file's content. Pure, performs no I/O.
fn parse_declarations(content: &str) -> Vec<VariableDeclaration> {
    VARIABLE_HEADER
        .captures_iter(content)
        .filter_map(|captures| {
            let header = captures.get(0)?;
            let name = captures.get(1)?.as_str();
            let open_brace = header.end() - 1;
            let body = block_body(content, open_brace)?;
            Some(parse_block(name, body))
        })
        .collect()
}

/// The text between a block's braces, located by depth counting from the
/// opening brace.
fn block_body(content: &str, open_brace: usize) -> Option<&str> {
    let mut depth = 0usize;
    for (offset, ch) in content[open_brace..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[open_brace + 1..open_brace + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_block(name: &str, body: &str) -> VariableDeclaration {
    let description = DESCRIPTION_ATTR
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    let var_type = TYPE_ATTR
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    // A missing default is recorded as the empty string; that is what marks
    // the variable as required downstream.
    let default_value = DEFAULT_ATTR
        .find(body)
        .map(|m| capture_balanced(&body[m.end()..]))
        .unwrap_or_default();

    VariableDeclaration {
        default_value_placeholder: placeholder_for(&var_type),
        name: name.to_string(),
        description,
        var_type,
        default_value,
    }
}

/// Capture an attribute value that may span lines: consume until bracket depth
/// returns to zero at a line end.
fn capture_balanced(text: &str) -> String {
    let mut depth = 0i32;
    let mut captured = String::new();
    for ch in text.chars() {
        match ch {
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth -= 1,
            '\n' if depth <= 0 => break,
            _ => {}
        }
        if depth < 0 {
            break;
        }
        captured.push(ch);
    }
    captured.trim().to_string()
}

/// Composite shapes are decided by the leading type constructor, before any
/// scalar check: `map(string)` is a map, not a string.
fn placeholder_for(var_type: &str) -> String {
    let placeholder = if var_type.starts_with("list")
        || var_type.starts_with("set")
        || var_type.starts_with("tuple")
    {
        "[]"
    } else if var_type.starts_with("map") || var_type.starts_with("object") {
        "{}"
    } else if var_type.contains("string") {
        "\"\""
    } else if var_type.contains("number") {
        "0"
    } else if var_type.contains("bool") {
        "false"
    } else {
        "null"
    };
    placeholder.to_string()
}
