//! Variable declarations, the required/optional classifier, and user-supplied
//! variable overrides (`--var` flags and YAML var-files).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ScaffoldError;

/// One input variable declared by the fetched module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub name: String,
    pub description: String,
    pub var_type: String,
    pub default_value: String,
    pub default_value_placeholder: String,
}

/// Partition declarations into (required, optional). A declaration is required
/// iff its default value is the empty string. Pure and order-stable.
pub fn classify(
    declarations: Vec<VariableDeclaration>,
) -> (Vec<VariableDeclaration>, Vec<VariableDeclaration>) {
    declarations
        .into_iter()
        .partition(|decl| decl.default_value.is_empty())
}

/// Merge variable files and `NAME=VALUE` flags into one map. Files are applied
/// in order, then flags, so flags win over files and later entries win over
/// earlier ones.
pub fn parse_user_vars(
    var_flags: &[String],
    var_files: &[std::path::PathBuf],
) -> Result<HashMap<String, String>, ScaffoldError> {
    let mut vars = HashMap::new();

    for path in var_files {
        load_var_file(path, &mut vars)?;
    }

    for flag in var_flags {
        let (name, value) = flag
            .split_once('=')
            .ok_or_else(|| ScaffoldError::InvalidVarFlag(flag.clone()))?;
        vars.insert(name.to_string(), value.to_string());
    }

    Ok(vars)
}

fn load_var_file(path: &Path, vars: &mut HashMap<String, String>) -> Result<(), ScaffoldError> {
    let var_file_error = |source: anyhow::Error| ScaffoldError::VarFile {
        path: path.to_path_buf(),
        source,
    };

    let content = std::fs::read_to_string(path).map_err(|e| var_file_error(e.into()))?;
    let parsed: HashMap<String, serde_yaml::Value> =
        serde_yaml::from_str(&content).map_err(|e| var_file_error(e.into()))?;

    for (name, value) in parsed {
        let value = scalar_to_string(&value)
            .ok_or_else(|| var_file_error(anyhow::anyhow!("variable `{name}` is not a scalar")))?;
        vars.insert(name, value);
    }

    Ok(())
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
