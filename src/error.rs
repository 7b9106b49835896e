use std::path::PathBuf;
use thiserror::Error;

use crate::scaffold::Stage;

/// Fatal pipeline failures. Non-fatal conditions (a missed ref lookup, a
/// skipped transport rewrite) are logged as warnings and never surface here.
#[derive(Debug, Error)]
pub enum ScaffoldError {
    #[error("no module source URL was supplied")]
    MissingSourceUrl,

    #[error("invalid module source URL `{url}`: {reason}")]
    InvalidSourceUrl { url: String, reason: String },

    #[error("invalid template URL `{url}`: {reason}")]
    InvalidTemplateUrl { url: String, reason: String },

    #[error("failed to fetch `{url}` during {stage}")]
    FetchFailed {
        url: String,
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read variable declarations from {}", dir.display())]
    VariableParseFailed {
        dir: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("rendering templates from {} failed", dir.display())]
    RenderFailed {
        dir: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("formatting rendered output in {} failed", dir.display())]
    FormatFailed {
        dir: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid variable override `{0}`, expected NAME=VALUE")]
    InvalidVarFlag(String),

    #[error("failed to load variable file {}", path.display())]
    VarFile {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("{message} during {stage}")]
    Io {
        stage: Stage,
        message: String,
        #[source]
        source: std::io::Error,
    },
}
