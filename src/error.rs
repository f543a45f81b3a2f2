use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PmrError {
    #[error(
        "cache at '{path}' is for PMR instance '{found}', but '{expected}' was requested; use a different cache folder or pass the matching instance URL"
    )]
    #[diagnostic(code(pmr::cache::instance_mismatch))]
    InstanceMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error(
        "cache folder '{0}' exists and is non-empty but has no '.pmr-instance' file; it may be corrupted or not a PMR cache"
    )]
    #[diagnostic(code(pmr::cache::not_initialised))]
    NotInitialised(String),

    #[error("workspace not cached: {0}")]
    WorkspaceNotCached(String),

    #[error("workspace record from {href} is missing required field '{field}'")]
    IncompleteRecord { href: String, field: String },

    #[error("'{0}' is not a single path segment and cannot name a repository folder")]
    #[diagnostic(code(pmr::cache::invalid_repo_path))]
    InvalidRepoPath(String),

    #[error("invalid workspace regex: {0}")]
    InvalidRegex(String),

    #[error("invalid workspace selection: {0}")]
    InvalidSelection(String),

    #[error("invalid PMR instance URL: {0}")]
    InvalidInstanceUrl(String),

    #[error("PMR request failed: {0}")]
    Http(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("invalid configuration: {0}")]
    ConfigParse(String),

    #[error("git operation failed: {0}")]
    Vcs(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),
}
