use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::PmrError;

/// Makes a working copy of `url` available at `path`, cloning it when the
/// folder holds no repository yet and updating it otherwise.
pub trait RepoCheckout: Send + Sync {
    fn ensure_checked_out(&self, url: &str, path: &Path) -> Result<(), PmrError>;
}

/// Runs the `git` executable found on `PATH`.
#[derive(Debug, Clone)]
pub struct SystemGit {
    git: Option<PathBuf>,
}

impl SystemGit {
    pub fn new() -> Self {
        Self {
            git: find_in_path("git"),
        }
    }

    pub fn is_available(&self) -> bool {
        self.git.is_some()
    }

    fn require_git(&self) -> Result<&PathBuf, PmrError> {
        self.git
            .as_ref()
            .ok_or_else(|| PmrError::MissingTool("git".to_string()))
    }

    fn run_git(&self, args: &[String]) -> Result<(), PmrError> {
        let git = self.require_git()?;
        let output = Command::new(git)
            .args(args)
            .output()
            .map_err(|err| PmrError::Vcs(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("git {} failed", args.first().map(String::as_str).unwrap_or(""))
        } else {
            stderr
        };
        Err(PmrError::Vcs(message))
    }
}

impl Default for SystemGit {
    fn default() -> Self {
        Self::new()
    }
}

impl RepoCheckout for SystemGit {
    fn ensure_checked_out(&self, url: &str, path: &Path) -> Result<(), PmrError> {
        if path.join(".git").exists() {
            tracing::debug!(path = %path.display(), "pulling existing clone");
            return self.run_git(&[
                "-C".to_string(),
                path.to_string_lossy().to_string(),
                "pull".to_string(),
            ]);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PmrError::Filesystem(err.to_string()))?;
        }
        tracing::debug!(url = %url, path = %path.display(), "cloning workspace");
        self.run_git(&[
            "clone".to_string(),
            url.to_string(),
            path.to_string_lossy().to_string(),
        ])
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
