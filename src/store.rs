//! On-disk cache of workspace records for a single PMR instance.
//!
//! Layout under the cache root:
//!
//! ```text
//! .pmr-instance       instance URL, one line
//! workspaces.json     { "<href>": Workspace, ... }
//! repos/<id>/<repo>/  clone targets, managed outside the store
//! ```
//!
//! The mapping file is rewritten whole on every mutation. Concurrent
//! writers are not coordinated.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use tracing::Span;

use crate::domain::{InstanceUrl, Workspace};
use crate::error::PmrError;

pub const INSTANCE_FILE: &str = ".pmr-instance";
pub const WORKSPACES_FILE: &str = "workspaces.json";
pub const REPOS_DIR: &str = "repos";
const VCS_MARKER: &str = ".git";

#[derive(Debug, Clone)]
pub struct Store {
    base: Utf8PathBuf,
    instance: InstanceUrl,
    span: Span,
}

impl Store {
    /// Opens the cache at `base_path`, initialising it when the folder is
    /// missing or empty.
    ///
    /// A non-empty folder without an instance marker is rejected with
    /// [`PmrError::NotInitialised`]; a marker naming another instance is
    /// rejected with [`PmrError::InstanceMismatch`].
    pub fn open_or_create(
        base_path: impl AsRef<Path>,
        instance: &InstanceUrl,
    ) -> Result<Self, PmrError> {
        let absolute = std::path::absolute(base_path.as_ref())
            .map_err(|err| PmrError::Filesystem(err.to_string()))?;
        let base = Utf8PathBuf::from_path_buf(absolute)
            .map_err(|_| PmrError::Filesystem("non-utf8 cache path".to_string()))?;
        let span = tracing::info_span!("store", base = %base);
        let store = Self {
            base,
            instance: instance.clone(),
            span,
        };

        if !store.base.as_std_path().exists() || is_empty_dir(&store.base)? {
            store.initialise()?;
        } else {
            store.validate()?;
        }
        Ok(store)
    }

    pub fn base_path(&self) -> &Utf8Path {
        &self.base
    }

    pub fn instance(&self) -> &InstanceUrl {
        &self.instance
    }

    pub fn repos_dir(&self) -> Utf8PathBuf {
        self.base.join(REPOS_DIR)
    }

    pub fn instance_file(&self) -> Utf8PathBuf {
        self.base.join(INSTANCE_FILE)
    }

    pub fn workspaces_file(&self) -> Utf8PathBuf {
        self.base.join(WORKSPACES_FILE)
    }

    pub fn get(&self, href: &str) -> Option<Workspace> {
        let _enter = self.span.enter();
        let data = self.load_raw();
        data.get(href).and_then(|value| decode(href, value))
    }

    /// All decodable records, ordered by lower-cased title.
    pub fn list(&self) -> Vec<Workspace> {
        let _enter = self.span.enter();
        let data = self.load_raw();
        let mut workspaces = data
            .iter()
            .filter_map(|(href, value)| decode(href, value))
            .collect::<Vec<_>>();
        workspaces.sort_by_key(Workspace::sort_key);
        workspaces
    }

    pub fn len(&self) -> usize {
        self.load_raw().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts or replaces the record stored under `workspace.href`.
    pub fn upsert(&self, workspace: &Workspace) -> Result<(), PmrError> {
        let _enter = self.span.enter();
        let mut data = self.load_raw();
        let value =
            serde_json::to_value(workspace).map_err(|err| PmrError::Filesystem(err.to_string()))?;
        data.insert(workspace.href.clone(), value);
        self.save_raw(&data)?;
        tracing::debug!(href = %workspace.href, "workspace upserted");
        Ok(())
    }

    /// Removes the record for `href`. Returns `false` when nothing was
    /// cached under that key. With `also_delete_repo` the workspace's clone
    /// folder is removed as well.
    pub fn delete(&self, href: &str, also_delete_repo: bool) -> Result<bool, PmrError> {
        let _enter = self.span.enter();
        let mut data = self.load_raw();
        let Some(removed) = data.remove(href) else {
            return Ok(false);
        };
        self.save_raw(&data)?;
        tracing::debug!(href = %href, "workspace removed from cache");

        if also_delete_repo {
            match decode(href, &removed) {
                Some(workspace) => match self.repo_path(&workspace.id, "") {
                    Ok(repo) => {
                        if repo.as_std_path().exists() {
                            fs::remove_dir_all(repo.as_std_path())
                                .map_err(|err| PmrError::Filesystem(err.to_string()))?;
                            tracing::info!(path = %repo, "removed cloned repository");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(href = %href, error = %err, "not removing repository");
                    }
                },
                None => {
                    tracing::warn!(href = %href, "cannot locate repository for removed record");
                }
            }
        }
        Ok(true)
    }

    /// `repos/<workspace_id>[/<repo_name>]` under the cache root.
    ///
    /// Both parts come from upstream data, so each must be a single plain
    /// path segment; `..`, `.`, separators and absolute paths are rejected.
    /// An empty `repo_name` names the workspace folder itself.
    pub fn repo_path(
        &self,
        workspace_id: &str,
        repo_name: &str,
    ) -> Result<Utf8PathBuf, PmrError> {
        let path = self.repos_dir().join(single_segment(workspace_id)?);
        if repo_name.is_empty() {
            Ok(path)
        } else {
            Ok(path.join(single_segment(repo_name)?))
        }
    }

    /// False as well when the workspace cannot name a repository folder.
    pub fn is_repo_cloned(&self, workspace_id: &str, repo_name: &str) -> bool {
        self.repo_path(workspace_id, repo_name)
            .map(|path| path.join(VCS_MARKER).as_std_path().exists())
            .unwrap_or(false)
    }

    fn initialise(&self) -> Result<(), PmrError> {
        let _enter = self.span.enter();
        fs::create_dir_all(self.repos_dir().as_std_path())
            .map_err(|err| PmrError::Filesystem(err.to_string()))?;
        fs::write(
            self.instance_file().as_std_path(),
            format!("{}\n", self.instance),
        )
        .map_err(|err| PmrError::Filesystem(err.to_string()))?;
        self.save_raw(&Map::new())?;
        tracing::info!(instance = %self.instance, "initialised new cache");
        Ok(())
    }

    fn validate(&self) -> Result<(), PmrError> {
        let instance_file = self.instance_file();
        if !instance_file.as_std_path().exists() {
            return Err(PmrError::NotInitialised(self.base.to_string()));
        }
        let stored = fs::read_to_string(instance_file.as_std_path())
            .map_err(|err| PmrError::Filesystem(err.to_string()))?;
        let found = InstanceUrl::normalize(&stored);
        if found != self.instance.as_str() {
            return Err(PmrError::InstanceMismatch {
                path: self.base.to_string(),
                expected: self.instance.to_string(),
                found,
            });
        }

        fs::create_dir_all(self.repos_dir().as_std_path())
            .map_err(|err| PmrError::Filesystem(err.to_string()))?;
        if !self.workspaces_file().as_std_path().exists() {
            self.save_raw(&Map::new())?;
        }
        Ok(())
    }

    /// Missing or unreadable mapping files read as empty.
    fn load_raw(&self) -> Map<String, Value> {
        let content = match fs::read_to_string(self.workspaces_file().as_std_path()) {
            Ok(content) => content,
            Err(_) => return Map::new(),
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!(file = WORKSPACES_FILE, "unreadable workspace mapping, treating as empty");
                Map::new()
            }
        }
    }

    fn save_raw(&self, data: &Map<String, Value>) -> Result<(), PmrError> {
        let mut content =
            serde_json::to_vec_pretty(data).map_err(|err| PmrError::Filesystem(err.to_string()))?;
        content.push(b'\n');
        let mut temp = tempfile::Builder::new()
            .prefix(".workspaces")
            .tempfile_in(self.base.as_std_path())
            .map_err(|err| PmrError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| PmrError::Filesystem(err.to_string()))?;
        temp.persist(self.workspaces_file().as_std_path())
            .map_err(|err| PmrError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache {} (instance {}, {} workspaces)",
            self.base,
            self.instance,
            self.len()
        )
    }
}

fn decode(href: &str, value: &Value) -> Option<Workspace> {
    match serde_json::from_value::<Workspace>(value.clone()) {
        Ok(workspace) => Some(workspace),
        Err(err) => {
            tracing::warn!(href = %href, error = %err, "skipping undecodable cached record");
            None
        }
    }
}

fn single_segment(value: &str) -> Result<&str, PmrError> {
    let mut components = Utf8Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Utf8Component::Normal(segment)), None) if segment == value => Ok(segment),
        _ => Err(PmrError::InvalidRepoPath(value.to_string())),
    }
}

fn is_empty_dir(path: &Utf8Path) -> Result<bool, PmrError> {
    let mut entries =
        fs::read_dir(path.as_std_path()).map_err(|err| PmrError::Filesystem(err.to_string()))?;
    Ok(entries.next().is_none())
}
