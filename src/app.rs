use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::Span;

use crate::client::PmrClient;
use crate::crawler::Crawler;
use crate::domain::{Selection, Workspace, WorkspacePattern};
use crate::error::PmrError;
use crate::export::{self, Release, Submitter};
use crate::store::Store;
use crate::vcs::RepoCheckout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulateStatus {
    Completed,
    NoMatches,
}

#[derive(Debug, Clone, Serialize)]
pub struct PopulateResult {
    pub status: PopulateStatus,
    pub items: Vec<PopulateItem>,
}

impl PopulateResult {
    pub fn count(&self, action: &str) -> usize {
        self.items.iter().filter(|item| item.action == action).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PopulateItem {
    pub href: String,
    pub action: String,
    pub id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub instance: String,
    pub workspaces: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub href: String,
    pub id: String,
    pub title: String,
    pub owner: String,
    pub cached_at: String,
    pub cloned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub workspace: Workspace,
    pub repo_path: Option<String>,
    pub cloned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub href: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub items: Vec<SyncItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncItem {
    pub href: String,
    pub id: String,
    pub path: String,
    pub action: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Receives advisory progress messages. Implementations must not influence
/// the operation they observe.
pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: PmrClient, G: RepoCheckout> {
    store: Store,
    crawler: Crawler<C>,
    git: G,
    span: Span,
}

impl<C: PmrClient, G: RepoCheckout> App<C, G> {
    pub fn new(store: Store, client: C, git: G) -> Self {
        let crawler = Crawler::new(client, store.instance().clone());
        let span = tracing::info_span!("app", cache = %store.base_path());
        Self {
            store,
            crawler,
            git,
            span,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn crawler(&self) -> &Crawler<C> {
        &self.crawler
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    /// Fetches and caches every selected workspace not already cached, or
    /// every selected workspace when `force_refresh` is set.
    ///
    /// An empty selection yields [`PopulateStatus::NoMatches`]. A workspace
    /// that cannot be assembled is reported as `failed` and left out of the
    /// cache; the remaining workspaces are still processed.
    pub fn populate(
        &self,
        selection: &Selection,
        force_refresh: bool,
        sink: &dyn ProgressSink,
    ) -> Result<PopulateResult, PmrError> {
        let _enter = self.span.enter();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; selecting {}", selection.describe()),
            elapsed: None,
        });
        let hrefs = self.crawler.select(selection);
        if hrefs.is_empty() {
            tracing::warn!(
                "no requested workspaces found, perhaps you are looking for a workspace that is not public?"
            );
            return Ok(PopulateResult {
                status: PopulateStatus::NoMatches,
                items: Vec::new(),
            });
        }
        tracing::info!(count = hrefs.len(), "workspaces to cache");

        let total = hrefs.len();
        let mut items = Vec::with_capacity(total);
        for (index, href) in hrefs.into_iter().enumerate() {
            if !force_refresh {
                if let Some(cached) = self.store.get(&href) {
                    tracing::debug!(href = %href, "already cached and refresh not forced, skipping");
                    items.push(PopulateItem {
                        href,
                        action: "cached".to_string(),
                        id: Some(cached.id),
                        error: None,
                    });
                    continue;
                }
            }

            sink.event(ProgressEvent {
                message: format!("phase=Fetch; [{}/{}] {}", index + 1, total, href),
                elapsed: None,
            });
            let start = Instant::now();
            match self.crawler.fetch_workspace(&href) {
                Ok(workspace) => {
                    self.store.upsert(&workspace)?;
                    sink.event(ProgressEvent {
                        message: format!("phase=Store; cached {}", workspace.id),
                        elapsed: Some(start.elapsed()),
                    });
                    items.push(PopulateItem {
                        href,
                        action: "fetched".to_string(),
                        id: Some(workspace.id),
                        error: None,
                    });
                }
                Err(err) => {
                    tracing::warn!(href = %href, error = %err, "workspace fetch failed");
                    items.push(PopulateItem {
                        href,
                        action: "failed".to_string(),
                        id: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        Ok(PopulateResult {
            status: PopulateStatus::Completed,
            items,
        })
    }

    /// Renders every cached workspace as an OmicsDI document stamped with
    /// the current time.
    pub fn export(&self, submitter: &Submitter, sink: &dyn ProgressSink) -> String {
        let _enter = self.span.enter();
        let workspaces = self.store.list();
        tracing::info!(count = workspaces.len(), "workspaces in the cache");
        sink.event(ProgressEvent {
            message: format!("phase=Export; {} workspaces", workspaces.len()),
            elapsed: None,
        });
        export::export(&workspaces, &Release::at(chrono::Utc::now()), submitter)
    }

    pub fn list(&self, sink: &dyn ProgressSink) -> ListResult {
        sink.event(ProgressEvent {
            message: "phase=Resolve; reading cache".to_string(),
            elapsed: None,
        });
        let workspaces = self
            .store
            .list()
            .into_iter()
            .map(|workspace| ListEntry {
                cloned: self
                    .store
                    .is_repo_cloned(&workspace.id, workspace.repo_name()),
                href: workspace.href,
                id: workspace.id,
                title: workspace.title,
                owner: workspace.owner,
                cached_at: workspace.cached_at,
            })
            .collect();
        ListResult {
            instance: self.store.instance().to_string(),
            workspaces,
        }
    }

    pub fn info(&self, href: &str) -> Result<InfoResult, PmrError> {
        let workspace = self
            .store
            .get(href)
            .ok_or_else(|| PmrError::WorkspaceNotCached(href.to_string()))?;
        let repo_path = match self.store.repo_path(&workspace.id, workspace.repo_name()) {
            Ok(path) => Some(path.to_string()),
            Err(err) => {
                tracing::warn!(href = %href, error = %err, "no repository folder for workspace");
                None
            }
        };
        let cloned = self
            .store
            .is_repo_cloned(&workspace.id, workspace.repo_name());
        Ok(InfoResult {
            workspace,
            repo_path,
            cloned,
        })
    }

    pub fn delete(
        &self,
        href: &str,
        delete_repo: bool,
        sink: &dyn ProgressSink,
    ) -> Result<DeleteResult, PmrError> {
        let _enter = self.span.enter();
        sink.event(ProgressEvent {
            message: format!("phase=Store; removing {href}"),
            elapsed: None,
        });
        let deleted = self.store.delete(href, delete_repo)?;
        if !deleted {
            tracing::info!(href = %href, "workspace was not cached");
        }
        Ok(DeleteResult {
            href: href.to_string(),
            deleted,
        })
    }

    /// Clones or updates the repository of every cached workspace whose href
    /// matches `pattern` (all of them when `None`). Failures are recorded per
    /// workspace.
    pub fn sync_repos(
        &self,
        pattern: Option<&WorkspacePattern>,
        sink: &dyn ProgressSink,
    ) -> SyncResult {
        let _enter = self.span.enter();
        let workspaces = self
            .store
            .list()
            .into_iter()
            .filter(|workspace| pattern.map(|p| p.is_match(&workspace.href)).unwrap_or(true))
            .collect::<Vec<_>>();
        let total = workspaces.len();

        let mut items = Vec::with_capacity(total);
        for (index, workspace) in workspaces.into_iter().enumerate() {
            let repo_name = workspace.repo_name().to_string();
            let path = match self.store.repo_path(&workspace.id, &repo_name) {
                Ok(path) => path,
                Err(err) => {
                    tracing::warn!(href = %workspace.href, error = %err, "skipping repository sync");
                    items.push(SyncItem {
                        href: workspace.href,
                        id: workspace.id,
                        path: String::new(),
                        action: "failed".to_string(),
                        error: Some(err.to_string()),
                    });
                    continue;
                }
            };
            let action = if self.store.is_repo_cloned(&workspace.id, &repo_name) {
                "updated"
            } else {
                "cloned"
            };
            sink.event(ProgressEvent {
                message: format!("phase=Sync; [{}/{}] {}", index + 1, total, workspace.href),
                elapsed: None,
            });
            let start = Instant::now();
            let outcome = self
                .git
                .ensure_checked_out(&workspace.href, path.as_std_path());
            let (action, error) = match outcome {
                Ok(()) => {
                    sink.event(ProgressEvent {
                        message: format!("phase=Sync; {action} {}", workspace.id),
                        elapsed: Some(start.elapsed()),
                    });
                    (action.to_string(), None)
                }
                Err(err) => {
                    tracing::warn!(href = %workspace.href, error = %err, "repository sync failed");
                    ("failed".to_string(), Some(err.to_string()))
                }
            };
            items.push(SyncItem {
                href: workspace.href,
                id: workspace.id,
                path: path.to_string(),
                action,
                error,
            });
        }
        SyncResult { items }
    }
}
