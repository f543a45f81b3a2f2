use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use assert_matches::assert_matches;
use serde_json::Value;

use pmr_utils::app::{App, PopulateStatus};
use pmr_utils::client::PmrClient;
use pmr_utils::domain::{InstanceUrl, Selection, Workspace};
use pmr_utils::error::PmrError;
use pmr_utils::export::Submitter;
use pmr_utils::output::JsonOutput;
use pmr_utils::store::Store;
use pmr_utils::vcs::RepoCheckout;

#[derive(Default)]
struct MockClient {
    documents: HashMap<String, Value>,
    calls: Mutex<Vec<String>>,
}

impl MockClient {
    fn from_fixture() -> Self {
        Self {
            documents: serde_json::from_str(include_str!("fixtures/pmr_instance.json")).unwrap(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl PmrClient for MockClient {
    fn fetch_json(&self, url: &str) -> Option<Value> {
        self.calls.lock().unwrap().push(url.to_string());
        self.documents.get(url).cloned()
    }
}

#[derive(Default)]
struct MockGit {
    checkouts: Mutex<Vec<(String, PathBuf)>>,
    fail_for: Option<String>,
}

impl RepoCheckout for MockGit {
    fn ensure_checked_out(&self, url: &str, path: &Path) -> Result<(), PmrError> {
        if self.fail_for.as_deref() == Some(url) {
            return Err(PmrError::Vcs("remote hung up".to_string()));
        }
        self.checkouts
            .lock()
            .unwrap()
            .push((url.to_string(), path.to_path_buf()));
        std::fs::create_dir_all(path.join(".git")).unwrap();
        Ok(())
    }
}

fn open_store(base: &Path) -> Store {
    let instance: InstanceUrl = "https://pmr.test".parse().unwrap();
    Store::open_or_create(base, &instance).unwrap()
}

fn app(base: &Path) -> App<MockClient, MockGit> {
    App::new(open_store(base), MockClient::from_fixture(), MockGit::default())
}

#[test]
fn populate_caches_selected_workspaces() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path());
    let pattern = "https://pmr.test/workspace/alpha".parse().unwrap();

    let result = app
        .populate(&Selection::Pattern(pattern), false, &JsonOutput)
        .unwrap();

    assert_eq!(result.status, PopulateStatus::Completed);
    assert_eq!(result.count("fetched"), 2);
    assert_eq!(app.store().len(), 2);
    let alpha = app.store().get("https://pmr.test/workspace/alpha").unwrap();
    assert_eq!(alpha.latest_exposure["title"], "Alpha exposure");
}

#[test]
fn populate_skips_cached_unless_forced() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path());
    let href = "https://pmr.test/workspace/alpha";
    let mut stale = Workspace::new(href, "alpha", "Stale title", "owner");
    stale.cached_at = "2020-01-01T00:00:00+00:00".to_string();
    app.store().upsert(&stale).unwrap();

    let selection = Selection::Workspace(href.to_string());
    let skipped = app.populate(&selection, false, &JsonOutput).unwrap();
    assert_eq!(skipped.items[0].action, "cached");
    assert!(app.crawler().client().calls.lock().unwrap().is_empty());
    assert_eq!(app.store().get(href).unwrap().title, "Stale title");

    let refreshed = app.populate(&selection, true, &JsonOutput).unwrap();
    assert_eq!(refreshed.items[0].action, "fetched");
    let cached = app.store().get(href).unwrap();
    assert_eq!(cached.title, "Alpha model");
    assert_ne!(cached.cached_at, "2020-01-01T00:00:00+00:00");
}

#[test]
fn populate_without_matches() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path());
    let pattern = "https://pmr.test/workspace/zeta".parse().unwrap();

    let result = app
        .populate(&Selection::Pattern(pattern), false, &JsonOutput)
        .unwrap();
    assert_eq!(result.status, PopulateStatus::NoMatches);
    assert!(result.items.is_empty());
    assert!(app.store().is_empty());
}

#[test]
fn incomplete_workspace_is_reported_not_cached() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path());

    let result = app.populate(&Selection::All, false, &JsonOutput).unwrap();

    assert_eq!(result.count("fetched"), 2);
    assert_eq!(result.count("failed"), 1);
    let failed = result
        .items
        .iter()
        .find(|item| item.action == "failed")
        .unwrap();
    assert_eq!(failed.href, "https://pmr.test/workspace/beta");
    assert!(failed.error.as_deref().unwrap().contains("owner"));
    assert!(app.store().get("https://pmr.test/workspace/beta").is_none());
}

#[test]
fn export_reads_the_cache() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path());
    app.populate(&Selection::All, false, &JsonOutput).unwrap();

    let document = app.export(&Submitter::default(), &JsonOutput);
    assert!(document.contains("<entry_count>2</entry_count>"));
    assert!(document.contains(r#"<entry id="alpha">"#));
    assert!(document.contains(r#"<ref dbname="pubmed" dbkey="12345"/>"#));
    assert!(document.contains("<description>Cardiac &amp; smooth muscle</description>"));
    assert!(document.contains("<description>Exposure with the id: alphabet</description>"));
}

#[test]
fn list_info_and_delete() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path());
    app.populate(&Selection::All, false, &JsonOutput).unwrap();

    let listed = app.list(&JsonOutput);
    assert_eq!(listed.instance, "https://pmr.test");
    let titles = listed
        .workspaces
        .iter()
        .map(|entry| entry.title.as_str())
        .collect::<Vec<_>>();
    assert_eq!(titles, vec!["Alpha model", "alphabet soup"]);

    let info = app.info("https://pmr.test/workspace/alpha").unwrap();
    assert_eq!(info.workspace.id, "alpha");
    assert!(!info.cloned);
    assert!(info.repo_path.as_deref().unwrap().ends_with("repos/alpha/alpha"));

    assert_matches!(
        app.info("https://pmr.test/workspace/beta"),
        Err(PmrError::WorkspaceNotCached(_))
    );

    assert!(app.delete("https://pmr.test/workspace/alpha", false, &JsonOutput).unwrap().deleted);
    assert!(!app.delete("https://pmr.test/workspace/alpha", false, &JsonOutput).unwrap().deleted);
    assert_eq!(app.store().len(), 1);
}

#[test]
fn sync_repos_clones_then_updates() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path());
    app.populate(&Selection::All, false, &JsonOutput).unwrap();

    let first = app.sync_repos(None, &JsonOutput);
    let actions = first
        .items
        .iter()
        .map(|item| item.action.as_str())
        .collect::<Vec<_>>();
    assert_eq!(actions, vec!["cloned", "cloned"]);

    let pattern = "https://pmr.test/workspace/alphab".parse().unwrap();
    let second = app.sync_repos(Some(&pattern), &JsonOutput);
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].id, "alphabet");
    assert_eq!(second.items[0].action, "updated");
    assert!(app.info("https://pmr.test/workspace/alphabet").unwrap().cloned);
}

#[test]
fn sync_failures_are_recorded_per_workspace() {
    let temp = tempfile::tempdir().unwrap();
    let store = open_store(temp.path());
    store
        .upsert(&Workspace::new("https://pmr.test/workspace/a", "a", "A", "o"))
        .unwrap();
    store
        .upsert(&Workspace::new("https://pmr.test/workspace/b", "b", "B", "o"))
        .unwrap();
    let git = MockGit {
        fail_for: Some("https://pmr.test/workspace/a".to_string()),
        ..Default::default()
    };
    let app = App::new(store, MockClient::default(), git);

    let result = app.sync_repos(None, &JsonOutput);
    assert_eq!(result.items[0].action, "failed");
    assert!(result.items[0].error.as_deref().unwrap().contains("remote hung up"));
    assert_eq!(result.items[1].action, "cloned");
}

#[test]
fn sync_skips_workspaces_without_a_folder_name() {
    let temp = tempfile::tempdir().unwrap();
    let store = open_store(temp.path());
    store
        .upsert(&Workspace::new("https://pmr.test/workspace/evil", "..", "Evil", "o"))
        .unwrap();
    store
        .upsert(&Workspace::new("https://pmr.test/workspace/b", "b", "B", "o"))
        .unwrap();
    let app = App::new(store, MockClient::default(), MockGit::default());

    let result = app.sync_repos(None, &JsonOutput);
    let evil = result.items.iter().find(|item| item.id == "..").unwrap();
    assert_eq!(evil.action, "failed");
    assert!(evil.error.as_deref().unwrap().contains("single path segment"));

    let checkouts = app.git().checkouts.lock().unwrap();
    assert_eq!(checkouts.len(), 1);
    assert_eq!(checkouts[0].0, "https://pmr.test/workspace/b");

    let info = app.info("https://pmr.test/workspace/evil").unwrap();
    assert!(info.repo_path.is_none());
    assert!(!info.cloned);
}
