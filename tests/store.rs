use std::fs;

use assert_matches::assert_matches;
use serde_json::json;

use pmr_utils::domain::{InstanceUrl, Workspace};
use pmr_utils::error::PmrError;
use pmr_utils::store::{INSTANCE_FILE, Store, WORKSPACES_FILE};

fn instance() -> InstanceUrl {
    "https://pmr.test".parse().unwrap()
}

fn workspace(name: &str, title: &str) -> Workspace {
    Workspace::new(
        format!("https://pmr.test/workspace/{name}"),
        name,
        title,
        "owner",
    )
}

#[test]
fn creates_layout_in_missing_folder() {
    let temp = tempfile::tempdir().unwrap();
    let base = temp.path().join("cache");
    let store = Store::open_or_create(&base, &instance()).unwrap();

    assert!(base.join("repos").is_dir());
    assert_eq!(
        fs::read_to_string(base.join(INSTANCE_FILE)).unwrap(),
        "https://pmr.test\n"
    );
    let mapping: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(base.join(WORKSPACES_FILE)).unwrap()).unwrap();
    assert_eq!(mapping, json!({}));
    assert!(store.is_empty());
}

#[test]
fn reopening_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open_or_create(temp.path(), &instance()).unwrap();
    store.upsert(&workspace("a", "A")).unwrap();

    let mapping_before = fs::read(store.workspaces_file().as_std_path()).unwrap();

    let trailing: InstanceUrl = "https://pmr.test/".parse().unwrap();
    let reopened = Store::open_or_create(temp.path(), &trailing).unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.base_path(), store.base_path());
    assert_eq!(
        fs::read(reopened.workspaces_file().as_std_path()).unwrap(),
        mapping_before
    );
}

#[test]
fn rejects_other_instance() {
    let temp = tempfile::tempdir().unwrap();
    Store::open_or_create(temp.path(), &instance()).unwrap();

    let other: InstanceUrl = "https://staging.pmr.test".parse().unwrap();
    let err = Store::open_or_create(temp.path(), &other).unwrap_err();
    assert_matches!(
        err,
        PmrError::InstanceMismatch { expected, found, .. }
            if expected == "https://staging.pmr.test" && found == "https://pmr.test"
    );
}

#[test]
fn rejects_foreign_folder() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("notes.txt"), "not a cache").unwrap();
    let err = Store::open_or_create(temp.path(), &instance()).unwrap_err();
    assert_matches!(err, PmrError::NotInitialised(_));
}

#[test]
fn restores_missing_mapping_file() {
    let temp = tempfile::tempdir().unwrap();
    Store::open_or_create(temp.path(), &instance()).unwrap();
    fs::remove_file(temp.path().join(WORKSPACES_FILE)).unwrap();
    fs::remove_dir(temp.path().join("repos")).unwrap();

    let store = Store::open_or_create(temp.path(), &instance()).unwrap();
    assert!(store.workspaces_file().as_std_path().exists());
    assert!(store.repos_dir().as_std_path().is_dir());
}

#[test]
fn upsert_replaces_by_href() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open_or_create(temp.path(), &instance()).unwrap();
    let first = workspace("a", "First");
    store.upsert(&first).unwrap();
    assert_eq!(store.get(&first.href).unwrap(), first);

    let second = workspace("a", "Second");
    store.upsert(&second).unwrap();
    store.upsert(&second).unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(store.get("https://pmr.test/workspace/a").unwrap(), second);
    assert!(store.get("https://pmr.test/workspace/b").is_none());
}

#[test]
fn list_orders_by_title_case_insensitively() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open_or_create(temp.path(), &instance()).unwrap();
    store.upsert(&workspace("c", "charlie")).unwrap();
    store.upsert(&workspace("a", "Bravo")).unwrap();
    store.upsert(&workspace("b", "alpha")).unwrap();

    let titles = store
        .list()
        .into_iter()
        .map(|workspace| workspace.title)
        .collect::<Vec<_>>();
    assert_eq!(titles, vec!["alpha", "Bravo", "charlie"]);
}

#[test]
fn undecodable_records_survive_rewrites() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open_or_create(temp.path(), &instance()).unwrap();
    let mapping = json!({
        "https://pmr.test/workspace/legacy": {"note": "written by another tool"}
    });
    fs::write(
        store.workspaces_file().as_std_path(),
        serde_json::to_string(&mapping).unwrap(),
    )
    .unwrap();

    store.upsert(&workspace("a", "A")).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(store.workspaces_file().as_std_path()).unwrap())
            .unwrap();
    assert_eq!(
        raw["https://pmr.test/workspace/legacy"]["note"],
        json!("written by another tool")
    );
    assert_eq!(store.list().len(), 1);
}

#[test]
fn delete_reports_whether_anything_was_removed() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open_or_create(temp.path(), &instance()).unwrap();
    let ws = workspace("a", "A");
    store.upsert(&ws).unwrap();
    let repo = store.repo_path(&ws.id, ws.repo_name()).unwrap();
    fs::create_dir_all(repo.join(".git").as_std_path()).unwrap();
    assert!(store.is_repo_cloned(&ws.id, ws.repo_name()));

    assert!(store.delete(&ws.href, false).unwrap());
    assert!(!store.delete(&ws.href, false).unwrap());
    assert!(repo.as_std_path().exists());
}

#[test]
fn delete_can_remove_repository() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open_or_create(temp.path(), &instance()).unwrap();
    let ws = workspace("a", "A");
    store.upsert(&ws).unwrap();
    let repo = store.repo_path(&ws.id, ws.repo_name()).unwrap();
    fs::create_dir_all(repo.join(".git").as_std_path()).unwrap();

    assert!(store.delete(&ws.href, true).unwrap());
    assert!(!store.repo_path(&ws.id, "").unwrap().as_std_path().exists());
    assert!(store.repos_dir().as_std_path().is_dir());
    assert!(store.get(&ws.href).is_none());
}

#[test]
fn repo_layout() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open_or_create(temp.path(), &instance()).unwrap();
    let ws = workspace("beeler_reuter_1977", "Beeler Reuter");
    let path = store.repo_path(&ws.id, ws.repo_name()).unwrap();
    assert!(path.ends_with("repos/beeler_reuter_1977/beeler_reuter_1977"));
    assert!(!store.is_repo_cloned(&ws.id, ws.repo_name()));
}

#[test]
fn delete_never_leaves_the_repos_folder() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open_or_create(temp.path(), &instance()).unwrap();
    let hostile = Workspace::new("https://pmr.test/workspace/evil", "..", "Evil", "owner");
    let kept = workspace("a", "A");
    store.upsert(&hostile).unwrap();
    store.upsert(&kept).unwrap();

    assert_matches!(
        store.repo_path(&hostile.id, ""),
        Err(PmrError::InvalidRepoPath(id)) if id == ".."
    );
    assert!(store.delete(&hostile.href, true).unwrap());

    assert!(temp.path().join(INSTANCE_FILE).exists());
    assert!(temp.path().join(WORKSPACES_FILE).exists());
    assert!(store.repos_dir().as_std_path().is_dir());
    assert!(store.get(&hostile.href).is_none());
    assert_eq!(store.get(&kept.href).unwrap(), kept);
}

#[test]
fn repo_path_needs_single_segments() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::open_or_create(temp.path(), &instance()).unwrap();
    for id in ["..", ".", "", "a/b", "/etc"] {
        assert_matches!(store.repo_path(id, ""), Err(PmrError::InvalidRepoPath(_)));
        assert!(!store.is_repo_cloned(id, "x"));
    }
    assert_matches!(
        store.repo_path("a", "../b"),
        Err(PmrError::InvalidRepoPath(name)) if name == "../b"
    );
}
