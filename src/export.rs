//! OmicsDI XML export of cached workspaces.
//!
//! Each workspace becomes one entry. Entries sharing a workspace `id` are
//! reconciled by [`EntrySet::insert`]; the result is rendered into a fixed
//! `<database>` envelope.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::domain::Workspace;
use crate::hypermedia::find_field;

pub const PUBMED_URN_PREFIX: &str = "urn:miriam:pubmed:";
pub const PUBLICATION_SEPARATOR: &str = " ; ";

/// What happens when a later entry collides with an earlier one and
/// neither carries publications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPublicationsPolicy {
    /// Keep both; the later entry is renamed `<id>.1`, `<id>.2`, ...
    KeepBoth,
    /// Treat the later entry as a duplicate.
    DropLater,
}

// Open question: publication-less collisions may be true duplicates.
pub const EMPTY_PUBLICATIONS_POLICY: EmptyPublicationsPolicy = EmptyPublicationsPolicy::KeepBoth;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub publications: String,
}

impl ExportEntry {
    pub fn from_workspace(workspace: &Workspace) -> Self {
        Self {
            id: workspace.id.clone(),
            name: escape_ampersand(&workspace.title),
            description: escape_ampersand(&workspace.description),
            url: workspace.href.clone(),
            publications: publications(workspace),
        }
    }

    fn has_publications(&self) -> bool {
        !self.publications.is_empty()
    }
}

/// Outcome of adding one entry to an [`EntrySet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Added,
    DroppedDuplicate,
    DroppedWithoutPublications,
    Replaced,
    Renamed(String),
}

/// Entries keyed by id, in insertion order.
#[derive(Debug, Clone)]
pub struct EntrySet {
    entries: Vec<ExportEntry>,
    index: HashMap<String, usize>,
    policy: EmptyPublicationsPolicy,
}

impl Default for EntrySet {
    fn default() -> Self {
        Self::with_policy(EMPTY_PUBLICATIONS_POLICY)
    }
}

impl EntrySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: EmptyPublicationsPolicy) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ExportEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&ExportEntry> {
        self.index.get(id).map(|&position| &self.entries[position])
    }

    /// Adds `entry`, resolving a clash with an existing entry of the same id:
    ///
    /// * earlier has publications, later has the same ones: later dropped
    /// * earlier has publications, later has none: later dropped
    /// * earlier has none, later has some: later replaces earlier in place
    /// * both have differing publications: both kept, later renamed
    /// * neither has publications: decided by the set's policy
    pub fn insert(&mut self, mut entry: ExportEntry) -> Reconciliation {
        let Some(&position) = self.index.get(&entry.id) else {
            self.push(entry);
            return Reconciliation::Added;
        };
        let previous = &self.entries[position];
        tracing::warn!(
            id = %entry.id,
            previous = ?previous,
            new = ?entry,
            "duplicate entry id"
        );
        let same_publications = previous.publications == entry.publications;
        let flags = (previous.has_publications(), entry.has_publications());

        match flags {
            (true, true) if same_publications => {
                tracing::debug!(id = %entry.id, "same publications, dropping duplicate");
                Reconciliation::DroppedDuplicate
            }
            (true, false) => {
                tracing::debug!(id = %entry.id, "later entry has no publications, dropping it");
                Reconciliation::DroppedWithoutPublications
            }
            (false, true) => {
                tracing::debug!(id = %entry.id, "replacing entry without publications");
                self.entries[position] = entry;
                Reconciliation::Replaced
            }
            (false, false) if self.policy == EmptyPublicationsPolicy::DropLater => {
                tracing::debug!(id = %entry.id, "neither entry has publications, dropping later");
                Reconciliation::DroppedDuplicate
            }
            _ => {
                tracing::warn!(
                    id = %entry.id,
                    "entries disagree on publications, keeping both"
                );
                entry.id = self.free_key(&entry.id);
                let renamed = entry.id.clone();
                self.push(entry);
                Reconciliation::Renamed(renamed)
            }
        }
    }

    fn push(&mut self, entry: ExportEntry) {
        self.index.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
    }

    fn free_key(&self, base: &str) -> String {
        let mut suffix = 1usize;
        loop {
            let candidate = format!("{base}.{suffix}");
            if !self.index.contains_key(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

/// Release stamp written into the document header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub number: String,
    pub date: String,
}

impl Release {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            number: now.format("%Y%m%d%H%M%S").to_string(),
            date: now.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Fixed per-entry submitter fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitter {
    pub name: String,
    pub mail: String,
}

impl Default for Submitter {
    fn default() -> Self {
        Self {
            name: "David Nickerson".to_string(),
            mail: "d.nickerson@auckland.ac.nz".to_string(),
        }
    }
}

/// Reconciles `workspaces` (expected in listing order) and renders the XML
/// document.
pub fn export(workspaces: &[Workspace], release: &Release, submitter: &Submitter) -> String {
    let mut set = EntrySet::new();
    for workspace in workspaces {
        set.insert(ExportEntry::from_workspace(workspace));
    }
    tracing::info!(
        entries = set.len(),
        release = %release.number,
        date = %release.date,
        "exporting OmicsDI entries"
    );
    render(set.entries(), release, submitter)
}

pub fn render(entries: &[ExportEntry], release: &Release, submitter: &Submitter) -> String {
    let body = entries
        .iter()
        .map(|entry| render_entry(entry, submitter))
        .collect::<String>();
    format!(
        r#"<database>
  <name>Physiome Model Repository</name>
  <description>The main goal of the Physiome Model Repository is to provide a resource for the community to store, retrieve, search, reference, and reuse models.</description>
  <release>{number}</release>
  <release_date>{date}</release_date>
  <entry_count>{count}</entry_count>
  <entries>
    {body}
  </entries>
</database>
"#,
        number = release.number,
        date = release.date,
        count = entries.len(),
    )
}

fn render_entry(entry: &ExportEntry, submitter: &Submitter) -> String {
    let name = if entry.name.is_empty() {
        entry.id.as_str()
    } else {
        entry.name.as_str()
    };
    let description = if entry.description.is_empty() {
        format!("Exposure with the id: {}", entry.id)
    } else {
        entry.description.clone()
    };
    format!(
        r#"
    <entry id="{id}">
        <name>{name}</name>
        <description>{description}</description>
        <cross_references>
            <ref dbname="pubmed" dbkey="{publications}"/>
        </cross_references>
        <additional_fields>
            <field name="submitter">{submitter_name}</field>
            <field name="submitter_mail">{submitter_mail}</field>
            <field name="repository">PMR</field>
            <field name="full_dataset_link">{url}</field>
            <field name="omics_type">Models</field>
        </additional_fields>
    </entry>
"#,
        id = entry.id,
        publications = entry.publications,
        submitter_name = submitter.name,
        submitter_mail = submitter.mail,
        url = entry.url,
    )
}

/// Only `&` is escaped.
pub fn escape_ampersand(text: &str) -> String {
    text.replace('&', "&amp;")
}

/// Citation identifiers found under the exposure's links, lower-cased,
/// de-duplicated and stripped of the PubMed URN prefix, joined with
/// [`PUBLICATION_SEPARATOR`].
pub fn publications(workspace: &Workspace) -> String {
    let Some(Value::Array(links)) = workspace.latest_exposure.get("links") else {
        return String::new();
    };
    let citations = links
        .iter()
        .filter_map(|link| find_field(link, "citation_id"))
        .filter_map(Value::as_str)
        .filter(|citation| !citation.is_empty())
        .map(str::to_lowercase)
        .collect::<BTreeSet<_>>();

    citations
        .into_iter()
        .map(|citation| match citation.strip_prefix(PUBMED_URN_PREFIX) {
            Some(pubmed) => pubmed.to_string(),
            None => {
                tracing::warn!(citation = %citation, workspace = %workspace.id, "non-pubmed URN found");
                citation
            }
        })
        .collect::<Vec<_>>()
        .join(PUBLICATION_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, publications: &str) -> ExportEntry {
        ExportEntry {
            id: id.to_string(),
            name: format!("name {id}"),
            description: String::new(),
            url: format!("https://pmr.test/workspace/{id}"),
            publications: publications.to_string(),
        }
    }

    #[test]
    fn replacement_keeps_position() {
        let mut set = EntrySet::new();
        set.insert(entry("a", ""));
        set.insert(entry("b", "1"));
        assert_eq!(set.insert(entry("a", "9")), Reconciliation::Replaced);
        let ids = set.entries().iter().map(|e| e.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(set.get("a").unwrap().publications, "9");
    }

    #[test]
    fn rename_skips_taken_suffixes() {
        let mut set = EntrySet::new();
        set.insert(entry("a", "1"));
        set.insert(entry("a.1", "5"));
        assert_eq!(
            set.insert(entry("a", "2")),
            Reconciliation::Renamed("a.2".to_string())
        );
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn empty_collision_follows_policy() {
        let mut keep = EntrySet::with_policy(EmptyPublicationsPolicy::KeepBoth);
        keep.insert(entry("a", ""));
        assert_eq!(
            keep.insert(entry("a", "")),
            Reconciliation::Renamed("a.1".to_string())
        );

        let mut drop = EntrySet::with_policy(EmptyPublicationsPolicy::DropLater);
        drop.insert(entry("a", ""));
        assert_eq!(drop.insert(entry("a", "")), Reconciliation::DroppedDuplicate);
        assert_eq!(drop.len(), 1);
    }

    #[test]
    fn publications_are_sorted_and_deduplicated() {
        let mut ws = Workspace::new("https://pmr.test/workspace/a", "a", "A", "o");
        ws.latest_exposure = json!({
            "links": [
                {"citation_id": "urn:miriam:pubmed:222"},
                {"links": [{"citation_id": "URN:MIRIAM:PUBMED:111"}]},
                {"citation_id": "urn:miriam:pubmed:222"},
                {"prompt": "no citation here"}
            ]
        })
        .as_object()
        .cloned()
        .unwrap();
        assert_eq!(publications(&ws), "111 ; 222");
    }

    #[test]
    fn release_stamp_formats() {
        let now = DateTime::parse_from_rfc3339("2024-11-21T08:05:09Z")
            .unwrap()
            .with_timezone(&Utc);
        let release = Release::at(now);
        assert_eq!(release.number, "20241121080509");
        assert_eq!(release.date, "2024-11-21");
    }
}
