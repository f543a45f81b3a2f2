//! Walks the PMR hypermedia API to discover workspaces and assemble
//! [`Workspace`] records.
//!
//! Upstream link shapes are open-ended. Unknown prompts and relations are
//! logged and skipped, never treated as errors, and a failed fetch only
//! empties the branch it was meant to fill.

use serde_json::{Map, Value};
use tracing::Span;

use crate::client::PmrClient;
use crate::domain::{InstanceUrl, Selection, Workspace, WorkspaceBuilder};
use crate::error::PmrError;
use crate::hypermedia::{CollectionDocument, Link, flatten_data, followable_links};

pub const LATEST_EXPOSURE_PROMPT: &str = "Latest Exposure";
pub const MODEL_METADATA_PROMPT: &str = "Model Metadata";
pub const BOOKMARK_REL: &str = "bookmark";
pub const SECTION_REL: &str = "section";

const KNOWN_PROMPTS: &[&str] = &[
    "Model Metadata",
    "Launch with OpenCOR",
    "Semantic Metadata",
    "COMBINE Archive",
    "Source View",
    "Cite this model",
    "Generated Code",
    "Mathematics",
    "Documentation",
];

const KNOWN_RELS: &[&str] = &["bookmark", "section", "via"];

pub struct Crawler<C: PmrClient> {
    client: C,
    instance: InstanceUrl,
    span: Span,
}

impl<C: PmrClient> Crawler<C> {
    pub fn new(client: C, instance: InstanceUrl) -> Self {
        let span = tracing::info_span!("crawler", instance = %instance);
        Self {
            client,
            instance,
            span,
        }
    }

    pub fn instance(&self) -> &InstanceUrl {
        &self.instance
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Resolves a selection to workspace URLs in upstream order.
    pub fn select(&self, selection: &Selection) -> Vec<String> {
        let _enter = self.span.enter();
        match selection {
            Selection::Workspace(href) => {
                if self.instance.contains(href) {
                    vec![href.clone()]
                } else {
                    tracing::error!(
                        workspace = %href,
                        "requested workspace is not from this PMR instance"
                    );
                    Vec::new()
                }
            }
            Selection::Pattern(pattern) => {
                let hrefs = self
                    .collection_hrefs()
                    .into_iter()
                    .filter(|href| pattern.is_match(href))
                    .collect::<Vec<_>>();
                tracing::info!(
                    regex = %pattern,
                    matched = hrefs.len(),
                    "workspaces matching regex"
                );
                hrefs
            }
            Selection::All => self.collection_hrefs(),
        }
    }

    /// Builds the full record for one workspace, following its latest
    /// exposure.
    ///
    /// Fails when the `workspace_view` document is unavailable or lacks one
    /// of `href`, `id`, `title` or `owner`.
    pub fn fetch_workspace(&self, href: &str) -> Result<Workspace, PmrError> {
        let _enter = self.span.enter();
        tracing::debug!(workspace = %href, "fetching workspace");
        let url = format!("{}/workspace_view", href.trim_end_matches('/'));
        let document = self
            .fetch_document(&url)
            .ok_or_else(|| PmrError::Http(format!("no workspace data returned by {url}")))?;
        let item = document
            .first_item()
            .ok_or_else(|| PmrError::Http(format!("{url} returned an empty collection")))?;

        let mut builder = WorkspaceBuilder::new();
        if let Some(item_href) = &item.href {
            builder = builder.href(item_href.clone());
        }
        for field in &item.data {
            builder.field(&field.name, &field.value);
        }
        for link in followable_links(item.links.as_deref()) {
            if link.prompt == LATEST_EXPOSURE_PROMPT {
                builder = builder.latest_exposure(self.resolve_exposure(&link.href));
            } else {
                tracing::warn!(prompt = %link.prompt, href = %link.href, "unknown workspace link ignored");
            }
        }
        builder.build(&url)
    }

    /// Exposure fields plus its links, each classified with bookmark links
    /// followed.
    pub fn resolve_exposure(&self, exposure_url: &str) -> Map<String, Value> {
        tracing::debug!(exposure = %exposure_url, "resolving exposure");
        let mut exposure = Map::new();
        exposure.insert("href".to_string(), Value::String(exposure_url.to_string()));
        let Some(document) = self.fetch_document(exposure_url) else {
            return exposure;
        };
        if let Some(item) = document.first_item() {
            exposure.extend(flatten_data(&item.data));
        }
        let links = followable_links(document.collection.links.as_deref())
            .map(|link| Value::Object(self.classify_link(link, Some(BOOKMARK_REL))))
            .collect();
        exposure.insert("links".to_string(), Value::Array(links));
        exposure
    }

    /// Describes one link as `{href, prompt, relationship}`.
    ///
    /// Links whose relation equals `follow` and which stay on this instance
    /// are fetched; their first item's fields and their own classified
    /// links are merged in. A `section` link prompted "Model Metadata" also
    /// gets a flattened `model_metadata` mapping.
    pub fn classify_link(&self, link: &Link, follow: Option<&str>) -> Map<String, Value> {
        let mut descriptor = Map::new();
        descriptor.insert("href".to_string(), Value::String(link.href.clone()));
        descriptor.insert("prompt".to_string(), Value::String(link.prompt.clone()));
        descriptor.insert("relationship".to_string(), Value::String(link.rel.clone()));

        let known = KNOWN_RELS.contains(&link.rel.as_str())
            && KNOWN_PROMPTS.contains(&link.prompt.as_str());
        if !known {
            tracing::debug!(
                rel = %link.rel,
                prompt = %link.prompt,
                href = %link.href,
                "unrecognised link"
            );
        }

        if follow == Some(link.rel.as_str()) && self.instance.contains(&link.href) {
            if let Some(document) = self.fetch_document(&link.href) {
                if let Some(item) = document.first_item() {
                    descriptor.extend(flatten_data(&item.data));
                }
                if let Some(links) = document.collection.links.as_deref() {
                    let nested = followable_links(Some(links))
                        .map(|nested| Value::Object(self.classify_link(nested, follow)))
                        .collect();
                    descriptor.insert("links".to_string(), Value::Array(nested));
                }
            }
        }

        if link.rel == SECTION_REL && link.prompt == MODEL_METADATA_PROMPT {
            if let Some(item) = self
                .fetch_document(&link.href)
                .and_then(|document| document.collection.items.into_iter().next())
            {
                descriptor.insert(
                    "model_metadata".to_string(),
                    Value::Object(flatten_data(&item.data)),
                );
            }
        }

        descriptor
    }

    fn collection_hrefs(&self) -> Vec<String> {
        let url = self.instance.workspace_collection_url();
        let Some(document) = self.fetch_document(&url) else {
            tracing::error!(url = %url, "unable to retrieve the workspace listing");
            return Vec::new();
        };
        let hrefs = followable_links(document.collection.links.as_deref())
            .map(|link| link.href.clone())
            .collect::<Vec<_>>();
        tracing::info!(total = hrefs.len(), "workspaces listed by instance");
        hrefs
    }

    fn fetch_document(&self, url: &str) -> Option<CollectionDocument> {
        let value = self.client.fetch_json(url)?;
        match CollectionDocument::from_value(value) {
            Ok(document) => Some(document),
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "response is not a PMR collection");
                None
            }
        }
    }
}
