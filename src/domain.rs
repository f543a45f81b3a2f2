use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::PmrError;
use crate::hypermedia::value_to_string;

/// Base URL of one PMR deployment, stored without trailing slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceUrl(String);

impl InstanceUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing-slash normalisation applied to both sides of every
    /// instance comparison.
    pub fn normalize(value: &str) -> String {
        value.trim().trim_end_matches('/').to_string()
    }

    /// True when `href` lives on this instance.
    pub fn contains(&self, href: &str) -> bool {
        href == self.0
            || href
                .strip_prefix(self.0.as_str())
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    }

    pub fn workspace_collection_url(&self) -> String {
        format!("{}/workspace", self.0)
    }
}

impl fmt::Display for InstanceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceUrl {
    type Err = PmrError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = Self::normalize(value);
        let has_scheme = normalized.starts_with("https://") || normalized.starts_with("http://");
        let has_host = normalized
            .split_once("://")
            .map(|(_, host)| !host.is_empty())
            .unwrap_or(false);
        if !has_scheme || !has_host {
            return Err(PmrError::InvalidInstanceUrl(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// One cached PMR workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub href: String,
    pub id: String,
    pub title: String,
    pub owner: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub latest_exposure: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cached_at: String,
}

impl Workspace {
    pub fn new(
        href: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            href: href.into(),
            id: id.into(),
            title: title.into(),
            owner: owner.into(),
            description: String::new(),
            latest_exposure: Map::new(),
            cached_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Key used to order listings.
    pub fn sort_key(&self) -> String {
        self.title.to_lowercase()
    }

    /// Last path segment of the workspace URL, used as the clone folder name.
    pub fn repo_name(&self) -> &str {
        self.href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Partial workspace record accumulated while reading upstream documents.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceBuilder {
    href: Option<String>,
    id: Option<String>,
    title: Option<String>,
    owner: Option<String>,
    description: Option<String>,
    latest_exposure: Option<Map<String, Value>>,
}

impl WorkspaceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    pub fn latest_exposure(mut self, exposure: Map<String, Value>) -> Self {
        self.latest_exposure = Some(exposure);
        self
    }

    /// Records one upstream data field. Returns `false` for names the
    /// workspace record does not carry.
    pub fn field(&mut self, name: &str, value: &Value) -> bool {
        let slot = match name {
            "id" => &mut self.id,
            "title" => &mut self.title,
            "owner" => &mut self.owner,
            "description" => &mut self.description,
            _ => return false,
        };
        *slot = Some(value_to_string(value));
        true
    }

    /// Finalises the record. `source` names the document the fields came
    /// from and is reported when a required field was never observed.
    pub fn build(self, source: &str) -> Result<Workspace, PmrError> {
        let missing = |field: &str| PmrError::IncompleteRecord {
            href: source.to_string(),
            field: field.to_string(),
        };
        let href = self.href.ok_or_else(|| missing("href"))?;
        let id = self.id.ok_or_else(|| missing("id"))?;
        let title = self.title.ok_or_else(|| missing("title"))?;
        let owner = self.owner.ok_or_else(|| missing("owner"))?;

        let mut workspace = Workspace::new(href, id, title, owner);
        workspace.description = self.description.unwrap_or_default();
        workspace.latest_exposure = self.latest_exposure.unwrap_or_default();
        Ok(workspace)
    }
}

/// Start-anchored workspace href filter.
///
/// A pattern matches an href when it matches some prefix of it, so
/// `https://models.physiomeproject.org/workspace/a` selects every workspace
/// whose URL starts that way while `workspace/a` on its own selects nothing.
#[derive(Debug, Clone)]
pub struct WorkspacePattern {
    source: String,
    regex: Regex,
}

impl WorkspacePattern {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, href: &str) -> bool {
        self.regex.is_match(href)
    }
}

impl fmt::Display for WorkspacePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl FromStr for WorkspacePattern {
    type Err = PmrError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let regex = Regex::new(&format!("^(?:{value})"))
            .map_err(|err| PmrError::InvalidRegex(err.to_string()))?;
        Ok(Self {
            source: value.to_string(),
            regex,
        })
    }
}

/// Which workspaces a cache operation targets.
#[derive(Debug, Clone)]
pub enum Selection {
    Workspace(String),
    Pattern(WorkspacePattern),
    All,
}

impl Selection {
    /// Builds a selection from the three mutually exclusive command-line
    /// flags. Exactly one of them must be given.
    pub fn from_flags(
        regex: Option<&str>,
        workspace: Option<&str>,
        all: bool,
    ) -> Result<Self, PmrError> {
        match (regex, workspace, all) {
            (None, Some(workspace), false) => Ok(Self::Workspace(workspace.to_string())),
            (Some(regex), None, false) => Ok(Self::Pattern(regex.parse()?)),
            (None, None, true) => Ok(Self::All),
            (None, None, false) => Err(PmrError::InvalidSelection(
                "one of --regex, --workspace or --all is required".to_string(),
            )),
            _ => Err(PmrError::InvalidSelection(
                "--regex, --workspace and --all cannot be combined".to_string(),
            )),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Selection::Workspace(href) => format!("workspace {href}"),
            Selection::Pattern(pattern) => format!("regex {pattern}"),
            Selection::All => "all workspaces".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_requires_owner() {
        let mut builder = WorkspaceBuilder::new().href("https://pmr.test/workspace/a");
        builder.field("id", &json!("a"));
        builder.field("title", &json!("A"));
        let err = builder.build("https://pmr.test/workspace/a").unwrap_err();
        assert!(matches!(err, PmrError::IncompleteRecord { field, .. } if field == "owner"));
    }

    #[test]
    fn repo_name_is_last_segment() {
        let ws = Workspace::new("https://pmr.test/workspace/beeler_reuter/", "b", "B", "o");
        assert_eq!(ws.repo_name(), "beeler_reuter");
    }
}
