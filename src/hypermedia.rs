//! Shapes of the PMR Collection+JSON documents and helpers for walking the
//! loosely-structured values stored inside an exposure.
//!
//! Only the parts the crawler reads are typed. Everything below an item's
//! `data` fields stays a [`serde_json::Value`] tree, which is searched with
//! [`find_field`].

use serde::Deserialize;
use serde_json::{Map, Value};

/// Media type PMR answers with when asked for its JSON API.
pub const PMR_JSON_MEDIA_TYPE: &str = "application/vnd.physiome.pmr2.json.1";

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionDocument {
    pub collection: Collection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub links: Option<Vec<Link>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub data: Vec<DataField>,
    #[serde(default)]
    pub links: Option<Vec<Link>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataField {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub rel: String,
}

impl CollectionDocument {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn first_item(&self) -> Option<&Item> {
        self.collection.items.first()
    }
}

/// Links that point somewhere. A link without an `href` is logged and
/// skipped so the rest of its document stays usable.
pub fn followable_links(links: Option<&[Link]>) -> impl Iterator<Item = &Link> {
    links.unwrap_or_default().iter().filter(|link| {
        let blank = link.href.trim().is_empty();
        if blank {
            tracing::debug!(prompt = %link.prompt, rel = %link.rel, "link without href skipped");
        }
        !blank
    })
}

/// Collapses an item's `[{name, value}, ...]` data list into a mapping.
/// Later duplicates win.
pub fn flatten_data(data: &[DataField]) -> Map<String, Value> {
    let mut out = Map::new();
    for field in data {
        out.insert(field.name.clone(), field.value.clone());
    }
    out
}

/// Depth-first search for the first object key named `name`, at any depth
/// of nested objects and arrays.
///
/// Within an object the direct key is checked before descending into that
/// object's children in key order.
pub fn find_field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(name) {
                if !found.is_null() {
                    return Some(found);
                }
            }
            map.values().find_map(|child| find_field(child, name))
        }
        Value::Array(items) => items.iter().find_map(|child| find_field(child, name)),
        _ => None,
    }
}

/// Renders a scalar data value as text: strings verbatim, `null` as empty,
/// anything else in its JSON form.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
