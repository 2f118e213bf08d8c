//! Items and edges
//!
//! An [`Item`] is one discovered resource. Its [`LinkedItemQuery`]s are the
//! edges to other resources, each carrying a [`BlastPropagation`] that says
//! in which direction a change is expected to spread.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// How an edge target is looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryMethod {
    Get,
    List,
    Search,
}

impl QueryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMethod::Get => "GET",
            QueryMethod::List => "LIST",
            QueryMethod::Search => "SEARCH",
        }
    }
}

/// A query that finds the target of an edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "type")]
    pub item_type: String,
    pub method: QueryMethod,
    pub query: String,
    pub scope: String,
}

/// Direction in which a change spreads along an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlastPropagation {
    /// A change to the target can affect the item holding the edge
    #[serde(rename = "in")]
    pub inward: bool,
    /// A change to the item holding the edge can affect the target
    #[serde(rename = "out")]
    pub outward: bool,
}

impl BlastPropagation {
    pub const fn new(inward: bool, outward: bool) -> Self {
        Self { inward, outward }
    }

    /// Tightly coupled resources, and references resolved out of configuration
    pub const BOTH: Self = Self::new(true, true);
    /// Point-in-time copies and other independent references
    pub const NONE: Self = Self::new(false, false);
    /// Child to parent: the parent going away breaks the child
    pub const TO_PARENT: Self = Self::new(true, false);
    /// Parent to its enumerated children
    pub const TO_CHILDREN: Self = Self::new(false, true);
}

/// An edge from an item to another resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedItemQuery {
    pub query: Query,
    pub blast_propagation: BlastPropagation,
}

impl LinkedItemQuery {
    pub fn get(item_type: &str, query: &str, scope: &str, blast: BlastPropagation) -> Self {
        Self::new(item_type, QueryMethod::Get, query, scope, blast)
    }

    pub fn search(item_type: &str, query: &str, scope: &str, blast: BlastPropagation) -> Self {
        Self::new(item_type, QueryMethod::Search, query, scope, blast)
    }

    fn new(
        item_type: &str,
        method: QueryMethod,
        query: &str,
        scope: &str,
        blast: BlastPropagation,
    ) -> Self {
        Self {
            query: Query {
                item_type: item_type.to_string(),
                method,
                query: query.to_string(),
                scope: scope.to_string(),
            },
            blast_propagation: blast,
        }
    }
}

/// Health derived from a provider status string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Health {
    Ok,
    Pending,
    Error,
    Unknown,
}

impl Health {
    /// Look a status up in a mapping table; unlisted statuses are `Unknown`
    pub fn from_status(status: &str, table: &[(&str, Health)]) -> Self {
        table
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(status))
            .map(|(_, h)| *h)
            .unwrap_or(Health::Unknown)
    }
}

/// A discovered resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub item_type: String,
    pub unique_attribute: String,
    pub unique_attribute_value: String,
    pub attributes: BTreeMap<String, Value>,
    pub scope: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub linked_item_queries: Vec<LinkedItemQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,
}

/// Structural problems with an item produced by mapping code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemValidationError {
    #[error("item has no type")]
    MissingType,
    #[error("item has no unique attribute name")]
    MissingUniqueAttribute,
    #[error("item of type {0} has an empty unique attribute value")]
    MissingUniqueAttributeValue(String),
    #[error("item {0} has no scope")]
    MissingScope(String),
    #[error("item {item} has an incomplete link to {target:?}")]
    InvalidLink { item: String, target: Query },
}

impl Item {
    /// Start an item from a provider record. Top-level fields become
    /// attributes, except `labels_field` which becomes the tags.
    pub fn from_record(
        item_type: &str,
        unique_attribute: &str,
        unique_attribute_value: impl Into<String>,
        scope: &str,
        record: &Value,
        labels_field: &str,
    ) -> Self {
        let mut attributes = BTreeMap::new();
        let mut tags = BTreeMap::new();

        if let Value::Object(map) = record {
            for (key, value) in map {
                if key == labels_field {
                    if let Value::Object(labels) = value {
                        for (k, v) in labels {
                            let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                            tags.insert(k.clone(), v);
                        }
                    }
                    continue;
                }
                attributes.insert(key.clone(), value.clone());
            }
        }

        let unique_attribute_value = unique_attribute_value.into();
        attributes.insert(
            unique_attribute.to_string(),
            Value::String(unique_attribute_value.clone()),
        );

        Self {
            item_type: item_type.to_string(),
            unique_attribute: unique_attribute.to_string(),
            unique_attribute_value,
            attributes,
            scope: scope.to_string(),
            tags,
            linked_item_queries: Vec::new(),
            health: None,
        }
    }

    /// Globally unique reference: type, scope and unique value
    pub fn reference(&self) -> String {
        format!(
            "{}/{}/{}",
            self.item_type, self.scope, self.unique_attribute_value
        )
    }

    pub fn validate(&self) -> Result<(), ItemValidationError> {
        if self.item_type.is_empty() {
            return Err(ItemValidationError::MissingType);
        }
        if self.unique_attribute.is_empty() {
            return Err(ItemValidationError::MissingUniqueAttribute);
        }
        if self.unique_attribute_value.is_empty() {
            return Err(ItemValidationError::MissingUniqueAttributeValue(
                self.item_type.clone(),
            ));
        }
        if self.scope.is_empty() {
            return Err(ItemValidationError::MissingScope(self.reference()));
        }

        for link in &self.linked_item_queries {
            let q = &link.query;
            if q.item_type.is_empty() || q.query.is_empty() || q.scope.is_empty() {
                return Err(ItemValidationError::InvalidLink {
                    item: self.reference(),
                    target: q.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Ordered set of edges for one item. Edges to the same (type, scope, query)
/// are kept once; the first one wins.
#[derive(Debug, Default)]
pub struct LinkSet {
    seen: HashSet<(String, String, String)>,
    links: Vec<LinkedItemQuery>,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, link: LinkedItemQuery) {
        let key = (
            link.query.item_type.clone(),
            link.query.scope.clone(),
            link.query.query.clone(),
        );
        if self.seen.insert(key) {
            self.links.push(link);
        }
    }

    pub fn extend(&mut self, links: impl IntoIterator<Item = LinkedItemQuery>) {
        for link in links {
            self.push(link);
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn into_vec(self) -> Vec<LinkedItemQuery> {
        self.links
    }
}
