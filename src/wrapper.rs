//! Wrapper contract
//!
//! A wrapper is the per-resource-kind implementation of discovery. Every
//! wrapper supports point lookups through [`Wrapper::get`]. Enumeration,
//! search and their streaming forms are separate capability traits; a
//! wrapper advertises the ones it implements through the `as_*` accessors,
//! which default to `None`.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::context::QueryContext;
use crate::error::{QueryError, QueryResult};
use crate::item::{Item, QueryMethod};
use crate::sink::QuerySink;

/// Describes one positional query part
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemTypeLookup {
    /// Attribute the part is matched against, e.g. `name`
    pub by: &'static str,
    /// Type whose identity the part belongs to
    pub item_type: &'static str,
}

impl ItemTypeLookup {
    pub const fn new(by: &'static str, item_type: &'static str) -> Self {
        Self { by, item_type }
    }
}

/// How an infra-as-code resource attribute maps to a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerraformMapping {
    pub method: QueryMethod,
    /// `<terraform resource type>.<attribute>`
    pub query_field: &'static str,
}

#[async_trait]
pub trait Wrapper: Send + Sync {
    fn item_type(&self) -> &'static str;

    /// Every scope this wrapper answers for
    fn scopes(&self) -> Vec<String>;

    fn default_scope(&self) -> String;

    /// Positional query parts expected by `get`
    fn get_lookups(&self) -> Vec<ItemTypeLookup>;

    /// Every type this wrapper may emit edges to
    fn potential_links(&self) -> BTreeSet<&'static str>;

    /// IAM permissions needed to run every supported query
    fn iam_permissions(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Smallest predefined role that grants the permissions
    fn predefined_role(&self) -> &'static str {
        ""
    }

    fn terraform_mappings(&self) -> Vec<TerraformMapping> {
        Vec::new()
    }

    async fn get(&self, ctx: &QueryContext, scope: &str, parts: &[String]) -> QueryResult<Item>;

    fn as_lister(&self) -> Option<&dyn Lister> {
        None
    }

    fn as_searcher(&self) -> Option<&dyn Searcher> {
        None
    }

    fn as_list_streamer(&self) -> Option<&dyn ListStreamer> {
        None
    }

    fn as_search_streamer(&self) -> Option<&dyn SearchStreamer> {
        None
    }
}

/// Enumerate everything in a scope
#[async_trait]
pub trait Lister: Send + Sync {
    async fn list(&self, ctx: &QueryContext, scope: &str) -> QueryResult<Vec<Item>>;
}

/// Enumerate by a secondary key
#[async_trait]
pub trait Searcher: Send + Sync {
    /// One entry per supported search key shape
    fn search_lookups(&self) -> Vec<Vec<ItemTypeLookup>>;

    async fn search(
        &self,
        ctx: &QueryContext,
        scope: &str,
        parts: &[String],
    ) -> QueryResult<Vec<Item>>;
}

#[async_trait]
pub trait ListStreamer: Send + Sync {
    async fn list_stream(&self, ctx: &QueryContext, scope: &str, sink: &dyn QuerySink);
}

#[async_trait]
pub trait SearchStreamer: Send + Sync {
    async fn search_stream(
        &self,
        ctx: &QueryContext,
        scope: &str,
        parts: &[String],
        sink: &dyn QuerySink,
    );
}

/// Check query parts against the expected arity: the count must match and
/// no part may be empty.
pub fn validate_query_parts(
    parts: &[String],
    expected: usize,
    scope: &str,
    item_type: &str,
) -> QueryResult<()> {
    if parts.len() != expected {
        return Err(QueryError::invalid_query(
            format!(
                "expected {} query part(s), got {}",
                expected,
                parts.len()
            ),
            scope,
            item_type,
        ));
    }

    if let Some(index) = parts.iter().position(|p| p.trim().is_empty()) {
        return Err(QueryError::invalid_query(
            format!("query part {} is empty", index + 1),
            scope,
            item_type,
        ));
    }

    Ok(())
}

/// Validate and destructure query parts in one step
pub fn query_parts<'a, const N: usize>(
    parts: &'a [String],
    scope: &str,
    item_type: &str,
) -> QueryResult<[&'a str; N]> {
    validate_query_parts(parts, N, scope, item_type)?;
    let mut out = [""; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part.as_str();
    }
    Ok(out)
}
