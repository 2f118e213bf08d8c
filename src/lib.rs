//! gcpgraph
//!
//! Discovers Google Cloud resources as typed items connected by linked
//! queries. Each resource kind is a [`Wrapper`](wrapper::Wrapper) that maps
//! provider records to [`Item`](item::Item)s; an [`Adapter`](adapter::Adapter)
//! puts caching, query splitting and validation in front of it.
//!
//! ```text
//! caller -> Adapter (cache, arity, validation) -> Wrapper -> ResourceClient -> GCP REST
//! ```

pub mod adapter;
pub mod cache;
pub mod catalog;
pub mod composite_key;
pub mod config;
pub mod context;
pub mod error;
pub mod gcp;
pub mod item;
pub mod links;
pub mod pager;
pub mod scope;
pub mod sink;
pub mod testing;
pub mod wrapper;
pub mod wrappers;

pub use adapter::{Adapter, Capabilities};
pub use catalog::Catalog;
pub use context::QueryContext;
pub use error::{ErrorKind, QueryError, QueryResult};
pub use item::{BlastPropagation, Health, Item, LinkedItemQuery, Query, QueryMethod};
pub use scope::{Location, ScopeBinding};
