//! Concrete wrappers
//!
//! One module per resource kind. Each maps provider records to items and
//! edges; everything else (pagination, caching, validation) is shared.
//!
//! | type | capabilities |
//! |------|--------------|
//! | `gcp-cloud-resource-manager-project` | get, list |
//! | `gcp-compute-instance` | get, list, list stream |
//! | `gcp-compute-disk` | get, list, list stream |
//! | `gcp-container-cluster` | get, list |
//! | `gcp-container-node-pool` | get, search, search stream |

mod compute_disk;
mod compute_instance;
mod container_cluster;
mod container_node_pool;
mod project;

pub use compute_disk::{disk_to_item, ComputeDisk};
pub use compute_instance::{instance_to_item, ComputeInstance};
pub use container_cluster::{cluster_to_item, ContainerCluster};
pub use container_node_pool::{node_pool_to_item, ContainerNodePool};
pub use project::{project_to_item, Project};

use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::catalog::{types, Catalog, CatalogError};
use crate::context::QueryContext;
use crate::error::{ErrorKind, QueryError, QueryResult};
use crate::gcp::client::ResourceClient;
use crate::scope::{Location, ScopeBinding};
use crate::wrapper::Wrapper;

/// Types that have a wrapper
pub const SUPPORTED_TYPES: &[&str] = &[
    types::RESOURCE_MANAGER_PROJECT,
    types::COMPUTE_INSTANCE,
    types::COMPUTE_DISK,
    types::CONTAINER_CLUSTER,
    types::CONTAINER_NODE_POOL,
];

/// Scopes a type is queried in, given a project and its locations
pub fn binding_for(item_type: &str, project_id: &str, locations: &[String]) -> Result<ScopeBinding> {
    if item_type == types::RESOURCE_MANAGER_PROJECT {
        return Ok(ScopeBinding::global());
    }
    if locations.is_empty() {
        bail!("{} needs at least one location", item_type);
    }
    ScopeBinding::multi(
        locations
            .iter()
            .map(|l| Location::zonal(project_id, l))
            .collect(),
    )
}

/// Build the wrapper for a type
pub fn build(
    item_type: &str,
    client: Arc<dyn ResourceClient>,
    binding: ScopeBinding,
    catalog: &Catalog,
) -> Result<Arc<dyn Wrapper>> {
    let wrapper: Arc<dyn Wrapper> = match item_type {
        types::RESOURCE_MANAGER_PROJECT => Arc::new(Project::new(client, binding, catalog)?),
        types::COMPUTE_INSTANCE => Arc::new(ComputeInstance::new(client, binding, catalog)?),
        types::COMPUTE_DISK => Arc::new(ComputeDisk::new(client, binding, catalog)?),
        types::CONTAINER_CLUSTER => Arc::new(ContainerCluster::new(client, binding, catalog)?),
        types::CONTAINER_NODE_POOL => Arc::new(ContainerNodePool::new(client, binding, catalog)?),
        other => bail!("no wrapper for item type {}", other),
    };
    Ok(wrapper)
}

/// Check a new wrapper's edge types against the catalog
pub(crate) fn registered<W: Wrapper>(wrapper: W, catalog: &Catalog) -> Result<W, CatalogError> {
    let links: BTreeSet<String> = wrapper
        .potential_links()
        .into_iter()
        .map(str::to_string)
        .collect();
    catalog.check_links(wrapper.item_type(), &links)?;
    Ok(wrapper)
}

/// Fetch one record, racing the query context
pub(crate) async fn fetch_record(
    ctx: &QueryContext,
    client: &dyn ResourceClient,
    url: &str,
    scope: &str,
    item_type: &str,
) -> QueryResult<Value> {
    match ctx.run(client.get(url)).await {
        Ok(Ok(record)) => Ok(record),
        Ok(Err(err)) => Err(QueryError::from_backend(&err, scope, item_type)),
        Err(stopped) => Err(stopped.into_error(scope, item_type)),
    }
}

/// Project and location of a bound scope
pub(crate) fn project_and_location<'a>(
    location: &'a Location,
    scope: &str,
    item_type: &str,
) -> QueryResult<(&'a str, &'a str)> {
    match (location.project_id(), location.location()) {
        (Some(project), Some(loc)) => Ok((project, loc)),
        _ => Err(QueryError::invalid_scope(scope, item_type)),
    }
}

/// Error for a fetched record that carries no identity
pub(crate) fn missing_identity(scope: &str, item_type: &str) -> QueryError {
    QueryError::new(
        ErrorKind::BackendError,
        "backend returned a record without a name",
        scope,
        item_type,
    )
}

/// Non-empty string at a JSON pointer
pub(crate) fn str_at<'a>(record: &'a Value, pointer: &str) -> Option<&'a str> {
    record
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Elements of the array at a JSON pointer
pub(crate) fn array_at<'a>(record: &'a Value, pointer: &str) -> impl Iterator<Item = &'a Value> {
    record
        .pointer(pointer)
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClient;

    #[test]
    fn test_every_supported_type_builds() {
        let catalog = Catalog::builtin().unwrap();
        let client: Arc<dyn ResourceClient> = Arc::new(FakeClient::new());
        let locations = vec!["us-central1-a".to_string()];

        for item_type in SUPPORTED_TYPES {
            let binding = binding_for(item_type, "my-project", &locations).unwrap();
            let wrapper = build(item_type, client.clone(), binding, &catalog).unwrap();
            assert_eq!(wrapper.item_type(), *item_type);
            assert!(!wrapper.get_lookups().is_empty());
            assert!(!wrapper.iam_permissions().is_empty());
            assert!(!wrapper.predefined_role().is_empty());
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let catalog = Catalog::builtin().unwrap();
        let client: Arc<dyn ResourceClient> = Arc::new(FakeClient::new());
        assert!(build("gcp-nope", client, ScopeBinding::global(), &catalog).is_err());
    }

    #[test]
    fn test_project_type_is_global() {
        let binding = binding_for(types::RESOURCE_MANAGER_PROJECT, "my-project", &[]).unwrap();
        assert_eq!(binding.scopes(), vec!["global"]);
        assert!(binding_for(types::COMPUTE_DISK, "my-project", &[]).is_err());
    }
}
