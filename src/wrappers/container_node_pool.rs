//! GKE node pools, keyed by `cluster|pool`

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::container_cluster::GKE_HEALTH;
use super::{array_at, fetch_record, missing_identity, project_and_location, registered, str_at};
use crate::catalog::{types, Catalog, CatalogError};
use crate::composite_key;
use crate::context::QueryContext;
use crate::error::{QueryError, QueryResult};
use crate::gcp::client::ResourceClient;
use crate::item::{BlastPropagation, Health, Item, LinkSet, LinkedItemQuery, QueryMethod};
use crate::links::{crypto_key_link, link_by_reference, service_account_link};
use crate::pager::{collect_pages, stream_pages};
use crate::scope::ScopeBinding;
use crate::sink::QuerySink;
use crate::wrapper::{
    query_parts, ItemTypeLookup, SearchStreamer, Searcher, TerraformMapping, Wrapper,
};

const ITEM_TYPE: &str = types::CONTAINER_NODE_POOL;

pub struct ContainerNodePool {
    client: Arc<dyn ResourceClient>,
    binding: ScopeBinding,
}

impl ContainerNodePool {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        binding: ScopeBinding,
        catalog: &Catalog,
    ) -> Result<Self, CatalogError> {
        registered(Self { client, binding }, catalog)
    }

    fn node_pools_url(&self, scope: &str, cluster: &str, pool: Option<&str>) -> QueryResult<String> {
        let location = self.binding.resolve(scope, ITEM_TYPE)?;
        let (project, loc) = project_and_location(location, scope, ITEM_TYPE)?;
        let resource = match pool {
            Some(pool) => format!("clusters/{}/nodePools/{}", cluster, pool),
            None => format!("clusters/{}/nodePools", cluster),
        };
        Ok(self
            .client
            .endpoints()
            .container_location_url(project, loc, &resource))
    }
}

/// Map a node pool record belonging to `cluster`
pub fn node_pool_to_item(record: &Value, scope: &str, cluster: &str) -> QueryResult<Option<Item>> {
    let Some(name) = str_at(record, "/name") else {
        return Ok(None);
    };

    // A separator inside either name would make the key ambiguous
    let key = composite_key::encode(&[cluster, name]);
    composite_key::decode(&key, 2).map_err(|err| QueryError {
        scope: scope.to_string(),
        item_type: ITEM_TYPE.to_string(),
        ..err
    })?;
    let mut item = Item::from_record(ITEM_TYPE, "uniqueName", key, scope, record, "");
    if let Some(Value::Object(labels)) = record.pointer("/config/labels") {
        for (k, v) in labels {
            if let Some(v) = v.as_str() {
                item.tags.insert(k.clone(), v.to_string());
            }
        }
    }
    item.health = str_at(record, "/status").map(|s| Health::from_status(s, GKE_HEALTH));

    let mut links = LinkSet::new();

    links.push(LinkedItemQuery::get(
        types::CONTAINER_CLUSTER,
        cluster,
        scope,
        BlastPropagation::TO_PARENT,
    ));

    if let Some(email) = str_at(record, "/config/serviceAccount") {
        links.extend(service_account_link(email, scope));
    }

    if let Some(key) = str_at(record, "/config/bootDiskKmsKey") {
        links.extend(crypto_key_link(key, BlastPropagation::TO_PARENT));
    }

    // Group managers live in zones, not in the pool's location
    for url in array_at(record, "/instanceGroupUrls").filter_map(Value::as_str) {
        links.extend(link_by_reference(
            url,
            "instanceGroupManagers",
            types::COMPUTE_INSTANCE_GROUP_MANAGER,
            scope,
            BlastPropagation::BOTH,
        ));
    }

    item.linked_item_queries = links.into_vec();
    Ok(Some(item))
}

#[async_trait]
impl Wrapper for ContainerNodePool {
    fn item_type(&self) -> &'static str {
        ITEM_TYPE
    }

    fn scopes(&self) -> Vec<String> {
        self.binding.scopes()
    }

    fn default_scope(&self) -> String {
        self.binding.default_scope()
    }

    fn get_lookups(&self) -> Vec<ItemTypeLookup> {
        vec![
            ItemTypeLookup::new("name", types::CONTAINER_CLUSTER),
            ItemTypeLookup::new("name", ITEM_TYPE),
        ]
    }

    fn potential_links(&self) -> BTreeSet<&'static str> {
        [
            types::CONTAINER_CLUSTER,
            types::IAM_SERVICE_ACCOUNT,
            types::CLOUD_KMS_CRYPTO_KEY,
            types::COMPUTE_INSTANCE_GROUP_MANAGER,
        ]
        .into()
    }

    fn iam_permissions(&self) -> Vec<&'static str> {
        vec!["container.clusters.get", "container.clusters.list"]
    }

    fn predefined_role(&self) -> &'static str {
        "roles/container.clusterViewer"
    }

    fn terraform_mappings(&self) -> Vec<TerraformMapping> {
        vec![TerraformMapping {
            method: QueryMethod::Search,
            query_field: "google_container_node_pool.cluster",
        }]
    }

    async fn get(&self, ctx: &QueryContext, scope: &str, parts: &[String]) -> QueryResult<Item> {
        let [cluster, pool] = query_parts::<2>(parts, scope, ITEM_TYPE)?;
        let url = self.node_pools_url(scope, cluster, Some(pool))?;
        let record = fetch_record(ctx, self.client.as_ref(), &url, scope, ITEM_TYPE).await?;
        node_pool_to_item(&record, scope, cluster)?.ok_or_else(|| missing_identity(scope, ITEM_TYPE))
    }

    fn as_searcher(&self) -> Option<&dyn Searcher> {
        Some(self as &dyn Searcher)
    }

    fn as_search_streamer(&self) -> Option<&dyn SearchStreamer> {
        Some(self as &dyn SearchStreamer)
    }
}

#[async_trait]
impl Searcher for ContainerNodePool {
    fn search_lookups(&self) -> Vec<Vec<ItemTypeLookup>> {
        vec![vec![ItemTypeLookup::new("name", types::CONTAINER_CLUSTER)]]
    }

    async fn search(
        &self,
        ctx: &QueryContext,
        scope: &str,
        parts: &[String],
    ) -> QueryResult<Vec<Item>> {
        let [cluster] = query_parts::<1>(parts, scope, ITEM_TYPE)?;
        let url = self.node_pools_url(scope, cluster, None)?;
        let mut pager = self.client.pager(&url, "nodePools");
        let mapper = |record: &Value, scope: &str| node_pool_to_item(record, scope, cluster);
        collect_pages(ctx, pager.as_mut(), scope, ITEM_TYPE, &mapper).await
    }
}

#[async_trait]
impl SearchStreamer for ContainerNodePool {
    async fn search_stream(
        &self,
        ctx: &QueryContext,
        scope: &str,
        parts: &[String],
        sink: &dyn QuerySink,
    ) {
        let url = query_parts::<1>(parts, scope, ITEM_TYPE)
            .and_then(|[cluster]| Ok((cluster, self.node_pools_url(scope, cluster, None)?)));
        let (cluster, url) = match url {
            Ok(found) => found,
            Err(err) => {
                sink.send_error(err);
                return;
            },
        };
        let mut pager = self.client.pager(&url, "nodePools");
        let mapper = |record: &Value, scope: &str| node_pool_to_item(record, scope, cluster);
        stream_pages(ctx, pager.as_mut(), scope, ITEM_TYPE, &mapper, sink).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scope::Location;
    use crate::sink::CollectingSink;
    use crate::testing::FakeClient;
    use crate::wrappers::cluster_to_item;
    use serde_json::json;

    const SCOPE: &str = "my-project.us-central1";
    const POOLS_URL: &str = "https://container.googleapis.com/v1/projects/my-project/locations/us-central1/clusters/prod/nodePools";

    fn sample_pool(name: &str) -> Value {
        json!({
            "name": name,
            "status": "RECONCILING",
            "config": {
                "machineType": "e2-standard-4",
                "serviceAccount": "nodes@my-project.iam.gserviceaccount.com",
                "labels": {"pool": name}
            },
            "instanceGroupUrls": [
                "https://www.googleapis.com/compute/v1/projects/my-project/zones/us-central1-f/instanceGroupManagers/gke-prod-pool-1-abc"
            ]
        })
    }

    fn wrapper(client: FakeClient) -> ContainerNodePool {
        let binding = ScopeBinding::multi(vec![Location::zonal("my-project", "us-central1")]).unwrap();
        ContainerNodePool::new(Arc::new(client), binding, &Catalog::builtin().unwrap()).unwrap()
    }

    #[test]
    fn test_separator_in_name_is_malformed_key() {
        let err = node_pool_to_item(&sample_pool("pool|1"), SCOPE, "prod").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedKey);
        assert_eq!(err.scope, SCOPE);
        assert_eq!(err.item_type, ITEM_TYPE);

        let err = node_pool_to_item(&sample_pool("pool-1"), SCOPE, "a|b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedKey);
    }

    #[test]
    fn test_node_pool_mapping() {
        let item = node_pool_to_item(&sample_pool("pool-1"), SCOPE, "prod").unwrap().unwrap();

        assert_eq!(item.unique_attribute, "uniqueName");
        assert_eq!(item.unique_attribute_value, "prod|pool-1");
        assert_eq!(item.attributes["name"], "pool-1");
        assert_eq!(item.health, Some(Health::Pending));
        assert_eq!(item.tags.get("pool").map(String::as_str), Some("pool-1"));

        // the group manager lives in a zone of the region
        let manager = item
            .linked_item_queries
            .iter()
            .find(|l| l.query.item_type == types::COMPUTE_INSTANCE_GROUP_MANAGER)
            .unwrap();
        assert_eq!(manager.query.scope, "my-project.us-central1-f");
        assert_eq!(manager.blast_propagation, BlastPropagation::BOTH);
    }

    #[test]
    fn test_parent_and_child_edges_agree() {
        let cluster = cluster_to_item(&json!({"name": "prod"}), SCOPE).unwrap().unwrap();
        let pool = node_pool_to_item(&sample_pool("pool-1"), SCOPE, "prod").unwrap().unwrap();

        let down = cluster
            .linked_item_queries
            .iter()
            .find(|l| l.query.item_type == ITEM_TYPE)
            .unwrap();
        let up = pool
            .linked_item_queries
            .iter()
            .find(|l| l.query.item_type == types::CONTAINER_CLUSTER)
            .unwrap();

        assert_eq!(down.blast_propagation, BlastPropagation::TO_CHILDREN);
        assert_eq!(up.blast_propagation, BlastPropagation::TO_PARENT);
        assert_eq!(up.query.query, cluster.unique_attribute_value);
        assert_eq!(down.query.query, "prod");
    }

    #[tokio::test]
    async fn test_get_by_composite_key() {
        let client = FakeClient::new().with_record(&format!("{}/pool-1", POOLS_URL), sample_pool("pool-1"));
        let pools = wrapper(client);
        let ctx = QueryContext::new();

        let item = pools
            .get(&ctx, SCOPE, &["prod".to_string(), "pool-1".to_string()])
            .await
            .unwrap();
        assert_eq!(item.unique_attribute_value, "prod|pool-1");

        let err = pools.get(&ctx, SCOPE, &["prod".to_string()]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidQuery);
    }

    #[tokio::test]
    async fn test_search_by_cluster() {
        let client = FakeClient::new().with_pages(
            POOLS_URL,
            vec![vec![sample_pool("pool-1"), json!({"status": "RUNNING"}), sample_pool("pool-2")]],
        );
        let pools = wrapper(client);

        let items = pools
            .search(&QueryContext::new(), SCOPE, &["prod".to_string()])
            .await
            .unwrap();
        let keys: Vec<_> = items.iter().map(|i| i.unique_attribute_value.as_str()).collect();
        assert_eq!(keys, vec!["prod|pool-1", "prod|pool-2"]);
    }

    #[tokio::test]
    async fn test_search_stream_rejects_bad_query() {
        let pools = wrapper(FakeClient::new());
        let sink = CollectingSink::new();

        pools
            .search_stream(&QueryContext::new(), SCOPE, &[" ".to_string()], &sink)
            .await;

        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::InvalidQuery);
    }
}
