//! GKE clusters

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{fetch_record, missing_identity, project_and_location, registered, str_at};
use crate::catalog::{types, Catalog, CatalogError};
use crate::context::QueryContext;
use crate::error::QueryResult;
use crate::gcp::client::ResourceClient;
use crate::item::{BlastPropagation, Health, Item, LinkSet, LinkedItemQuery, QueryMethod};
use crate::links::{crypto_key_link, ip_or_dns_link, link_by_reference, service_account_link};
use crate::pager::collect_pages;
use crate::scope::ScopeBinding;
use crate::wrapper::{query_parts, ItemTypeLookup, Lister, TerraformMapping, Wrapper};

const ITEM_TYPE: &str = types::CONTAINER_CLUSTER;

/// Status table shared with node pools
pub(crate) const GKE_HEALTH: &[(&str, Health)] = &[
    ("RUNNING", Health::Ok),
    ("PROVISIONING", Health::Pending),
    ("RECONCILING", Health::Pending),
    ("STOPPING", Health::Pending),
    ("ERROR", Health::Error),
    ("RUNNING_WITH_ERROR", Health::Error),
    ("DEGRADED", Health::Error),
];

pub struct ContainerCluster {
    client: Arc<dyn ResourceClient>,
    binding: ScopeBinding,
}

impl ContainerCluster {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        binding: ScopeBinding,
        catalog: &Catalog,
    ) -> Result<Self, CatalogError> {
        registered(Self { client, binding }, catalog)
    }

    fn clusters_url(&self, scope: &str, name: Option<&str>) -> QueryResult<String> {
        let location = self.binding.resolve(scope, ITEM_TYPE)?;
        let (project, loc) = project_and_location(location, scope, ITEM_TYPE)?;
        let resource = match name {
            Some(name) => format!("clusters/{}", name),
            None => "clusters".to_string(),
        };
        Ok(self
            .client
            .endpoints()
            .container_location_url(project, loc, &resource))
    }
}

/// Map a cluster record. Records without a name yield `None`.
pub fn cluster_to_item(record: &Value, scope: &str) -> QueryResult<Option<Item>> {
    let Some(name) = str_at(record, "/name") else {
        return Ok(None);
    };

    let mut item = Item::from_record(ITEM_TYPE, "name", name, scope, record, "resourceLabels");
    item.health = str_at(record, "/status").map(|s| Health::from_status(s, GKE_HEALTH));

    let mut links = LinkSet::new();

    // Node pools are enumerated by cluster name
    links.push(LinkedItemQuery::search(
        types::CONTAINER_NODE_POOL,
        name,
        scope,
        BlastPropagation::TO_CHILDREN,
    ));

    // Full paths first; the short names are only a fallback
    let network = str_at(record, "/networkConfig/network").or_else(|| str_at(record, "/network"));
    if let Some(network) = network {
        links.extend(link_by_reference(
            network,
            "networks",
            types::COMPUTE_NETWORK,
            scope,
            BlastPropagation::TO_PARENT,
        ));
    }
    let subnetwork =
        str_at(record, "/networkConfig/subnetwork").or_else(|| str_at(record, "/subnetwork"));
    if let Some(subnetwork) = subnetwork {
        links.extend(link_by_reference(
            subnetwork,
            "subnetworks",
            types::COMPUTE_SUBNETWORK,
            scope,
            BlastPropagation::TO_PARENT,
        ));
    }

    if let Some(endpoint) = str_at(record, "/endpoint") {
        links.extend(ip_or_dns_link(endpoint));
    }
    if let Some(endpoint) = str_at(record, "/privateClusterConfig/privateEndpoint") {
        links.extend(ip_or_dns_link(endpoint));
    }

    if str_at(record, "/databaseEncryption/state") == Some("ENCRYPTED") {
        if let Some(key) = str_at(record, "/databaseEncryption/keyName") {
            links.extend(crypto_key_link(key, BlastPropagation::TO_PARENT));
        }
    }

    if let Some(email) = str_at(record, "/nodeConfig/serviceAccount") {
        links.extend(service_account_link(email, scope));
    }

    item.linked_item_queries = links.into_vec();
    Ok(Some(item))
}

#[async_trait]
impl Wrapper for ContainerCluster {
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
        vec![ItemTypeLookup::new("name", ITEM_TYPE)]
    }

    fn potential_links(&self) -> BTreeSet<&'static str> {
        [
            types::CONTAINER_NODE_POOL,
            types::COMPUTE_NETWORK,
            types::COMPUTE_SUBNETWORK,
            types::CLOUD_KMS_CRYPTO_KEY,
            types::IAM_SERVICE_ACCOUNT,
            types::IP,
            types::DNS,
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
            method: QueryMethod::Get,
            query_field: "google_container_cluster.name",
        }]
    }

    async fn get(&self, ctx: &QueryContext, scope: &str, parts: &[String]) -> QueryResult<Item> {
        let [name] = query_parts::<1>(parts, scope, ITEM_TYPE)?;
        let url = self.clusters_url(scope, Some(name))?;
        let record = fetch_record(ctx, self.client.as_ref(), &url, scope, ITEM_TYPE).await?;
        cluster_to_item(&record, scope)?.ok_or_else(|| missing_identity(scope, ITEM_TYPE))
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        Some(self as &dyn Lister)
    }
}

#[async_trait]
impl Lister for ContainerCluster {
    async fn list(&self, ctx: &QueryContext, scope: &str) -> QueryResult<Vec<Item>> {
        let url = self.clusters_url(scope, None)?;
        let mut pager = self.client.pager(&url, "clusters");
        collect_pages(ctx, pager.as_mut(), scope, ITEM_TYPE, &cluster_to_item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Location;
    use crate::testing::FakeClient;
    use serde_json::json;

    const SCOPE: &str = "my-project.us-central1";
    const CLUSTERS_URL: &str =
        "https://container.googleapis.com/v1/projects/my-project/locations/us-central1/clusters";

    fn sample_cluster() -> Value {
        json!({
            "name": "prod",
            "status": "RUNNING",
            "resourceLabels": {"env": "prod"},
            "network": "default",
            "subnetwork": "default",
            "networkConfig": {
                "network": "projects/my-project/global/networks/default",
                "subnetwork": "projects/my-project/regions/us-central1/subnetworks/default"
            },
            "endpoint": "35.1.2.3",
            "databaseEncryption": {
                "state": "ENCRYPTED",
                "keyName": "projects/my-project/locations/us-central1/keyRings/gke/cryptoKeys/etcd"
            },
            "nodeConfig": {"serviceAccount": "default"},
            "nodePools": [{"name": "pool-1"}]
        })
    }

    #[test]
    fn test_cluster_mapping() {
        let item = cluster_to_item(&sample_cluster(), SCOPE).unwrap().unwrap();

        assert!(item.validate().is_ok());
        assert_eq!(item.health, Some(Health::Ok));
        assert_eq!(item.tags.get("env").map(String::as_str), Some("prod"));

        let pools = item
            .linked_item_queries
            .iter()
            .find(|l| l.query.item_type == types::CONTAINER_NODE_POOL)
            .unwrap();
        assert_eq!(pools.query.method, QueryMethod::Search);
        assert_eq!(pools.query.query, "prod");
        assert_eq!(pools.blast_propagation, BlastPropagation::TO_CHILDREN);

        let subnet = item
            .linked_item_queries
            .iter()
            .find(|l| l.query.item_type == types::COMPUTE_SUBNETWORK)
            .unwrap();
        assert_eq!(subnet.query.scope, SCOPE);

        // the default compute account has no link
        assert!(!item
            .linked_item_queries
            .iter()
            .any(|l| l.query.item_type == types::IAM_SERVICE_ACCOUNT));
        assert!(item
            .linked_item_queries
            .iter()
            .any(|l| l.query.item_type == types::CLOUD_KMS_CRYPTO_KEY && l.query.query == "gke|etcd"));
    }

    #[test]
    fn test_decrypted_cluster_has_no_key_link() {
        let mut record = sample_cluster();
        record["databaseEncryption"]["state"] = json!("DECRYPTED");
        let item = cluster_to_item(&record, SCOPE).unwrap().unwrap();
        assert!(!item
            .linked_item_queries
            .iter()
            .any(|l| l.query.item_type == types::CLOUD_KMS_CRYPTO_KEY));
    }

    #[test]
    fn test_short_network_names_use_cluster_scope() {
        let mut record = sample_cluster();
        record.as_object_mut().unwrap().remove("networkConfig");
        let item = cluster_to_item(&record, SCOPE).unwrap().unwrap();

        for item_type in [types::COMPUTE_NETWORK, types::COMPUTE_SUBNETWORK] {
            let edge = item
                .linked_item_queries
                .iter()
                .find(|l| l.query.item_type == item_type)
                .unwrap();
            assert_eq!(edge.query.query, "default");
            assert_eq!(edge.query.scope, SCOPE);
        }
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let client = FakeClient::new()
            .with_record(&format!("{}/prod", CLUSTERS_URL), sample_cluster())
            .with_pages(CLUSTERS_URL, vec![vec![sample_cluster()]]);
        let binding = ScopeBinding::multi(vec![Location::zonal("my-project", "us-central1")]).unwrap();
        let clusters =
            ContainerCluster::new(Arc::new(client), binding, &Catalog::builtin().unwrap()).unwrap();
        let ctx = QueryContext::new();

        let item = clusters.get(&ctx, SCOPE, &["prod".to_string()]).await.unwrap();
        assert_eq!(item.unique_attribute_value, "prod");
        assert_eq!(clusters.list(&ctx, SCOPE).await.unwrap().len(), 1);
        assert!(clusters.as_list_streamer().is_none());
    }
}
