//! Compute Engine VM instances

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{array_at, fetch_record, missing_identity, project_and_location, registered, str_at};
use crate::catalog::{types, Catalog, CatalogError};
use crate::context::QueryContext;
use crate::error::QueryResult;
use crate::gcp::client::ResourceClient;
use crate::item::{BlastPropagation, Health, Item, LinkSet, LinkedItemQuery, QueryMethod};
use crate::links::{http_links, ip_or_dns_link, link_by_reference, service_account_link, short_name};
use crate::pager::{collect_pages, stream_pages};
use crate::scope::ScopeBinding;
use crate::sink::QuerySink;
use crate::wrapper::{query_parts, ItemTypeLookup, ListStreamer, Lister, TerraformMapping, Wrapper};

const ITEM_TYPE: &str = types::COMPUTE_INSTANCE;

// Stopped and terminated instances are healthy at rest
const HEALTH: &[(&str, Health)] = &[
    ("RUNNING", Health::Ok),
    ("STOPPED", Health::Ok),
    ("SUSPENDED", Health::Ok),
    ("TERMINATED", Health::Ok),
    ("PROVISIONING", Health::Pending),
    ("STAGING", Health::Pending),
    ("REPAIRING", Health::Pending),
    ("STOPPING", Health::Pending),
    ("SUSPENDING", Health::Pending),
];

pub struct ComputeInstance {
    client: Arc<dyn ResourceClient>,
    binding: ScopeBinding,
}

impl ComputeInstance {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        binding: ScopeBinding,
        catalog: &Catalog,
    ) -> Result<Self, CatalogError> {
        registered(Self { client, binding }, catalog)
    }

    fn instances_url(&self, scope: &str, name: Option<&str>) -> QueryResult<String> {
        let location = self.binding.resolve(scope, ITEM_TYPE)?;
        let (project, zone) = project_and_location(location, scope, ITEM_TYPE)?;
        let resource = match name {
            Some(name) => format!("instances/{}", name),
            None => "instances".to_string(),
        };
        Ok(self.client.endpoints().compute_zonal_url(project, zone, &resource))
    }
}

/// Map an instance record. Records without a name yield `None`.
pub fn instance_to_item(record: &Value, scope: &str) -> QueryResult<Option<Item>> {
    let Some(name) = str_at(record, "/name") else {
        return Ok(None);
    };

    let mut item = Item::from_record(ITEM_TYPE, "name", name, scope, record, "labels");
    item.health = str_at(record, "/status").map(|s| Health::from_status(s, HEALTH));

    let mut links = LinkSet::new();

    for disk in array_at(record, "/disks") {
        if let Some(source) = str_at(disk, "/source") {
            links.extend(link_by_reference(
                source,
                "disks",
                types::COMPUTE_DISK,
                scope,
                BlastPropagation::BOTH,
            ));
        }
    }

    for nic in array_at(record, "/networkInterfaces") {
        if let Some(network) = str_at(nic, "/network") {
            links.extend(link_by_reference(
                network,
                "networks",
                types::COMPUTE_NETWORK,
                scope,
                BlastPropagation::TO_PARENT,
            ));
        }
        if let Some(subnetwork) = str_at(nic, "/subnetwork") {
            links.extend(link_by_reference(
                subnetwork,
                "subnetworks",
                types::COMPUTE_SUBNETWORK,
                scope,
                BlastPropagation::TO_PARENT,
            ));
        }
        if let Some(ip) = str_at(nic, "/networkIP") {
            links.extend(ip_or_dns_link(ip));
        }
        for access in array_at(nic, "/accessConfigs") {
            if let Some(ip) = str_at(access, "/natIP") {
                links.extend(ip_or_dns_link(ip));
            }
        }
    }

    for account in array_at(record, "/serviceAccounts") {
        if let Some(email) = str_at(account, "/email") {
            links.extend(service_account_link(email, scope));
        }
    }

    // Managed instances name their group manager in metadata. The value uses
    // the project number, so the holder's scope is used instead.
    let created_by = array_at(record, "/metadata/items")
        .find(|entry| str_at(entry, "/key") == Some("created-by"))
        .and_then(|entry| str_at(entry, "/value"));
    if let Some(manager) = created_by.filter(|v| v.contains("/instanceGroupManagers/")) {
        links.push(LinkedItemQuery::get(
            types::COMPUTE_INSTANCE_GROUP_MANAGER,
            short_name(manager),
            scope,
            BlastPropagation::TO_PARENT,
        ));
    }

    // startup-script-url and friends; gs:// locations are skipped
    for entry in array_at(record, "/metadata/items") {
        let is_url_key = str_at(entry, "/key").is_some_and(|k| k.ends_with("-url"));
        if let Some(value) = str_at(entry, "/value").filter(|_| is_url_key) {
            links.extend(http_links(value));
        }
    }

    item.linked_item_queries = links.into_vec();
    Ok(Some(item))
}

#[async_trait]
impl Wrapper for ComputeInstance {
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
            types::COMPUTE_DISK,
            types::COMPUTE_NETWORK,
            types::COMPUTE_SUBNETWORK,
            types::COMPUTE_INSTANCE_GROUP_MANAGER,
            types::IAM_SERVICE_ACCOUNT,
            types::IP,
            types::DNS,
            types::HTTP,
        ]
        .into()
    }

    fn iam_permissions(&self) -> Vec<&'static str> {
        vec!["compute.instances.get", "compute.instances.list"]
    }

    fn predefined_role(&self) -> &'static str {
        "roles/compute.viewer"
    }

    fn terraform_mappings(&self) -> Vec<TerraformMapping> {
        vec![TerraformMapping {
            method: QueryMethod::Get,
            query_field: "google_compute_instance.name",
        }]
    }

    async fn get(&self, ctx: &QueryContext, scope: &str, parts: &[String]) -> QueryResult<Item> {
        let [name] = query_parts::<1>(parts, scope, ITEM_TYPE)?;
        let url = self.instances_url(scope, Some(name))?;
        let record = fetch_record(ctx, self.client.as_ref(), &url, scope, ITEM_TYPE).await?;
        instance_to_item(&record, scope)?.ok_or_else(|| missing_identity(scope, ITEM_TYPE))
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        Some(self as &dyn Lister)
    }

    fn as_list_streamer(&self) -> Option<&dyn ListStreamer> {
        Some(self as &dyn ListStreamer)
    }
}

#[async_trait]
impl Lister for ComputeInstance {
    async fn list(&self, ctx: &QueryContext, scope: &str) -> QueryResult<Vec<Item>> {
        let url = self.instances_url(scope, None)?;
        let mut pager = self.client.pager(&url, "items");
        collect_pages(ctx, pager.as_mut(), scope, ITEM_TYPE, &instance_to_item).await
    }
}

#[async_trait]
impl ListStreamer for ComputeInstance {
    async fn list_stream(&self, ctx: &QueryContext, scope: &str, sink: &dyn QuerySink) {
        let url = match self.instances_url(scope, None) {
            Ok(url) => url,
            Err(err) => {
                sink.send_error(err);
                return;
            },
        };
        let mut pager = self.client.pager(&url, "items");
        stream_pages(ctx, pager.as_mut(), scope, ITEM_TYPE, &instance_to_item, sink).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scope::Location;
    use crate::sink::CollectingSink;
    use crate::testing::FakeClient;
    use serde_json::json;

    const SCOPE: &str = "my-project.us-central1-a";
    const INSTANCES_URL: &str =
        "https://compute.googleapis.com/compute/v1/projects/my-project/zones/us-central1-a/instances";

    fn sample_instance(name: &str) -> Value {
        json!({
            "name": name,
            "status": "RUNNING",
            "machineType": "zones/us-central1-a/machineTypes/e2-medium",
            "labels": {"team": "web"},
            "disks": [
                {"source": "https://www.googleapis.com/compute/v1/projects/my-project/zones/us-central1-a/disks/boot-1"},
                {"source": "https://www.googleapis.com/compute/v1/projects/my-project/zones/us-central1-a/disks/boot-1"}
            ],
            "networkInterfaces": [{
                "network": "https://www.googleapis.com/compute/v1/projects/net-host/global/networks/shared",
                "subnetwork": "https://www.googleapis.com/compute/v1/projects/net-host/regions/us-central1/subnetworks/web",
                "networkIP": "10.0.0.5",
                "accessConfigs": [{"natIP": "34.1.2.3"}]
            }],
            "serviceAccounts": [{"email": "web@my-project.iam.gserviceaccount.com"}],
            "metadata": {"items": [
                {"key": "created-by", "value": "projects/123456/zones/us-central1-a/instanceGroupManagers/web-igm"}
            ]}
        })
    }

    fn wrapper(client: FakeClient) -> ComputeInstance {
        let binding = ScopeBinding::multi(vec![
            Location::zonal("my-project", "us-central1-a"),
            Location::zonal("my-project", "us-central1-b"),
        ])
        .unwrap();
        ComputeInstance::new(Arc::new(client), binding, &Catalog::builtin().unwrap()).unwrap()
    }

    fn link<'a>(item: &'a Item, item_type: &str) -> &'a LinkedItemQuery {
        item.linked_item_queries
            .iter()
            .find(|l| l.query.item_type == item_type)
            .unwrap_or_else(|| panic!("no link to {}", item_type))
    }

    #[test]
    fn test_instance_links() {
        let item = instance_to_item(&sample_instance("vm-1"), SCOPE).unwrap().unwrap();
        assert!(item.validate().is_ok());
        assert_eq!(item.health, Some(Health::Ok));

        // duplicate disk references collapse into one edge
        let disks: Vec<_> = item
            .linked_item_queries
            .iter()
            .filter(|l| l.query.item_type == types::COMPUTE_DISK)
            .collect();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].query.query, "boot-1");
        assert_eq!(disks[0].query.scope, SCOPE);

        let subnet = link(&item, types::COMPUTE_SUBNETWORK);
        assert_eq!(subnet.query.scope, "net-host.us-central1");
        assert_eq!(subnet.blast_propagation, BlastPropagation::TO_PARENT);

        assert_eq!(link(&item, types::COMPUTE_NETWORK).query.scope, "net-host");

        let ips: Vec<_> = item
            .linked_item_queries
            .iter()
            .filter(|l| l.query.item_type == types::IP)
            .map(|l| l.query.query.as_str())
            .collect();
        assert_eq!(ips, vec!["10.0.0.5", "34.1.2.3"]);

        let account = link(&item, types::IAM_SERVICE_ACCOUNT);
        assert_eq!(account.query.scope, "my-project");

        let manager = link(&item, types::COMPUTE_INSTANCE_GROUP_MANAGER);
        assert_eq!(manager.query.query, "web-igm");
        assert_eq!(manager.query.scope, SCOPE);
    }

    #[test]
    fn test_bare_names_keep_holder_scope() {
        let record = json!({
            "name": "vm",
            "networkInterfaces": [{"network": "default", "subnetwork": "default"}],
            "serviceAccounts": [{"email": "123-compute@developer.gserviceaccount.com"}]
        });
        let item = instance_to_item(&record, SCOPE).unwrap().unwrap();

        for item_type in [
            types::COMPUTE_NETWORK,
            types::COMPUTE_SUBNETWORK,
            types::IAM_SERVICE_ACCOUNT,
        ] {
            assert_eq!(link(&item, item_type).query.scope, SCOPE, "{}", item_type);
        }
        assert_eq!(link(&item, types::COMPUTE_SUBNETWORK).query.query, "default");
    }

    #[test]
    fn test_script_url_metadata_links_endpoint() {
        let record = json!({
            "name": "vm",
            "metadata": {"items": [
                {"key": "startup-script-url", "value": "https://config.example.com/boot.sh"},
                {"key": "shutdown-script-url", "value": "gs://scripts/stop.sh"},
                {"key": "motd", "value": "https://not-a-link.example.com"}
            ]}
        });
        let item = instance_to_item(&record, SCOPE).unwrap().unwrap();

        let targets: Vec<_> = item
            .linked_item_queries
            .iter()
            .map(|l| (l.query.item_type.as_str(), l.query.query.as_str()))
            .collect();
        assert_eq!(
            targets,
            vec![
                (types::HTTP, "https://config.example.com/boot.sh"),
                (types::DNS, "config.example.com"),
            ]
        );
    }

    #[test]
    fn test_instance_health() {
        for (status, health) in [
            ("TERMINATED", Health::Ok),
            ("STAGING", Health::Pending),
            ("", Health::Unknown),
        ] {
            let record = json!({"name": "vm", "status": status});
            let item = instance_to_item(&record, SCOPE).unwrap().unwrap();
            let expected = if status.is_empty() { None } else { Some(health) };
            assert_eq!(item.health, expected);
        }
    }

    #[tokio::test]
    async fn test_list_is_per_zone() {
        let client = FakeClient::new().with_pages(
            INSTANCES_URL,
            vec![vec![sample_instance("vm-1"), json!({"status": "RUNNING"})]],
        );
        let instances = wrapper(client);
        let ctx = QueryContext::new();

        let items = instances.list(&ctx, SCOPE).await.unwrap();
        assert_eq!(items.len(), 1);

        // the other zone has its own (empty) listing
        let other = instances.list(&ctx, "my-project.us-central1-b").await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_list_stream_honours_cancellation() {
        let client = FakeClient::new().with_pages(
            INSTANCES_URL,
            vec![vec![sample_instance("vm-1")], vec![sample_instance("vm-2")]],
        );
        let instances = wrapper(client);
        let ctx = QueryContext::new();
        ctx.cancel();

        let sink = CollectingSink::new();
        instances.list_stream(&ctx, SCOPE, &sink).await;

        assert!(sink.items().is_empty());
        assert_eq!(sink.errors()[0].kind, ErrorKind::Cancelled);
    }
}
