//! Compute Engine persistent disks

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{array_at, fetch_record, missing_identity, project_and_location, registered, str_at};
use crate::catalog::{types, Catalog, CatalogError};
use crate::context::QueryContext;
use crate::error::QueryResult;
use crate::gcp::client::ResourceClient;
use crate::item::{BlastPropagation, Health, Item, LinkSet, QueryMethod};
use crate::links::{crypto_key_link, link_by_reference};
use crate::pager::{collect_pages, stream_pages};
use crate::scope::ScopeBinding;
use crate::sink::QuerySink;
use crate::wrapper::{query_parts, ItemTypeLookup, ListStreamer, Lister, TerraformMapping, Wrapper};

const ITEM_TYPE: &str = types::COMPUTE_DISK;

const HEALTH: &[(&str, Health)] = &[
    ("READY", Health::Ok),
    ("CREATING", Health::Pending),
    ("RESTORING", Health::Pending),
    ("DELETING", Health::Pending),
    ("FAILED", Health::Error),
];

pub struct ComputeDisk {
    client: Arc<dyn ResourceClient>,
    binding: ScopeBinding,
}

impl ComputeDisk {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        binding: ScopeBinding,
        catalog: &Catalog,
    ) -> Result<Self, CatalogError> {
        registered(Self { client, binding }, catalog)
    }

    fn disks_url(&self, scope: &str, name: Option<&str>) -> QueryResult<String> {
        let location = self.binding.resolve(scope, ITEM_TYPE)?;
        let (project, zone) = project_and_location(location, scope, ITEM_TYPE)?;
        let resource = match name {
            Some(name) => format!("disks/{}", name),
            None => "disks".to_string(),
        };
        Ok(self.client.endpoints().compute_zonal_url(project, zone, &resource))
    }
}

/// Map a disk record. Records without a name yield `None`.
pub fn disk_to_item(record: &Value, scope: &str) -> QueryResult<Option<Item>> {
    let Some(name) = str_at(record, "/name") else {
        return Ok(None);
    };

    let mut item = Item::from_record(ITEM_TYPE, "name", name, scope, record, "labels");
    item.health = str_at(record, "/status").map(|s| Health::from_status(s, HEALTH));

    let mut links = LinkSet::new();

    // Instances the disk is attached to
    for user in array_at(record, "/users").filter_map(Value::as_str) {
        links.extend(link_by_reference(
            user,
            "instances",
            types::COMPUTE_INSTANCE,
            scope,
            BlastPropagation::BOTH,
        ));
    }

    // Sources are copied at creation; later changes do not propagate
    for (field, collection, item_type) in [
        ("/sourceSnapshot", "snapshots", types::COMPUTE_SNAPSHOT),
        ("/sourceImage", "images", types::COMPUTE_IMAGE),
        ("/sourceDisk", "disks", types::COMPUTE_DISK),
    ] {
        if let Some(reference) = str_at(record, field) {
            links.extend(link_by_reference(
                reference,
                collection,
                item_type,
                scope,
                BlastPropagation::NONE,
            ));
        }
    }

    if let Some(key) = str_at(record, "/diskEncryptionKey/kmsKeyName") {
        links.extend(crypto_key_link(key, BlastPropagation::TO_PARENT));
    }

    item.linked_item_queries = links.into_vec();
    Ok(Some(item))
}

#[async_trait]
impl Wrapper for ComputeDisk {
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
            types::COMPUTE_INSTANCE,
            types::COMPUTE_SNAPSHOT,
            types::COMPUTE_IMAGE,
            types::COMPUTE_DISK,
            types::CLOUD_KMS_CRYPTO_KEY,
        ]
        .into()
    }

    fn iam_permissions(&self) -> Vec<&'static str> {
        vec!["compute.disks.get", "compute.disks.list"]
    }

    fn predefined_role(&self) -> &'static str {
        "roles/compute.viewer"
    }

    fn terraform_mappings(&self) -> Vec<TerraformMapping> {
        vec![TerraformMapping {
            method: QueryMethod::Get,
            query_field: "google_compute_disk.name",
        }]
    }

    async fn get(&self, ctx: &QueryContext, scope: &str, parts: &[String]) -> QueryResult<Item> {
        let [name] = query_parts::<1>(parts, scope, ITEM_TYPE)?;
        let url = self.disks_url(scope, Some(name))?;
        let record = fetch_record(ctx, self.client.as_ref(), &url, scope, ITEM_TYPE).await?;
        disk_to_item(&record, scope)?.ok_or_else(|| missing_identity(scope, ITEM_TYPE))
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        Some(self as &dyn Lister)
    }

    fn as_list_streamer(&self) -> Option<&dyn ListStreamer> {
        Some(self as &dyn ListStreamer)
    }
}

#[async_trait]
impl Lister for ComputeDisk {
    async fn list(&self, ctx: &QueryContext, scope: &str) -> QueryResult<Vec<Item>> {
        let url = self.disks_url(scope, None)?;
        let mut pager = self.client.pager(&url, "items");
        collect_pages(ctx, pager.as_mut(), scope, ITEM_TYPE, &disk_to_item).await
    }
}

#[async_trait]
impl ListStreamer for ComputeDisk {
    async fn list_stream(&self, ctx: &QueryContext, scope: &str, sink: &dyn QuerySink) {
        let url = match self.disks_url(scope, None) {
            Ok(url) => url,
            Err(err) => {
                sink.send_error(err);
                return;
            },
        };
        let mut pager = self.client.pager(&url, "items");
        stream_pages(ctx, pager.as_mut(), scope, ITEM_TYPE, &disk_to_item, sink).await;
    }
}
