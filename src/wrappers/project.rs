//! Resource Manager projects

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{fetch_record, missing_identity, registered, str_at};
use crate::catalog::{types, Catalog, CatalogError};
use crate::context::QueryContext;
use crate::error::QueryResult;
use crate::gcp::client::ResourceClient;
use crate::item::{Health, Item, QueryMethod};
use crate::pager::collect_pages;
use crate::scope::ScopeBinding;
use crate::wrapper::{query_parts, ItemTypeLookup, Lister, TerraformMapping, Wrapper};

const ITEM_TYPE: &str = types::RESOURCE_MANAGER_PROJECT;

const HEALTH: &[(&str, Health)] = &[
    ("ACTIVE", Health::Ok),
    ("DELETE_REQUESTED", Health::Pending),
    ("DELETE_IN_PROGRESS", Health::Pending),
];

pub struct Project {
    client: Arc<dyn ResourceClient>,
    binding: ScopeBinding,
}

impl Project {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        binding: ScopeBinding,
        catalog: &Catalog,
    ) -> Result<Self, CatalogError> {
        registered(Self { client, binding }, catalog)
    }
}

/// Map a project record, keyed by project ID
pub fn project_to_item(record: &Value, scope: &str) -> QueryResult<Option<Item>> {
    let Some(project_id) = str_at(record, "/projectId") else {
        return Ok(None);
    };

    let mut item = Item::from_record(ITEM_TYPE, "projectId", project_id, scope, record, "labels");
    item.health = str_at(record, "/lifecycleState").map(|s| Health::from_status(s, HEALTH));
    Ok(Some(item))
}

#[async_trait]
impl Wrapper for Project {
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
        vec![ItemTypeLookup::new("projectId", ITEM_TYPE)]
    }

    fn potential_links(&self) -> BTreeSet<&'static str> {
        BTreeSet::new()
    }

    fn iam_permissions(&self) -> Vec<&'static str> {
        vec!["resourcemanager.projects.get", "resourcemanager.projects.list"]
    }

    fn predefined_role(&self) -> &'static str {
        "roles/browser"
    }

    fn terraform_mappings(&self) -> Vec<TerraformMapping> {
        vec![TerraformMapping {
            method: QueryMethod::Get,
            query_field: "google_project.project_id",
        }]
    }

    async fn get(&self, ctx: &QueryContext, scope: &str, parts: &[String]) -> QueryResult<Item> {
        let [project_id] = query_parts::<1>(parts, scope, ITEM_TYPE)?;
        self.binding.resolve(scope, ITEM_TYPE)?;
        let url = self
            .client
            .endpoints()
            .resourcemanager_url(&format!("projects/{}", project_id));
        let record = fetch_record(ctx, self.client.as_ref(), &url, scope, ITEM_TYPE).await?;
        project_to_item(&record, scope)?.ok_or_else(|| missing_identity(scope, ITEM_TYPE))
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        Some(self as &dyn Lister)
    }
}

#[async_trait]
impl Lister for Project {
    async fn list(&self, ctx: &QueryContext, scope: &str) -> QueryResult<Vec<Item>> {
        self.binding.resolve(scope, ITEM_TYPE)?;
        let url = self.client.endpoints().resourcemanager_url("projects");
        let mut pager = self.client.pager(&url, "projects");
        collect_pages(ctx, pager.as_mut(), scope, ITEM_TYPE, &project_to_item).await
    }
}
