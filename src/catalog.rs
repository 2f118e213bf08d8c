//! Type Catalog - Item type definitions
//!
//! The catalog is built once at startup from embedded JSON and handed to
//! every wrapper that needs to resolve a type name. Nothing here is global.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Embedded catalog file (compiled into the binary)
const CATALOG_JSON: &str = include_str!("resources/catalog.json");

/// Names of the item types this crate knows about
pub mod types {
    pub const RESOURCE_MANAGER_PROJECT: &str = "gcp-cloud-resource-manager-project";
    pub const COMPUTE_INSTANCE: &str = "gcp-compute-instance";
    pub const COMPUTE_DISK: &str = "gcp-compute-disk";
    pub const COMPUTE_SNAPSHOT: &str = "gcp-compute-snapshot";
    pub const COMPUTE_IMAGE: &str = "gcp-compute-image";
    pub const COMPUTE_NETWORK: &str = "gcp-compute-network";
    pub const COMPUTE_SUBNETWORK: &str = "gcp-compute-subnetwork";
    pub const COMPUTE_INSTANCE_GROUP_MANAGER: &str = "gcp-compute-instance-group-manager";
    pub const CONTAINER_CLUSTER: &str = "gcp-container-cluster";
    pub const CONTAINER_NODE_POOL: &str = "gcp-container-node-pool";
    pub const CLOUD_KMS_CRYPTO_KEY: &str = "gcp-cloud-kms-crypto-key";
    pub const IAM_SERVICE_ACCOUNT: &str = "gcp-iam-service-account";
    pub const IP: &str = "ip";
    pub const DNS: &str = "dns";
    pub const HTTP: &str = "http";
}

/// How a type's scopes are shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Global,
    Project,
    Regional,
    Zonal,
}

/// Item type definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ItemTypeDef {
    #[serde(skip)]
    pub name: String,
    pub display_name: String,
    pub service: String,
    pub category: String,
    pub scope_kind: ScopeKind,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    types: BTreeMap<String, ItemTypeDef>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown item type: {0}")]
    UnknownType(String),

    #[error("{item_type} declares links to unregistered types: {missing:?}")]
    UnregisteredLinks {
        item_type: String,
        missing: Vec<String>,
    },
}

/// Registry of item types
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    types: BTreeMap<String, ItemTypeDef>,
}

impl Catalog {
    /// Catalog of every type this crate ships with
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(CATALOG_JSON)
    }

    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(content)?;
        let types = file
            .types
            .into_iter()
            .map(|(name, mut def)| {
                def.name = name.clone();
                (name, def)
            })
            .collect();
        Ok(Self { types })
    }

    pub fn get(&self, name: &str) -> Option<&ItemTypeDef> {
        self.types.get(name)
    }

    /// Resolve a type name that must exist
    pub fn require(&self, name: &str) -> Result<&ItemTypeDef, CatalogError> {
        self.get(name)
            .ok_or_else(|| CatalogError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemTypeDef> {
        self.types.values()
    }

    /// Check that every declared link target of a type is registered
    pub fn check_links(
        &self,
        item_type: &str,
        potential_links: &BTreeSet<String>,
    ) -> Result<(), CatalogError> {
        self.require(item_type)?;
        let missing: Vec<String> = potential_links
            .iter()
            .filter(|t| !self.contains(t))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::UnregisteredLinks {
                item_type: item_type.to_string(),
                missing,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.iter().next().is_some());
    }

    #[test]
    fn test_every_type_constant_is_registered() {
        let catalog = Catalog::builtin().unwrap();
        for name in [
            types::RESOURCE_MANAGER_PROJECT,
            types::COMPUTE_INSTANCE,
            types::COMPUTE_DISK,
            types::COMPUTE_SNAPSHOT,
            types::COMPUTE_IMAGE,
            types::COMPUTE_NETWORK,
            types::COMPUTE_SUBNETWORK,
            types::COMPUTE_INSTANCE_GROUP_MANAGER,
            types::CONTAINER_CLUSTER,
            types::CONTAINER_NODE_POOL,
            types::CLOUD_KMS_CRYPTO_KEY,
            types::IAM_SERVICE_ACCOUNT,
            types::IP,
            types::DNS,
            types::HTTP,
        ] {
            let def = catalog.require(name).unwrap();
            assert_eq!(def.name, name);
        }
    }

    #[test]
    fn test_compute_disk_definition() {
        let catalog = Catalog::builtin().unwrap();
        let disk = catalog.require(types::COMPUTE_DISK).unwrap();
        assert_eq!(disk.display_name, "Persistent Disks");
        assert_eq!(disk.service, "compute");
        assert_eq!(disk.scope_kind, ScopeKind::Zonal);
    }

    #[test]
    fn test_check_links_reports_missing() {
        let catalog = Catalog::builtin().unwrap();
        let links: BTreeSet<String> = ["ip".to_string(), "gcp-made-up".to_string()].into();
        match catalog.check_links(types::COMPUTE_INSTANCE, &links) {
            Err(CatalogError::UnregisteredLinks { missing, .. }) => {
                assert_eq!(missing, vec!["gcp-made-up"]);
            },
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type() {
        let catalog = Catalog::builtin().unwrap();
        assert!(matches!(
            catalog.require("nope"),
            Err(CatalogError::UnknownType(_))
        ));
    }
}
