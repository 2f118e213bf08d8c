//! Edge construction helpers
//!
//! GCP records refer to each other through self links
//! (`https://compute.googleapis.com/compute/v1/projects/p/zones/z/disks/d`),
//! relative resource names (`projects/p/locations/l/keyRings/r/cryptoKeys/k`)
//! or plain names. When a reference carries its own project and location the
//! edge is scoped there, which may differ from the scope of the item holding
//! it. When it does not, the holder's scope is used as a best-effort guess.

use std::net::IpAddr;

use crate::catalog::types;
use crate::composite_key;
use crate::item::{BlastPropagation, LinkedItemQuery};
use crate::scope::{Location, GLOBAL_SCOPE};

/// A parsed resource name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    pub project_id: String,
    pub location: Option<String>,
    /// Collection/name pairs after the project and location, in order
    pub segments: Vec<(String, String)>,
}

impl ResourcePath {
    /// Parse anything containing `projects/<id>/...`
    pub fn parse(reference: &str) -> Option<Self> {
        let parts: Vec<&str> = reference.split('/').filter(|s| !s.is_empty()).collect();
        let start = parts.iter().position(|p| *p == "projects")?;
        let mut rest = parts[start + 1..].iter().copied();

        let project_id = rest.next()?.to_string();
        let mut location = None;
        let mut segments = Vec::new();

        while let Some(collection) = rest.next() {
            if collection == "global" {
                continue;
            }
            let name = rest.next()?;
            match collection {
                "zones" | "regions" | "locations" if location.is_none() && segments.is_empty() => {
                    location = Some(name.to_string());
                },
                _ => segments.push((collection.to_string(), name.to_string())),
            }
        }

        Some(Self {
            project_id,
            location,
            segments,
        })
    }

    pub fn scope(&self) -> String {
        match &self.location {
            Some(location) => Location::zonal(&self.project_id, location).scope(),
            None => Location::project(&self.project_id).scope(),
        }
    }

    /// Name following a collection, e.g. `disks` -> `disk-1`
    pub fn name_of(&self, collection: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(c, _)| c == collection)
            .map(|(_, n)| n.as_str())
    }
}

/// Last path segment of a reference
pub fn short_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// Edge to a resource referenced by self link or bare name
pub fn link_by_reference(
    reference: &str,
    collection: &str,
    item_type: &str,
    fallback_scope: &str,
    blast: BlastPropagation,
) -> Option<LinkedItemQuery> {
    if reference.is_empty() {
        return None;
    }

    if let Some(path) = ResourcePath::parse(reference) {
        let name = path.name_of(collection)?;
        return Some(LinkedItemQuery::get(item_type, name, &path.scope(), blast));
    }

    if reference.contains('/') {
        // Partial path without a project, e.g. "zones/z/disks/d"
        return Some(LinkedItemQuery::get(
            item_type,
            short_name(reference),
            fallback_scope,
            blast,
        ));
    }

    Some(LinkedItemQuery::get(item_type, reference, fallback_scope, blast))
}

/// Edge to a Cloud KMS crypto key. The key name always carries its project
/// and location, so the edge is scoped there.
pub fn crypto_key_link(key_name: &str, blast: BlastPropagation) -> Option<LinkedItemQuery> {
    let path = ResourcePath::parse(key_name)?;
    path.location.as_ref()?;
    let key_ring = path.name_of("keyRings")?;
    let key = path.name_of("cryptoKeys")?;

    Some(LinkedItemQuery::get(
        types::CLOUD_KMS_CRYPTO_KEY,
        &composite_key::encode(&[key_ring, key]),
        &path.scope(),
        blast,
    ))
}

/// Edge to a service account by email. User-managed accounts carry their
/// project in the domain; Google-managed ones do not and fall back.
pub fn service_account_link(email: &str, fallback_scope: &str) -> Option<LinkedItemQuery> {
    if email.is_empty() || email == "default" {
        return None;
    }

    let scope = email
        .split_once('@')
        .and_then(|(_, domain)| domain.strip_suffix(".iam.gserviceaccount.com"))
        .map(|project| Location::project(project).scope())
        .unwrap_or_else(|| fallback_scope.to_string());

    Some(LinkedItemQuery::get(
        types::IAM_SERVICE_ACCOUNT,
        email,
        &scope,
        BlastPropagation::TO_PARENT,
    ))
}

/// Edge to an IP address or DNS name found in configuration
pub fn ip_or_dns_link(value: &str) -> Option<LinkedItemQuery> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(LinkedItemQuery::get(
            types::IP,
            &ip.to_string(),
            GLOBAL_SCOPE,
            BlastPropagation::BOTH,
        ));
    }

    if is_hostname(value) {
        return Some(LinkedItemQuery::search(
            types::DNS,
            &value.to_ascii_lowercase(),
            GLOBAL_SCOPE,
            BlastPropagation::BOTH,
        ));
    }

    None
}

/// Edges to an HTTP endpoint and the host serving it
pub fn http_links(value: &str) -> Vec<LinkedItemQuery> {
    let Ok(parsed) = url::Url::parse(value) else {
        return Vec::new();
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Vec::new();
    }

    let mut links = vec![LinkedItemQuery::search(
        types::HTTP,
        value,
        GLOBAL_SCOPE,
        BlastPropagation::BOTH,
    )];

    let host = match parsed.host() {
        Some(url::Host::Domain(d)) => Some(d.to_string()),
        Some(url::Host::Ipv4(ip)) => Some(ip.to_string()),
        Some(url::Host::Ipv6(ip)) => Some(ip.to_string()),
        None => None,
    };
    if let Some(link) = host.as_deref().and_then(ip_or_dns_link) {
        links.push(link);
    }

    links
}

fn is_hostname(value: &str) -> bool {
    value.contains('.')
        && !value.starts_with('.')
        && !value.ends_with('.')
        && value.len() <= 253
        && value
            .split('.')
            .all(|label| {
                !label.is_empty()
                    && label.len() <= 63
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            })
        && value
            .rsplit('.')
            .next()
            .map(|tld| tld.chars().any(|c| c.is_ascii_alphabetic()))
            .unwrap_or(false)
}
