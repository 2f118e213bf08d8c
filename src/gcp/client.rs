//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication
//! and HTTP functionality. Wrappers talk to it through [`ResourceClient`]
//! so tests can substitute a fake backend.

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use super::pager::RestPager;
use crate::pager::Pager;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Root URLs of the GCP APIs in use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub compute: String,
    pub container: String,
    pub resource_manager: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: "https://compute.googleapis.com/compute/v1".to_string(),
            container: "https://container.googleapis.com/v1".to_string(),
            resource_manager: "https://cloudresourcemanager.googleapis.com/v1".to_string(),
        }
    }
}

impl Endpoints {
    /// Every API under one base URL (emulators, mock servers)
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            compute: format!("{}/compute/v1", base),
            container: format!("{}/container/v1", base),
            resource_manager: format!("{}/cloudresourcemanager/v1", base),
        }
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    /// Build zonal Compute Engine API URL
    pub fn compute_zonal_url(&self, project: &str, zone: &str, resource: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/{}",
            self.compute, project, zone, resource
        )
    }

    // =========================================================================
    // GKE API helpers
    // =========================================================================

    /// Build GKE location URL (region or zone)
    pub fn container_location_url(&self, project: &str, location: &str, resource: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/{}",
            self.container, project, location, resource
        )
    }

    // =========================================================================
    // Resource Manager API helpers
    // =========================================================================

    /// Build Resource Manager API URL
    pub fn resourcemanager_url(&self, path: &str) -> String {
        format!("{}/{}", self.resource_manager, path)
    }
}

/// Backend used by wrappers: point lookups and paginated listings
#[async_trait]
pub trait ResourceClient: Send + Sync {
    fn endpoints(&self) -> &Endpoints;

    /// Fetch one record
    async fn get(&self, url: &str) -> Result<Value>;

    /// Pager over a listing whose records live under `items_field`
    fn pager(&self, url: &str, items_field: &str) -> Box<dyn Pager>;
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub endpoints: Endpoints,
}

impl GcpClient {
    /// Create a new GCP client using Application Default Credentials
    pub async fn new(endpoints: Endpoints) -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;

        Self::with_credentials(credentials, endpoints)
    }

    pub fn with_credentials(credentials: GcpCredentials, endpoints: Endpoints) -> Result<Self> {
        let http = GcpHttpClient::new()?;
        Ok(Self {
            credentials,
            http,
            endpoints,
        })
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Make a GET request to a GCP API
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.get(url, &token).await
    }
}

#[async_trait]
impl ResourceClient for GcpClient {
    fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn get(&self, url: &str) -> Result<Value> {
        self.get_json(url).await
    }

    fn pager(&self, url: &str, items_field: &str) -> Box<dyn Pager> {
        Box::new(RestPager::new(self.clone(), url, items_field))
    }
}
