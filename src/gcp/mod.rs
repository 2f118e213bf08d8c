//! GCP API interaction module
//!
//! The upstream side of discovery: authentication, the HTTP client and the
//! REST pager that wrappers enumerate through.
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - Main GCP client and the [`client::ResourceClient`] seam
//! - [`http`] - HTTP utilities for REST API calls
//! - [`pager`] - `nextPageToken` pagination
//!
//! # Example
//!
//! ```ignore
//! use gcpgraph::gcp::client::{Endpoints, GcpClient, ResourceClient};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = GcpClient::new(Endpoints::default()).await?;
//!     let url = client
//!         .endpoints()
//!         .compute_zonal_url("my-project", "us-central1-a", "instances");
//!     let page = client.get(&url).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod pager;
