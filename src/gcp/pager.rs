//! REST pagination
//!
//! GCP list endpoints return `nextPageToken` while more results remain; the
//! token is passed back as the `pageToken` query parameter.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::client::GcpClient;
use crate::pager::{Page, Pager};

/// Pager over a GCP list endpoint
pub struct RestPager {
    client: GcpClient,
    url: String,
    items_field: String,
    next_token: Option<String>,
    started: bool,
}

impl RestPager {
    pub fn new(client: GcpClient, url: &str, items_field: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
            items_field: items_field.to_string(),
            next_token: None,
            started: false,
        }
    }
}

#[async_trait]
impl Pager for RestPager {
    fn more(&self) -> bool {
        !self.started || self.next_token.is_some()
    }

    async fn next_page(&mut self) -> Result<Page> {
        let url = page_url(&self.url, self.next_token.as_deref());
        let response = self.client.get_json(&url).await?;
        self.started = true;

        self.next_token = response
            .get("nextPageToken")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Ok(extract_items(&response, &self.items_field))
    }
}

/// Append the page token to a list URL
pub fn page_url(url: &str, page_token: Option<&str>) -> String {
    let Some(token) = page_token else {
        return url.to_string();
    };
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}pageToken={}", url, separator, urlencoding::encode(token))
}

/// Extract items from a response using a dot-notation path.
/// An absent field means an empty page, which GCP returns for empty lists.
pub fn extract_items(response: &Value, path: &str) -> Page {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }

    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return Vec::new(),
        };
    }

    current.as_array().cloned().unwrap_or_default()
}
