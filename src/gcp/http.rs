//! HTTP utilities for GCP REST API calls

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A non-success response from a GCP API
#[derive(Debug, Clone, Error)]
#[error("API request failed: {status}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Build from a response body, preferring the API's own `error.message`
    fn from_body(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });
        Self::new(status, sanitize_for_log(&message))
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    /// Short message suitable for showing to a user
    pub fn user_message(&self) -> &'static str {
        match self.status.as_u16() {
            403 => "Permission denied. Check your GCP IAM permissions.",
            401 => "Authentication failed. Run 'gcloud auth application-default login'.",
            404 => "Resource not found.",
            429 => "Rate limit exceeded. Please try again later.",
            400 => "Invalid request. Check your parameters.",
            409 => "Resource conflict.",
            500..=599 => "GCP service temporarily unavailable. Please try again.",
            _ => "Request failed. Check your network connection and try again.",
        }
    }
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("gcpgraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError::from_body(status, &body).into());
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}

/// Format an error chain for display
/// Security: API errors are reduced to a generic message per status code
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    if let Some(api) = error.downcast_ref::<ApiError>() {
        return api.user_message().to_string();
    }

    let error_str = format!("{:#}", error);

    // Truncate long error messages and remove potential sensitive data
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(80)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
    }

    #[test]
    fn test_api_error_prefers_body_message() {
        let err = ApiError::from_body(
            StatusCode::FORBIDDEN,
            r#"{"error": {"code": 403, "message": "Required 'compute.disks.get' permission"}}"#,
        );
        assert_eq!(err.message, "Required 'compute.disks.get' permission");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_api_error_falls_back_to_reason() {
        let err = ApiError::from_body(StatusCode::NOT_FOUND, "<html>nope</html>");
        assert_eq!(err.message, "Not Found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_format_gcp_error_hides_api_details() {
        let err: anyhow::Error = ApiError::new(StatusCode::TOO_MANY_REQUESTS, "quota").into();
        assert_eq!(
            format_gcp_error(&err),
            "Rate limit exceeded. Please try again later."
        );
    }

    #[test]
    fn test_format_gcp_error_truncates_other_errors() {
        let err = anyhow::anyhow!("{}", "y".repeat(200));
        assert!(format_gcp_error(&err).ends_with("..."));
    }
}
