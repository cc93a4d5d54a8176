//! Shared REST plumbing for the provider adapters
//!
//! Maps HTTP failures onto `ProviderError` so the sync engine can decide
//! between retrying, reusing, recreating or giving up on a subtree.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::types::error::{ProviderError, TaxonomyError};

/// Bearer-authenticated JSON client
pub(crate) struct ApiClient {
    pub http: reqwest::Client,
    token: String,
}

impl ApiClient {
    pub fn new(access_token: &str) -> Result<Self, TaxonomyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("mailbox-taxonomy/0.1")
            .build()
            .map_err(|e| TaxonomyError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token: access_token.trim().to_string(),
        })
    }

    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }

    /// Send a request and decode a JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = self.authorize(request).send().await.map_err(from_reqwest)?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Other(format!("Malformed provider response: {}", e)))
    }

    /// Send a request whose body is ignored
    pub async fn send_empty(&self, request: RequestBuilder) -> Result<(), ProviderError> {
        let response = self.authorize(request).send().await.map_err(from_reqwest)?;
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, retry_after, &body))
    }
}

pub(crate) fn from_reqwest(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(err.to_string())
    } else if let Some(status) = err.status() {
        classify_status(status, None, &err.to_string())
    } else {
        ProviderError::Other(err.to_string())
    }
}

/// Retry-After in seconds; HTTP-date values are ignored
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map an error status and body to the provider error taxonomy
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> ProviderError {
    debug!("Provider responded {}: {}", status, body);
    let message = summarize(status, body);
    let retry_after_ms = retry_after.map(|d| d.as_millis() as u64);

    match status {
        StatusCode::UNAUTHORIZED => ProviderError::AuthExpired(message),
        // Gmail reports quota exhaustion as 403 with a rate limit reason
        StatusCode::FORBIDDEN if is_rate_limit_body(body) => {
            ProviderError::RateLimited(retry_after_ms)
        }
        StatusCode::FORBIDDEN => ProviderError::PermissionDenied(message),
        StatusCode::NOT_FOUND => ProviderError::NotFound(message),
        StatusCode::CONFLICT => ProviderError::Conflict(message),
        // Graph reports duplicate folder names as 400 ErrorFolderExists on some tenants
        StatusCode::BAD_REQUEST if body.contains("ErrorFolderExists") => {
            ProviderError::Conflict(message)
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(retry_after_ms),
        StatusCode::REQUEST_TIMEOUT => ProviderError::Transient(message),
        s if s.is_server_error() => ProviderError::Transient(message),
        _ => ProviderError::Other(message),
    }
}

fn is_rate_limit_body(body: &str) -> bool {
    body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded")
}

fn summarize(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status.to_string();
    }

    let snippet: String = body.chars().take(200).collect();
    format!("{}: {}", status, snippet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_auth_and_permission_statuses() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, ""),
            ProviderError::AuthExpired(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None, r#"{"error":"insufficientPermissions"}"#),
            ProviderError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_rate_limit_statuses() {
        assert_eq!(
            classify_status(
                StatusCode::TOO_MANY_REQUESTS,
                Some(Duration::from_secs(3)),
                ""
            ),
            ProviderError::RateLimited(Some(3000))
        );
        assert_eq!(
            classify_status(
                StatusCode::FORBIDDEN,
                None,
                r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}]}}"#
            ),
            ProviderError::RateLimited(None)
        );
    }

    #[test]
    fn test_conflict_and_not_found() {
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, None, "Label name exists or conflicts"),
            ProviderError::Conflict(_)
        ));
        assert!(matches!(
            classify_status(
                StatusCode::BAD_REQUEST,
                None,
                r#"{"error":{"code":"ErrorFolderExists"}}"#
            ),
            ProviderError::Conflict(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None, ""),
            ProviderError::NotFound(_)
        ));
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, None, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, None, "Invalid label").is_transient());
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }
}
