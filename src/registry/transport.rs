use crate::constants::USER_AGENT;
use crate::error::RegistryError;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use std::time::Instant;
use tracing::Level;

/// A fully buffered registry response
#[derive(Debug, Clone)]
pub struct RegistryResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RegistryResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport that logs every exchange with the registry
#[derive(Debug, Clone)]
pub struct LoggingTransport {
    client: reqwest::Client,
}

impl LoggingTransport {
    pub fn new() -> Result<Self, RegistryError> {
        Self::with_user_agent(USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn execute(&self, request: reqwest::Request) -> Result<RegistryResponse, RegistryError> {
        let method = request.method().to_string();
        let url = request.url().clone();
        let start = Instant::now();

        if tracing::enabled!(Level::TRACE) {
            let content_type = request
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let body = request
                .body()
                .and_then(|b| b.as_bytes())
                .filter(|_| should_log_body(content_type))
                .map(|b| String::from_utf8_lossy(b).to_string());
            tracing::trace!(method = %method, url = %url, body = ?body, "Registry request");
        }

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| RegistryError::Transport(format!("{} {}: {}", method, url, e)))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::Transport(format!("{} {}: {}", method, url, e)))?
            .to_vec();
        let duration_ms = start.elapsed().as_millis() as u64;

        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        if tracing::enabled!(Level::TRACE) {
            let logged = should_log_body(content_type).then(|| String::from_utf8_lossy(&body).to_string());
            tracing::trace!(
                method = %method,
                url = %url,
                status,
                duration_ms,
                body = ?logged,
                "Registry response"
            );
        }

        if status >= 400 {
            log_error_details(&method, url.path(), status, content_type, &body);
        }

        Ok(RegistryResponse {
            status,
            headers,
            body,
        })
    }
}

/// Responses that are a normal part of the distribution protocol: the
/// anonymous ping challenge and existence probes that miss
pub fn is_expected_protocol_response(method: &str, path: &str, status: u16) -> bool {
    (status == 401 && path.ends_with("/v2/")) || (status == 404 && method.eq_ignore_ascii_case("HEAD"))
}

/// Only structured, human-readable bodies are worth logging
pub fn should_log_body(content_type: Option<&str>) -> bool {
    match content_type {
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("json") || ct.contains("vnd.oci") || ct.contains("vnd.docker")
        }
        None => false,
    }
}

fn log_error_details(method: &str, path: &str, status: u16, content_type: Option<&str>, body: &[u8]) {
    let body = should_log_body(content_type).then(|| String::from_utf8_lossy(body).to_string());
    if is_expected_protocol_response(method, path, status) {
        tracing::debug!(method, path, status, "Expected registry response");
    } else {
        tracing::error!(method, path, status, body = ?body, "Registry request failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_protocol_responses() {
        assert!(is_expected_protocol_response("GET", "/v2/", 401));
        assert!(is_expected_protocol_response("HEAD", "/v2/app/blobs/sha256:abc", 404));
        assert!(!is_expected_protocol_response("GET", "/v2/app/manifests/latest", 404));
        assert!(!is_expected_protocol_response("PUT", "/v2/app/manifests/latest", 401));
        assert!(!is_expected_protocol_response("HEAD", "/v2/app/blobs/sha256:abc", 500));
    }

    #[test]
    fn test_body_logging_by_content_type() {
        assert!(should_log_body(Some("application/json")));
        assert!(should_log_body(Some("application/vnd.oci.image.manifest.v1+json")));
        assert!(should_log_body(Some("application/vnd.docker.distribution.manifest.v2+json")));
        assert!(!should_log_body(Some("application/octet-stream")));
        assert!(!should_log_body(Some("text/html")));
        assert!(!should_log_body(None));
    }
}
