use crate::error::{RegistryError, Result};
use crate::oci::digest::digest_of;
use crate::oci::{self, ImageReference, Repository};
use crate::registry::auth::Keychain;
use crate::registry::transport::{LoggingTransport, RegistryResponse};
use crate::registry::{Blob, BlobContent, ManifestPayload, Registry, RemoteManifest};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Challenge {
    Anonymous,
    Basic,
    Bearer { realm: String, service: Option<String> },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Distribution-API client with per-registry challenge and per-scope token caches
pub struct HttpRegistry {
    transport: LoggingTransport,
    keychain: Keychain,
    challenges: RwLock<HashMap<String, Challenge>>,
    tokens: RwLock<HashMap<(String, String), String>>,
}

impl HttpRegistry {
    pub fn new(keychain: Keychain) -> Result<Self> {
        Ok(Self::with_transport(LoggingTransport::new()?, keychain))
    }

    pub fn with_transport(transport: LoggingTransport, keychain: Keychain) -> Self {
        Self {
            transport,
            keychain,
            challenges: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    async fn challenge(&self, repository: &Repository) -> Result<Challenge> {
        if let Some(challenge) = self.challenges.read().get(&repository.registry) {
            return Ok(challenge.clone());
        }
        let url = format!("{}/", repository.api_base());
        let request = self
            .transport
            .client()
            .get(&url)
            .build()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        let response = self.transport.execute(request).await?;
        let challenge = match response.status {
            200..=299 => Challenge::Anonymous,
            401 => parse_challenge(response.header(WWW_AUTHENTICATE.as_str()).unwrap_or_default()),
            _ => return Err(RegistryError::from_response("GET", &url, response.status, &response.body).into()),
        };
        self.challenges
            .write()
            .insert(repository.registry.clone(), challenge.clone());
        Ok(challenge)
    }

    async fn authorization(&self, repository: &Repository, push: bool) -> Result<Option<String>> {
        match self.challenge(repository).await? {
            Challenge::Anonymous => Ok(None),
            Challenge::Basic => Ok(self
                .keychain
                .resolve(&repository.registry)
                .await
                .map(|c| c.basic_header())),
            Challenge::Bearer { realm, service } => {
                let scope = scope_for(repository, push);
                let key = (repository.registry.clone(), scope.clone());
                if let Some(token) = self.tokens.read().get(&key) {
                    return Ok(Some(format!("Bearer {}", token)));
                }
                let token = self
                    .fetch_token(repository, &realm, service.as_deref(), &scope)
                    .await?;
                self.tokens.write().insert(key, token.clone());
                Ok(Some(format!("Bearer {}", token)))
            }
        }
    }

    async fn fetch_token(
        &self,
        repository: &Repository,
        realm: &str,
        service: Option<&str>,
        scope: &str,
    ) -> Result<String> {
        let mut query = vec![("scope", scope)];
        if let Some(service) = service {
            query.push(("service", service));
        }
        let mut builder = self.transport.client().get(realm).query(&query);
        if let Some(credential) = self.keychain.resolve(&repository.registry).await {
            builder = builder.header(AUTHORIZATION, credential.basic_header());
        }
        let request = builder
            .build()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(RegistryError::Auth {
                registry: repository.registry.clone(),
                reason: format!("token endpoint {} returned {}", realm, response.status),
            }
            .into());
        }
        let parsed: TokenResponse = serde_json::from_slice(&response.body).map_err(|e| RegistryError::Protocol {
            url: realm.to_string(),
            reason: format!("decoding token response: {}", e),
        })?;
        parsed
            .token
            .or(parsed.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                RegistryError::Auth {
                    registry: repository.registry.clone(),
                    reason: "token endpoint returned no token".to_string(),
                }
                .into()
            })
    }

    fn forget_auth(&self, repository: &Repository) {
        self.tokens.write().retain(|(registry, _), _| registry != &repository.registry);
        self.challenges.write().remove(&repository.registry);
    }

    /// Sends an authorized request, refreshing credentials once on 401
    async fn send(
        &self,
        repository: &Repository,
        push: bool,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        body: Option<&[u8]>,
    ) -> Result<RegistryResponse> {
        let mut refreshed = false;
        loop {
            let mut builder = self.transport.client().request(method.clone(), url);
            for (name, value) in headers {
                builder = builder.header(*name, value);
            }
            if let Some(auth) = self.authorization(repository, push).await? {
                builder = builder.header(AUTHORIZATION, auth);
            }
            if let Some(body) = body {
                builder = builder.body(body.to_vec());
            }
            let request = builder
                .build()
                .map_err(|e| RegistryError::Transport(e.to_string()))?;
            let response = self.transport.execute(request).await?;
            if response.status == 401 && !refreshed {
                refreshed = true;
                self.forget_auth(repository);
                continue;
            }
            return Ok(response);
        }
    }

    fn resolve_location(repository: &Repository, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            return location.to_string();
        }
        let base = repository.api_base();
        let origin = base.trim_end_matches("/v2");
        format!("{}{}", origin, location)
    }

    async fn start_upload(&self, repository: &Repository, query: &str) -> Result<RegistryResponse> {
        let url = format!("{}/{}/blobs/uploads/{}", repository.api_base(), repository.path, query);
        let response = self.send(repository, true, Method::POST, &url, &[], None).await?;
        if response.status != 201 && response.status != 202 {
            return Err(RegistryError::from_response("POST", &url, response.status, &response.body).into());
        }
        Ok(response)
    }

    async fn complete_upload(&self, repository: &Repository, start: &RegistryResponse, digest: &str, data: &[u8]) -> Result<()> {
        let location = start.header(LOCATION.as_str()).ok_or_else(|| RegistryError::Protocol {
            url: format!("{}/{}/blobs/uploads/", repository.api_base(), repository.path),
            reason: "upload response has no Location header".to_string(),
        })?;
        let location = Self::resolve_location(repository, location);
        let separator = if location.contains('?') { '&' } else { '?' };
        let url = format!("{}{}digest={}", location, separator, digest);
        let headers = [(CONTENT_TYPE.as_str(), "application/octet-stream".to_string())];
        let response = self
            .send(repository, true, Method::PUT, &url, &headers, Some(data))
            .await?;
        if response.status != 201 {
            return Err(RegistryError::from_response("PUT", &url, response.status, &response.body).into());
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn get_manifest(&self, reference: &ImageReference) -> Result<RemoteManifest> {
        let repository = &reference.repository;
        let url = format!(
            "{}/{}/manifests/{}",
            repository.api_base(),
            repository.path,
            reference.identifier()
        );
        let headers = [(ACCEPT.as_str(), oci::MANIFEST_ACCEPT.join(", "))];
        let start = Instant::now();
        let response = self
            .send(repository, false, Method::GET, &url, &headers, None)
            .await?;
        if !response.is_success() {
            return Err(RegistryError::from_response("GET", &url, response.status, &response.body).into());
        }
        crate::log_registry_operation!("get_manifest", reference, start.elapsed().as_millis() as u64);

        let media_type = match response.header(CONTENT_TYPE.as_str()) {
            Some(ct) if !ct.is_empty() => ct.split(';').next().unwrap_or(ct).trim().to_string(),
            _ => media_type_from_body(&response.body),
        };
        Ok(RemoteManifest {
            media_type,
            digest: digest_of(&response.body),
            bytes: response.body,
        })
    }

    async fn get_blob(&self, repository: &Repository, digest: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}/blobs/{}", repository.api_base(), repository.path, digest);
        let response = self.send(repository, false, Method::GET, &url, &[], None).await?;
        if !response.is_success() {
            return Err(RegistryError::from_response("GET", &url, response.status, &response.body).into());
        }
        Ok(response.body)
    }

    async fn blob_exists(&self, repository: &Repository, digest: &str) -> Result<bool> {
        let url = format!("{}/{}/blobs/{}", repository.api_base(), repository.path, digest);
        let response = self.send(repository, true, Method::HEAD, &url, &[], None).await?;
        match response.status {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => Err(RegistryError::from_response("HEAD", &url, status, &response.body).into()),
        }
    }

    async fn upload_blob(&self, repository: &Repository, blob: &Blob) -> Result<()> {
        let start = Instant::now();
        match &blob.content {
            BlobContent::Inline(data) => {
                let upload = self.start_upload(repository, "").await?;
                self.complete_upload(repository, &upload, &blob.digest, data).await?;
            }
            BlobContent::Remote(source) if source.registry == repository.registry => {
                let query = format!("?mount={}&from={}", blob.digest, source.path);
                let upload = self.start_upload(repository, &query).await?;
                if upload.status != 201 {
                    tracing::debug!(digest = %blob.digest, from = %source, "Cross-repository mount declined, copying");
                    let data = self.get_blob(source, &blob.digest).await?;
                    self.complete_upload(repository, &upload, &blob.digest, &data).await?;
                }
            }
            BlobContent::Remote(source) => {
                let data = self.get_blob(source, &blob.digest).await?;
                let upload = self.start_upload(repository, "").await?;
                self.complete_upload(repository, &upload, &blob.digest, &data).await?;
            }
        }
        crate::log_registry_operation!("upload_blob", blob.digest, start.elapsed().as_millis() as u64);
        Ok(())
    }

    async fn put_manifest(
        &self,
        repository: &Repository,
        reference: &str,
        manifest: &ManifestPayload,
    ) -> Result<String> {
        let url = format!("{}/{}/manifests/{}", repository.api_base(), repository.path, reference);
        let headers = [(CONTENT_TYPE.as_str(), manifest.media_type.clone())];
        let start = Instant::now();
        let response = self
            .send(repository, true, Method::PUT, &url, &headers, Some(&manifest.bytes))
            .await?;
        if !response.is_success() {
            return Err(RegistryError::from_response("PUT", &url, response.status, &response.body).into());
        }
        crate::log_registry_operation!(
            "put_manifest",
            format!("{}:{}", repository, reference),
            start.elapsed().as_millis() as u64
        );
        Ok(manifest.digest())
    }
}

fn scope_for(repository: &Repository, push: bool) -> String {
    let actions = if push { "pull,push" } else { "pull" };
    format!("repository:{}:{}", repository.path, actions)
}

fn media_type_from_body(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("mediaType").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_default()
}

/// Parses a `WWW-Authenticate` header value
fn parse_challenge(header: &str) -> Challenge {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
    if scheme.eq_ignore_ascii_case("basic") {
        return Challenge::Basic;
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Challenge::Anonymous;
    }
    let mut realm = None;
    let mut service = None;
    for param in split_params(params) {
        if let Some((key, value)) = param.split_once('=') {
            let value = value.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                _ => {}
            }
        }
    }
    match realm {
        Some(realm) => Challenge::Bearer { realm, service },
        None => Challenge::Anonymous,
    }
}

/// Splits on commas that are not inside quotes
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(params[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let c = parse_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull,push""#,
        );
        assert_eq!(
            c,
            Challenge::Bearer {
                realm: "https://auth.docker.io/token".to_string(),
                service: Some("registry.docker.io".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_basic_and_unknown_challenges() {
        assert_eq!(parse_challenge(r#"Basic realm="Registry""#), Challenge::Basic);
        assert_eq!(parse_challenge(""), Challenge::Anonymous);
        assert_eq!(parse_challenge("Bearer"), Challenge::Anonymous);
    }

    #[test]
    fn test_scope_and_location() {
        let repo = Repository::parse("registry.example.com/team/app").unwrap();
        assert_eq!(scope_for(&repo, true), "repository:team/app:pull,push");
        assert_eq!(scope_for(&repo, false), "repository:team/app:pull");
        assert_eq!(
            HttpRegistry::resolve_location(&repo, "/v2/team/app/blobs/uploads/abc?_state=x"),
            "https://registry.example.com/v2/team/app/blobs/uploads/abc?_state=x"
        );
        assert_eq!(
            HttpRegistry::resolve_location(&repo, "https://upload.example.com/u/1"),
            "https://upload.example.com/u/1"
        );
    }

    #[test]
    fn test_media_type_from_body() {
        assert_eq!(
            media_type_from_body(br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json"}"#),
            "application/vnd.oci.image.index.v1+json"
        );
        assert_eq!(media_type_from_body(b"not json"), "");
    }
}
