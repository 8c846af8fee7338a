//! Credential discovery for registry hosts.
//!
//! A [`Keychain`] consults its sources in order and the first one that
//! yields a credential for the host wins; no match means anonymous access.

use crate::constants::{DOCKER_HUB_REGISTRY, METADATA_TIMEOUT_MS};
use crate::error::RegistryError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value for an `Authorization: Basic` header
    pub fn basic_header(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A place credentials for a registry host may come from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when this source has nothing for `registry`
    async fn credential(&self, registry: &str) -> Result<Option<Credential>, RegistryError>;
}

#[derive(Clone, Default)]
pub struct Keychain {
    sources: Vec<Arc<dyn CredentialSource>>,
}

impl Keychain {
    /// No sources; every registry is accessed anonymously
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Docker config, cloud helpers and GitHub token, in that order
    pub fn ambient() -> Self {
        Self {
            sources: vec![
                Arc::new(DockerConfigCredentials::from_env()),
                Arc::new(CredentialHelper::ecr()),
                Arc::new(GoogleMetadataCredentials::new()),
                Arc::new(CredentialHelper::acr()),
                Arc::new(GitHubTokenCredentials),
            ],
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Puts a static credential for `registry` ahead of every other source
    pub fn with_static(mut self, registry: &str, credential: Credential) -> Self {
        self.sources.insert(
            0,
            Arc::new(StaticCredentials {
                registry: normalize_host(registry),
                credential,
            }),
        );
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(&self, registry: &str) -> Option<Credential> {
        for source in &self.sources {
            match source.credential(registry).await {
                Ok(Some(credential)) => {
                    tracing::debug!(registry, source = source.name(), "Using registry credential");
                    return Some(credential);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(registry, source = source.name(), error = %e, "Credential source failed");
                }
            }
        }
        tracing::debug!(registry, "No credential found, using anonymous access");
        None
    }
}

impl fmt::Debug for Keychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keychain")
            .field("sources", &self.source_names())
            .finish()
    }
}

/// Strips scheme and path so `https://index.docker.io/v1/` and
/// `index.docker.io` compare equal
pub fn normalize_host(host: &str) -> String {
    let host = host
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or_default().to_ascii_lowercase();
    if host == "docker.io" || host == "registry-1.docker.io" {
        DOCKER_HUB_REGISTRY.to_string()
    } else {
        host
    }
}

pub struct StaticCredentials {
    registry: String,
    credential: Credential,
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    fn name(&self) -> &str {
        "static"
    }

    async fn credential(&self, registry: &str) -> Result<Option<Credential>, RegistryError> {
        Ok((normalize_host(registry) == self.registry).then(|| self.credential.clone()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
    #[serde(default, rename = "credHelpers")]
    cred_helpers: HashMap<String, String>,
    #[serde(default, rename = "credsStore")]
    creds_store: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    identitytoken: Option<String>,
}

/// `~/.docker/config.json`, or `$DOCKER_CONFIG/config.json`
pub struct DockerConfigCredentials {
    path: Option<PathBuf>,
}

impl DockerConfigCredentials {
    pub fn from_env() -> Self {
        let dir = std::env::var_os("DOCKER_CONFIG")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".docker")));
        Self {
            path: dir.map(|d| d.join("config.json")),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    async fn load(&self) -> Result<Option<DockerConfigFile>, RegistryError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| RegistryError::Auth {
                registry: path.display().to_string(),
                reason: format!("parsing docker config: {}", e),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RegistryError::Auth {
                registry: path.display().to_string(),
                reason: format!("reading docker config: {}", e),
            }),
        }
    }
}

#[async_trait]
impl CredentialSource for DockerConfigCredentials {
    fn name(&self) -> &str {
        "docker-config"
    }

    async fn credential(&self, registry: &str) -> Result<Option<Credential>, RegistryError> {
        let Some(config) = self.load().await? else {
            return Ok(None);
        };
        let host = normalize_host(registry);

        if let Some(helper) = config
            .cred_helpers
            .iter()
            .find(|(k, _)| normalize_host(k) == host)
            .map(|(_, v)| v)
        {
            return run_helper(&format!("docker-credential-{}", helper), registry).await;
        }

        if let Some(entry) = config
            .auths
            .iter()
            .find(|(k, _)| normalize_host(k) == host)
            .map(|(_, v)| v)
        {
            if let Some(credential) = decode_auth_entry(registry, entry)? {
                return Ok(Some(credential));
            }
        }

        match &config.creds_store {
            Some(store) if !store.is_empty() => {
                run_helper(&format!("docker-credential-{}", store), registry).await
            }
            _ => Ok(None),
        }
    }
}

fn decode_auth_entry(registry: &str, entry: &DockerAuthEntry) -> Result<Option<Credential>, RegistryError> {
    if let Some(token) = &entry.identitytoken {
        return Ok(Some(Credential::new("<token>", token.clone())));
    }
    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Ok(Some(Credential::new(username.clone(), password.clone())));
    }
    let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) else {
        return Ok(None);
    };
    let decoded = STANDARD.decode(auth).map_err(|e| RegistryError::Auth {
        registry: registry.to_string(),
        reason: format!("invalid base64 auth in docker config: {}", e),
    })?;
    let decoded = String::from_utf8_lossy(&decoded);
    match decoded.split_once(':') {
        Some((user, pass)) => Ok(Some(Credential::new(user, pass))),
        None => Err(RegistryError::Auth {
            registry: registry.to_string(),
            reason: "docker config auth is not user:password".to_string(),
        }),
    }
}

#[derive(Debug, Deserialize)]
struct HelperOutput {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Secret")]
    secret: String,
}

/// Runs `<program> get` with the server URL on stdin (docker credential
/// helper protocol). A missing helper binary yields `None`.
pub async fn run_helper(program: &str, registry: &str) -> Result<Option<Credential>, RegistryError> {
    let spawned = tokio::process::Command::new(program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RegistryError::Auth {
                registry: registry.to_string(),
                reason: format!("running {}: {}", program, e),
            })
        }
    };
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(registry.as_bytes())
            .await
            .map_err(|e| RegistryError::Auth {
                registry: registry.to_string(),
                reason: format!("writing to {}: {}", program, e),
            })?;
    }
    let output = child.wait_with_output().await.map_err(|e| RegistryError::Auth {
        registry: registry.to_string(),
        reason: format!("waiting for {}: {}", program, e),
    })?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("credentials not found") {
            return Ok(None);
        }
        return Err(RegistryError::Auth {
            registry: registry.to_string(),
            reason: format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    let parsed: HelperOutput = serde_json::from_slice(&output.stdout).map_err(|e| RegistryError::Auth {
        registry: registry.to_string(),
        reason: format!("parsing {} output: {}", program, e),
    })?;
    Ok(Some(Credential::new(parsed.username, parsed.secret)))
}

/// A docker credential helper consulted only for hosts matching a pattern
pub struct CredentialHelper {
    name: String,
    program: String,
    hosts: Regex,
}

impl CredentialHelper {
    pub fn new(name: &str, program: &str, hosts: Regex) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            hosts,
        }
    }

    pub fn ecr() -> Self {
        Self::new(
            "ecr",
            "docker-credential-ecr-login",
            Regex::new(r"^\d{12}\.dkr\.ecr(-fips)?\.[a-z0-9-]+\.amazonaws\.com(\.cn)?$").expect("static regex"),
        )
    }

    pub fn acr() -> Self {
        Self::new(
            "acr",
            "docker-credential-acr-env",
            Regex::new(r"^[a-z0-9-]+\.azurecr\.io$").expect("static regex"),
        )
    }

    pub fn applies_to(&self, registry: &str) -> bool {
        self.hosts.is_match(&normalize_host(registry))
    }
}

#[async_trait]
impl CredentialSource for CredentialHelper {
    fn name(&self) -> &str {
        &self.name
    }

    async fn credential(&self, registry: &str) -> Result<Option<Credential>, RegistryError> {
        if !self.applies_to(registry) {
            return Ok(None);
        }
        run_helper(&self.program, registry).await
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// Access token of the default service account from the GCE metadata server
pub struct GoogleMetadataCredentials {
    endpoint: String,
    timeout: Duration,
}

impl GoogleMetadataCredentials {
    pub fn new() -> Self {
        Self {
            endpoint: "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token"
                .to_string(),
            timeout: Duration::from_millis(METADATA_TIMEOUT_MS),
        }
    }

    pub fn applies_to(registry: &str) -> bool {
        let host = normalize_host(registry);
        host == "gcr.io" || host.ends_with(".gcr.io") || host.ends_with("-docker.pkg.dev")
    }
}

impl Default for GoogleMetadataCredentials {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialSource for GoogleMetadataCredentials {
    fn name(&self) -> &str {
        "google"
    }

    async fn credential(&self, registry: &str) -> Result<Option<Credential>, RegistryError> {
        if !Self::applies_to(registry) {
            return Ok(None);
        }
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        let response = match client
            .get(&self.endpoint)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(status = r.status().as_u16(), "Metadata server refused token request");
                return Ok(None);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Metadata server unavailable");
                return Ok(None);
            }
        };
        let token: MetadataToken = response.json().await.map_err(|e| RegistryError::Auth {
            registry: registry.to_string(),
            reason: format!("decoding metadata token: {}", e),
        })?;
        Ok(Some(Credential::new("oauth2accesstoken", token.access_token)))
    }
}

/// `GITHUB_TOKEN` for ghcr.io, as set in GitHub Actions
pub struct GitHubTokenCredentials;

#[async_trait]
impl CredentialSource for GitHubTokenCredentials {
    fn name(&self) -> &str {
        "github"
    }

    async fn credential(&self, registry: &str) -> Result<Option<Credential>, RegistryError> {
        if normalize_host(registry) != "ghcr.io" {
            return Ok(None);
        }
        let Ok(token) = std::env::var("GITHUB_TOKEN") else {
            return Ok(None);
        };
        if token.is_empty() {
            return Ok(None);
        }
        let actor = std::env::var("GITHUB_ACTOR").unwrap_or_else(|_| "unset".to_string());
        Ok(Some(Credential::new(actor, token)))
    }
}
