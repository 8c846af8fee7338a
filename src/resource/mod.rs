//! Create/read/update/delete controllers for the build and resolve
//! resources. The host protocol that drives them lives outside the crate;
//! these functions take plain configuration and return plain state.

pub mod build;
pub mod resolve;

pub use build::{BuildResourceConfig, BuildResourceState};
pub use resolve::{dry_resolve, ResolveResourceConfig, ResolveResourceState};

use crate::base::{BaseImageCache, BaseImageResolver};
use crate::build::{Builder, Compiler, GoCompiler, ImageBuilder};
use crate::error::Result;
use crate::oci::Repository;
use crate::options::{BasicAuth, BuildOptions, PartialOptions, PublishOptions};
use crate::publish::RegistryPublisher;
use crate::registry::transport::LoggingTransport;
use crate::registry::{Credential, HttpRegistry, Keychain, Registry};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Provider-level settings shared by every resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub repo: Option<String>,
    /// Deprecated spelling of `repo`, used only when `repo` is unset
    #[serde(default)]
    pub docker_repo: Option<String>,
    /// `username:password` for the target registry
    #[serde(default)]
    pub basic_auth: Option<String>,
}

impl ProviderConfig {
    pub fn repository(&self) -> Option<&str> {
        self.repo
            .as_deref()
            .filter(|r| !r.is_empty())
            .or_else(|| self.docker_repo.as_deref().filter(|r| !r.is_empty()))
    }

    fn layer(&self) -> Result<PartialOptions> {
        let basic_auth = match self.basic_auth.as_deref() {
            Some(auth) if !auth.is_empty() => Some(BasicAuth::parse(auth)?),
            _ => None,
        };
        Ok(PartialOptions {
            repo: self.repository().map(str::to_string),
            basic_auth,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A message for the host alongside an otherwise successful operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl Diagnostic {
    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
        }
    }
}

/// State produced by a read, plus anything the host should surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadOutcome<S> {
    pub state: S,
    pub diagnostics: Vec<Diagnostic>,
}

impl<S> ReadOutcome<S> {
    pub fn clean(state: S) -> Self {
        Self {
            state,
            diagnostics: Vec::new(),
        }
    }
}

/// Configured provider. Cheap handles to the registry, compiler and base
/// cache are shared by every operation it runs.
pub struct Provider {
    defaults: PartialOptions,
    environment: PartialOptions,
    registry: Option<Arc<dyn Registry>>,
    compiler: Option<Arc<dyn Compiler>>,
    bases: Arc<BaseImageCache>,
    retry: RetryPolicy,
}

impl Provider {
    /// Validates the provider settings and captures the process environment
    pub fn configure(config: &ProviderConfig) -> Result<Self> {
        let defaults = config.layer()?;
        tracing::debug!(
            repo = config.repository().unwrap_or(""),
            basic_auth = defaults.basic_auth.is_some(),
            "Configured provider"
        );
        Ok(Self {
            defaults,
            environment: PartialOptions::from_env(),
            registry: None,
            compiler: None,
            bases: Arc::new(BaseImageCache::new()),
            retry: RetryPolicy::default(),
        })
    }

    /// Replaces the captured environment layer
    pub fn with_environment(mut self, environment: PartialOptions) -> Self {
        self.environment = environment;
        self
    }

    /// Uses `registry` instead of an HTTP client built per operation
    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Uses `compiler` instead of the Go toolchain
    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_cache(&self) -> &Arc<BaseImageCache> {
        &self.bases
    }

    /// Provider, then environment, then resource
    fn merged(&self, resource: PartialOptions) -> PartialOptions {
        PartialOptions::merge(&[self.defaults.clone(), self.environment.clone(), resource])
    }

    fn registry_for(&self, publish: &PublishOptions) -> Result<Arc<dyn Registry>> {
        if let Some(registry) = &self.registry {
            return Ok(registry.clone());
        }
        let mut keychain = Keychain::ambient();
        if let Some(auth) = &publish.auth {
            let target = Repository::parse(&publish.repository)?;
            keychain = keychain.with_static(
                &target.registry,
                Credential::new(auth.username.clone(), auth.password.clone()),
            );
        }
        let transport = LoggingTransport::with_user_agent(&publish.user_agent)?;
        Ok(Arc::new(HttpRegistry::with_transport(transport, keychain)))
    }

    fn builder(&self, options: BuildOptions, registry: Arc<dyn Registry>) -> Arc<dyn Builder> {
        let compiler = self
            .compiler
            .clone()
            .unwrap_or_else(|| Arc::new(GoCompiler::new(options.go_binary.clone())));
        let bases = BaseImageResolver::new(registry, self.bases.clone());
        Arc::new(ImageBuilder::new(options, compiler, bases))
    }

    fn publisher(&self, options: PublishOptions, registry: Arc<dyn Registry>) -> RegistryPublisher {
        RegistryPublisher::new(registry, options).with_retry_policy(self.retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_docker_repo_is_a_fallback() {
        let config = ProviderConfig {
            repo: None,
            docker_repo: Some("old.example.com/team".to_string()),
            basic_auth: None,
        };
        assert_eq!(config.repository(), Some("old.example.com/team"));

        let config = ProviderConfig {
            repo: Some("new.example.com/team".to_string()),
            ..config
        };
        assert_eq!(config.repository(), Some("new.example.com/team"));
    }

    #[test]
    fn test_malformed_basic_auth_is_rejected() {
        let config = ProviderConfig {
            basic_auth: Some("missing-colon".to_string()),
            ..Default::default()
        };
        let err = Provider::configure(&config).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_environment_sits_between_provider_and_resource() {
        let provider = Provider::configure(&ProviderConfig {
            repo: Some("provider.example.com/p".to_string()),
            ..Default::default()
        })
        .unwrap()
        .with_environment(PartialOptions::from_lookup(|key| {
            (key == "KO_DOCKER_REPO").then(|| "env.example.com/e".to_string())
        }));

        let merged = provider.merged(PartialOptions::default());
        assert_eq!(merged.repo.as_deref(), Some("env.example.com/e"));

        let merged = provider.merged(PartialOptions::for_resource(Some("res.example.com/r".to_string())));
        assert_eq!(merged.repo.as_deref(), Some("res.example.com/r"));
    }
}
