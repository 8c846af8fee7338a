use crate::error::{Result, ResultExt};
use crate::namer::NamingPolicy;
use crate::options::{BuildOptions, PartialOptions, PublishOptions};
use crate::publish::{NoopPublisher, Publisher};
use crate::resolve::{FilenameOptions, ManifestResolver, Resolved, Selector};
use crate::resource::{Provider, ReadOutcome};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Inputs of the resolve resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveResourceConfig {
    pub filenames: Vec<String>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub sbom: Option<String>,
    #[serde(default)]
    pub base_image: Option<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// `false` resolves to the references a push would produce without
    /// pushing anything
    #[serde(default)]
    pub push: Option<bool>,
}

impl ResolveResourceConfig {
    /// Unlike the build resource, a repo here keeps the default naming so
    /// every import path in the set lands in its own repository
    fn layer(&self) -> PartialOptions {
        let non_empty = |list: &Vec<String>| (!list.is_empty()).then(|| list.clone());
        PartialOptions {
            working_dir: self.working_dir.clone(),
            base_image: self.base_image.clone().filter(|b| !b.is_empty()),
            platforms: non_empty(&self.platforms),
            sbom: self.sbom.clone().filter(|s| !s.is_empty()),
            tags: non_empty(&self.tags),
            repo: self.repo.clone().filter(|r| !r.is_empty()),
            ..Default::default()
        }
    }

    fn pushes(&self) -> bool {
        self.push.unwrap_or(true)
    }

    fn files(&self) -> FilenameOptions {
        FilenameOptions {
            filenames: self.filenames.clone(),
            recursive: self.recursive,
        }
    }

    fn selector(&self) -> Result<Selector> {
        Selector::parse(self.selector.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResourceState {
    pub id: String,
    pub manifests: Vec<String>,
}

impl From<Resolved> for ResolveResourceState {
    fn from(resolved: Resolved) -> Self {
        Self {
            id: resolved.id,
            manifests: resolved.manifests,
        }
    }
}

impl Provider {
    async fn run_resolve(&self, config: &ResolveResourceConfig, tags: bool) -> Result<ResolveResourceState> {
        let selector = config.selector()?;
        let partial = self.merged(config.layer());
        let build = BuildOptions::from_partial(&partial)?;
        let mut publish = PublishOptions::from_partial(&partial, NamingPolicy::Hashed)?;
        if !tags {
            publish.tags.clear();
        }
        let registry = self.registry_for(&publish)?;
        let builder = self.builder(build, registry.clone());
        let publisher: Arc<dyn Publisher> = if config.pushes() {
            Arc::new(self.publisher(publish, registry))
        } else {
            Arc::new(NoopPublisher::with_options(publish))
        };
        let resolved = ManifestResolver::new(builder, publisher)
            .resolve(&config.files(), &selector)
            .await?;
        Ok(resolved.into())
    }

    pub async fn create_resolve(&self, config: &ResolveResourceConfig) -> Result<ResolveResourceState> {
        self.run_resolve(config, true).await.context("create resolve")
    }

    /// Resolves again without moving tags
    pub async fn read_resolve(&self, config: &ResolveResourceConfig) -> Result<ReadOutcome<ResolveResourceState>> {
        let state = self.run_resolve(config, false).await.context("read resolve")?;
        Ok(ReadOutcome::clean(state))
    }

    pub async fn update_resolve(&self, config: &ResolveResourceConfig) -> Result<ResolveResourceState> {
        self.run_resolve(config, true).await.context("update resolve")
    }

    /// Published images are left in the registry
    pub async fn delete_resolve(&self, state: &ResolveResourceState) -> Result<()> {
        tracing::debug!(id = %state.id, "Deleted resolve resource");
        Ok(())
    }
}

/// Resolves without building or publishing; directives become bare import
/// paths. Needs no provider or repository.
pub async fn dry_resolve(files: &FilenameOptions, selector: &str) -> Result<ResolveResourceState> {
    let selector = Selector::parse(selector)?;
    let resolved = ManifestResolver::dry()
        .resolve(files, &selector)
        .await
        .context("dry resolve")?;
    Ok(resolved.into())
}
