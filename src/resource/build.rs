use crate::constants::ZERO_REFERENCE;
use crate::error::{Result, ResultExt};
use crate::namer::NamingPolicy;
use crate::options::{BuildOptions, PartialOptions, PublishOptions};
use crate::publish::{reference_for, Publisher};
use crate::resource::{Diagnostic, Provider, ReadOutcome};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Inputs of the build resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildResourceConfig {
    pub importpath: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub base_image: Option<String>,
    #[serde(default)]
    pub sbom: Option<String>,
    /// Publishes to exactly this repository, without the import path appended
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub ldflags: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub go_binary_path: Option<PathBuf>,
    /// Passes `-trimpath` to the compiler; on unless set to `false`
    #[serde(default)]
    pub trimpath: Option<bool>,
    /// Report `name:tag@digest` when exactly one tag is configured
    #[serde(default)]
    pub tag_reference: bool,
}

impl BuildResourceConfig {
    pub fn new(importpath: impl Into<String>) -> Self {
        Self {
            importpath: importpath.into(),
            ..Default::default()
        }
    }

    fn layer(&self) -> PartialOptions {
        let non_empty = |list: &Vec<String>| (!list.is_empty()).then(|| list.clone());
        PartialOptions {
            working_dir: self.working_dir.clone(),
            base_image: self.base_image.clone().filter(|b| !b.is_empty()),
            platforms: non_empty(&self.platforms),
            sbom: self.sbom.clone().filter(|s| !s.is_empty()),
            ldflags: non_empty(&self.ldflags),
            env: non_empty(&self.env),
            go_binary: self.go_binary_path.clone(),
            tags: non_empty(&self.tags),
            trimpath: self.trimpath,
            tag_reference: self.tag_reference.then_some(true),
            ..PartialOptions::for_resource(self.repo.clone())
        }
    }
}

/// Stored state; `id` is empty when the resource must be recreated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResourceState {
    pub id: String,
    pub image_ref: String,
}

impl Provider {
    fn build_options(&self, config: &BuildResourceConfig) -> Result<(BuildOptions, PublishOptions)> {
        let partial = self.merged(config.layer());
        let build = BuildOptions::from_partial(&partial)?;
        let publish = PublishOptions::from_partial(&partial, NamingPolicy::PreserveImportPath)?;
        Ok((build, publish))
    }

    /// Builds and publishes; the published reference becomes the id
    pub async fn create_build(&self, config: &BuildResourceConfig) -> Result<BuildResourceState> {
        let (build, publish) = self.build_options(config)?;
        let registry = self.registry_for(&publish)?;
        let builder = self.builder(build, registry.clone());
        let result = builder
            .build(&config.importpath)
            .await
            .context("create build")?;
        let reference = self
            .publisher(publish, registry)
            .publish(&result, &config.importpath)
            .await
            .context("create publish")?;
        tracing::debug!(importpath = %config.importpath, reference = %reference, "Created build resource");
        Ok(BuildResourceState {
            id: reference.clone(),
            image_ref: reference,
        })
    }

    /// Rebuilds without publishing and reports the reference a publish would
    /// produce. A failed build yields the zero reference and a warning
    /// instead of an error; either way a changed reference clears the id.
    pub async fn read_build(
        &self,
        config: &BuildResourceConfig,
        state: &BuildResourceState,
    ) -> Result<ReadOutcome<BuildResourceState>> {
        let (build, publish) = self.build_options(config)?;
        let registry = self.registry_for(&publish)?;
        let builder = self.builder(build, registry);

        let mut diagnostics = Vec::new();
        let reference = match builder.build(&config.importpath).await {
            Ok(result) => reference_for(&result, &config.importpath, &publish)?,
            Err(e) => {
                tracing::warn!(importpath = %config.importpath, error = %e, "Read build failed");
                diagnostics.push(Diagnostic::warning(
                    "Image build failed to read -- create may fail.",
                    format!("failed to read image: {}", e),
                ));
                ZERO_REFERENCE.to_string()
            }
        };

        let id = if reference != state.id || reference == ZERO_REFERENCE {
            String::new()
        } else {
            reference.clone()
        };
        Ok(ReadOutcome {
            state: BuildResourceState {
                id,
                image_ref: reference,
            },
            diagnostics,
        })
    }

    /// Published images are left in the registry
    pub async fn delete_build(&self, state: &BuildResourceState) -> Result<()> {
        tracing::debug!(id = %state.id, "Deleted build resource");
        Ok(())
    }
}
