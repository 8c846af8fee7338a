use crate::base::{BaseImage, BaseImageResolver, RemoteImage};
use crate::build::compiler::{CompileRequest, Compiler, PackageInfo};
use crate::build::{sbom, strip_scheme, BuildResult, Builder, BuiltImage, BuiltIndex};
use crate::error::{Result, ResultExt};
use crate::oci::config::{config_platform, derive_config, ConfigUpdate};
use crate::oci::layer::build_app_layer;
use crate::oci::{self, Platform};
use crate::options::{BuildOptions, PlatformSelection};
use crate::registry::Blob;
use crate::{log_build_complete, log_build_start};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Media types of one manifest family; built images follow their base
#[derive(Debug, Clone, Copy)]
struct MediaTypes {
    manifest: &'static str,
    index: &'static str,
    config: &'static str,
    layer: &'static str,
}

const OCI_TYPES: MediaTypes = MediaTypes {
    manifest: oci::OCI_MANIFEST,
    index: oci::OCI_INDEX,
    config: oci::OCI_CONFIG,
    layer: oci::OCI_LAYER_GZIP,
};

const DOCKER_TYPES: MediaTypes = MediaTypes {
    manifest: oci::DOCKER_MANIFEST,
    index: oci::DOCKER_MANIFEST_LIST,
    config: oci::DOCKER_CONFIG,
    layer: oci::DOCKER_LAYER_GZIP,
};

fn media_types_for(base_media_type: &str) -> MediaTypes {
    if oci::is_docker(base_media_type) {
        DOCKER_TYPES
    } else {
        OCI_TYPES
    }
}

/// Compiles import paths and layers them onto the configured base image
pub struct ImageBuilder {
    options: BuildOptions,
    compiler: Arc<dyn Compiler>,
    bases: BaseImageResolver,
}

impl ImageBuilder {
    pub fn new(options: BuildOptions, compiler: Arc<dyn Compiler>, bases: BaseImageResolver) -> Self {
        Self {
            options,
            compiler,
            bases,
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Platform-specific base images to build on, in build order
    async fn plan(&self, base: &BaseImage) -> Result<Vec<(Platform, RemoteImage)>> {
        match (base, &self.options.platforms) {
            (BaseImage::Index(index), PlatformSelection::All) => {
                let mut planned = Vec::new();
                for platform in index.index.platforms() {
                    let child = self.bases.child(index, &platform).await?;
                    planned.push((platform, child));
                }
                Ok(planned)
            }
            (BaseImage::Index(index), PlatformSelection::Only(platforms)) => {
                let mut planned = Vec::new();
                for wanted in platforms {
                    let child = self.bases.child(index, wanted).await?;
                    let concrete = index
                        .index
                        .find(wanted)
                        .and_then(|d| d.platform.clone())
                        .unwrap_or_else(|| wanted.clone());
                    planned.push((concrete, child));
                }
                Ok(planned)
            }
            (BaseImage::Image(image), PlatformSelection::All) => {
                let config = self.base_config(image).await?;
                Ok(vec![(config_platform(&config)?, image.clone())])
            }
            (BaseImage::Image(image), PlatformSelection::Only(platforms)) => {
                Ok(platforms.iter().map(|p| (p.clone(), image.clone())).collect())
            }
        }
    }

    async fn base_config(&self, image: &RemoteImage) -> Result<Vec<u8>> {
        self.bases
            .registry()
            .get_blob(&image.reference.repository, &image.manifest.config.digest)
            .await
            .with_context(|| format!("fetching config of base image {}", image.reference))
    }

    async fn build_for_platform(
        &self,
        package: &PackageInfo,
        platform: &Platform,
        base: &RemoteImage,
    ) -> Result<BuiltImage> {
        let request = CompileRequest {
            platform,
            working_dir: &self.options.working_dir,
            ldflags: &self.options.ldflags,
            env: &self.options.env,
            trimpath: self.options.trimpath,
        };
        let binary = self.compiler.compile(package, &request).await?;

        let created = self.options.created();
        let layer = build_app_layer(
            &binary.name,
            &binary.data,
            &binary.data_files,
            created.timestamp().max(0) as u64,
        )?;
        let base_config = self.base_config(base).await?;
        let config = derive_config(
            &base_config,
            &ConfigUpdate {
                platform,
                binary_name: &binary.name,
                diff_id: &layer.diff_id,
                created,
                created_by: &format!("ocipress build {}", package.import_path),
            },
        )?;

        let types = media_types_for(&base.media_type);
        let mut layers: Vec<Blob> = base
            .manifest
            .layers
            .iter()
            .map(|d| Blob::remote(&d.media_type, &d.digest, d.size, base.reference.repository.clone()))
            .collect();
        layers.push(Blob::inline(types.layer, layer.data));

        let annotations = (types.manifest == oci::OCI_MANIFEST).then(|| {
            BTreeMap::from([
                (
                    "org.opencontainers.image.base.digest".to_string(),
                    base.digest.clone(),
                ),
                (
                    "org.opencontainers.image.base.name".to_string(),
                    base.reference.to_string(),
                ),
            ])
        });
        let mut image = BuiltImage::assemble(
            types.manifest,
            Blob::inline(types.config, config),
            layers,
            Some(platform.clone()),
            annotations,
        )?;
        image.sbom = sbom::generate(self.options.sbom, &package.import_path, &binary, created)?;
        Ok(image)
    }
}

#[async_trait]
impl Builder for ImageBuilder {
    async fn build(&self, import_path: &str) -> Result<Arc<BuildResult>> {
        let start = Instant::now();
        let import_path = strip_scheme(import_path);
        log_build_start!(import_path, self.options.platform_summary());

        let package = self
            .compiler
            .locate(&self.options.working_dir, import_path)
            .await?;
        let base = self.bases.resolve(&self.options.base_image).await?;
        let planned = self.plan(&base).await?;

        let mut images = Vec::with_capacity(planned.len());
        for (platform, base_image) in &planned {
            let image = self
                .build_for_platform(&package, platform, base_image)
                .await
                .with_context(|| format!("building {} for {}", package.import_path, platform))?;
            images.push(image);
        }

        let result = if images.len() == 1 {
            let image = images.remove(0);
            BuildResult::Image(image)
        } else {
            let types = media_types_for(base.media_type());
            BuildResult::Index(BuiltIndex::assemble(types.index, images)?)
        };
        log_build_complete!(import_path, result.digest(), start.elapsed().as_millis() as u64);
        Ok(Arc::new(result))
    }
}
