//! Building import paths into images.

pub mod caching;
pub mod compiler;
pub mod image;
pub mod noop;
pub mod sbom;

pub use caching::CachingBuilder;
pub use compiler::{CompileRequest, CompiledBinary, Compiler, GoCompiler, PackageInfo};
pub use image::ImageBuilder;
pub use noop::NoopBuilder;
pub use sbom::Sbom;

use crate::constants::DIRECTIVE_SCHEME;
use crate::error::Result;
use crate::oci::{self, OCIDescriptor, OCIManifest, Platform};
use crate::registry::{Blob, ManifestPayload};
use async_trait::async_trait;
use std::sync::Arc;

/// Removes the `ko://` directive scheme if present
pub fn strip_scheme(import_path: &str) -> &str {
    import_path
        .strip_prefix(DIRECTIVE_SCHEME)
        .unwrap_or(import_path)
}

pub fn is_directive(value: &str) -> bool {
    value.starts_with(DIRECTIVE_SCHEME)
}

/// A single-platform image ready to publish
#[derive(Debug, Clone)]
pub struct BuiltImage {
    pub manifest: Vec<u8>,
    pub media_type: String,
    pub digest: String,
    pub config: Blob,
    pub layers: Vec<Blob>,
    pub platform: Option<Platform>,
    /// Not part of the image; published alongside it
    pub sbom: Option<Sbom>,
}

impl BuiltImage {
    /// Assembles the manifest for `config` and `layers`
    pub fn assemble(
        media_type: &str,
        config: Blob,
        layers: Vec<Blob>,
        platform: Option<Platform>,
        annotations: Option<std::collections::BTreeMap<String, String>>,
    ) -> Result<Self> {
        let manifest = OCIManifest {
            schema_version: 2,
            media_type: media_type.to_string(),
            config: config.descriptor(),
            layers: layers.iter().map(Blob::descriptor).collect(),
            annotations,
        };
        let bytes = serde_json::to_vec(&manifest)?;
        Ok(Self {
            digest: oci::digest::digest_of(&bytes),
            manifest: bytes,
            media_type: media_type.to_string(),
            config,
            layers,
            platform,
            sbom: None,
        })
    }

    /// An image with an empty config and no layers
    pub fn empty() -> Self {
        let config = Blob::inline(oci::OCI_CONFIG, br#"{"architecture":"","os":"","rootfs":{"type":"layers","diff_ids":[]}}"#.to_vec());
        let manifest = OCIManifest {
            schema_version: 2,
            media_type: oci::OCI_MANIFEST.to_string(),
            config: config.descriptor(),
            layers: Vec::new(),
            annotations: None,
        };
        let bytes = serde_json::to_vec(&manifest).unwrap_or_default();
        Self {
            digest: oci::digest::digest_of(&bytes),
            manifest: bytes,
            media_type: oci::OCI_MANIFEST.to_string(),
            config,
            layers: Vec::new(),
            platform: None,
            sbom: None,
        }
    }

    pub fn descriptor(&self) -> OCIDescriptor {
        let descriptor = OCIDescriptor::new(&self.media_type, &self.digest, self.manifest.len() as u64);
        match &self.platform {
            Some(platform) => descriptor.with_platform(platform.clone()),
            None => descriptor,
        }
    }

    pub fn payload(&self) -> ManifestPayload {
        ManifestPayload {
            media_type: self.media_type.clone(),
            bytes: self.manifest.clone(),
        }
    }

    pub fn blobs(&self) -> impl Iterator<Item = &Blob> {
        self.layers.iter().chain(std::iter::once(&self.config))
    }
}

/// A multi-platform index over built images
#[derive(Debug, Clone)]
pub struct BuiltIndex {
    pub manifest: Vec<u8>,
    pub media_type: String,
    pub digest: String,
    pub images: Vec<BuiltImage>,
}

impl BuiltIndex {
    pub fn assemble(media_type: &str, images: Vec<BuiltImage>) -> Result<Self> {
        let index = oci::OCIIndex {
            schema_version: 2,
            media_type: media_type.to_string(),
            manifests: images.iter().map(BuiltImage::descriptor).collect(),
            annotations: None,
        };
        let bytes = serde_json::to_vec(&index)?;
        Ok(Self {
            digest: oci::digest::digest_of(&bytes),
            manifest: bytes,
            media_type: media_type.to_string(),
            images,
        })
    }

    pub fn payload(&self) -> ManifestPayload {
        ManifestPayload {
            media_type: self.media_type.clone(),
            bytes: self.manifest.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BuildResult {
    Image(BuiltImage),
    Index(BuiltIndex),
}

impl BuildResult {
    pub fn digest(&self) -> &str {
        match self {
            BuildResult::Image(image) => &image.digest,
            BuildResult::Index(index) => &index.digest,
        }
    }

    pub fn media_type(&self) -> &str {
        match self {
            BuildResult::Image(image) => &image.media_type,
            BuildResult::Index(index) => &index.media_type,
        }
    }

    pub fn payload(&self) -> ManifestPayload {
        match self {
            BuildResult::Image(image) => image.payload(),
            BuildResult::Index(index) => index.payload(),
        }
    }

    pub fn images(&self) -> Vec<&BuiltImage> {
        match self {
            BuildResult::Image(image) => vec![image],
            BuildResult::Index(index) => index.images.iter().collect(),
        }
    }
}

/// Turns an import path into an image or index
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, import_path: &str) -> Result<Arc<BuildResult>>;

    /// Whether `value` names something this builder can build
    fn is_supported_reference(&self, value: &str) -> bool {
        is_directive(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("ko://example.com/app"), "example.com/app");
        assert_eq!(strip_scheme("example.com/app"), "example.com/app");
        assert!(is_directive("ko://."));
        assert!(!is_directive("ghcr.io/acme/app"));
    }

    #[test]
    fn test_empty_image_is_stable() {
        let a = BuiltImage::empty();
        let b = BuiltImage::empty();
        assert_eq!(a.digest, b.digest);
        assert!(a.layers.is_empty());
        assert_eq!(a.blobs().count(), 1);
    }

    #[test]
    fn test_index_descriptors_carry_platforms() {
        let mut amd = BuiltImage::empty();
        amd.platform = Some(Platform::new("linux", "amd64", None));
        let mut arm = BuiltImage::empty();
        arm.platform = Some(Platform::new("linux", "arm64", None));
        let index = BuiltIndex::assemble(oci::OCI_INDEX, vec![amd, arm]).unwrap();
        let parsed: oci::OCIIndex = serde_json::from_slice(&index.manifest).unwrap();
        assert_eq!(parsed.platforms().len(), 2);
        assert_eq!(index.digest, oci::digest::digest_of(&index.manifest));
    }
}
