//! Base image resolution with a process-wide cache.

use crate::error::{Error, Result, ResultExt};
use crate::oci::{self, ImageReference, OCIIndex, OCIManifest, Platform};
use crate::registry::Registry;
use crate::{log_cache_hit, log_cache_miss};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RemoteImage {
    pub reference: ImageReference,
    pub media_type: String,
    pub digest: String,
    pub manifest: OCIManifest,
}

#[derive(Debug, Clone)]
pub struct RemoteIndex {
    pub reference: ImageReference,
    pub media_type: String,
    pub digest: String,
    pub index: OCIIndex,
}

#[derive(Debug, Clone)]
pub enum BaseImage {
    Image(RemoteImage),
    Index(RemoteIndex),
}

impl BaseImage {
    pub fn reference(&self) -> &ImageReference {
        match self {
            BaseImage::Image(image) => &image.reference,
            BaseImage::Index(index) => &index.reference,
        }
    }

    pub fn media_type(&self) -> &str {
        match self {
            BaseImage::Image(image) => &image.media_type,
            BaseImage::Index(index) => &index.media_type,
        }
    }
}

/// Base images keyed by the exact reference string they were requested
/// with. Entries are never invalidated; concurrent writers race and the
/// last write wins.
#[derive(Debug, Default)]
pub struct BaseImageCache {
    entries: RwLock<HashMap<String, Arc<BaseImage>>>,
}

impl BaseImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &str) -> Option<Arc<BaseImage>> {
        self.entries.read().get(reference).cloned()
    }

    pub fn insert(&self, reference: &str, image: Arc<BaseImage>) {
        self.entries.write().insert(reference.to_string(), image);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct BaseImageResolver {
    registry: Arc<dyn Registry>,
    cache: Arc<BaseImageCache>,
}

impl BaseImageResolver {
    pub fn new(registry: Arc<dyn Registry>, cache: Arc<BaseImageCache>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub async fn resolve(&self, reference: &str) -> Result<Arc<BaseImage>> {
        if let Some(image) = self.cache.get(reference) {
            log_cache_hit!("base", reference);
            return Ok(image);
        }
        log_cache_miss!("base", reference);

        let parsed = ImageReference::parse(reference)?;
        let remote = self
            .registry
            .get_manifest(&parsed)
            .await
            .with_context(|| format!("fetching base image {}", reference))?;

        let image = if oci::is_image(&remote.media_type) {
            let manifest: OCIManifest = serde_json::from_slice(&remote.bytes)?;
            BaseImage::Image(RemoteImage {
                reference: parsed,
                media_type: remote.media_type,
                digest: remote.digest,
                manifest,
            })
        } else if oci::is_index(&remote.media_type) {
            let index: OCIIndex = serde_json::from_slice(&remote.bytes)?;
            BaseImage::Index(RemoteIndex {
                reference: parsed,
                media_type: remote.media_type,
                digest: remote.digest,
                index,
            })
        } else {
            return Err(Error::UnsupportedMediaType(remote.media_type));
        };
        tracing::debug!(base = reference, media_type = image.media_type(), "Resolved base image");

        let image = Arc::new(image);
        self.cache.insert(reference, image.clone());
        Ok(image)
    }

    /// The child of `index` for `platform`, fetched by digest
    pub async fn child(&self, index: &RemoteIndex, platform: &Platform) -> Result<RemoteImage> {
        let descriptor = index.index.find(platform).ok_or_else(|| Error::PlatformNotFound {
            base: index.reference.to_string(),
            platform: platform.to_string(),
        })?;
        let child = index.reference.repository.with_digest(&descriptor.digest);
        match self.resolve(&child.to_string()).await?.as_ref() {
            BaseImage::Image(image) => Ok(image.clone()),
            BaseImage::Index(nested) => Err(Error::UnsupportedMediaType(nested.media_type.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::digest::digest_of;
    use crate::oci::OCIDescriptor;
    use crate::registry::MemoryRegistry;

    fn seed(registry: &MemoryRegistry, reference: &str) {
        let manifest = OCIManifest {
            schema_version: 2,
            media_type: oci::OCI_MANIFEST.to_string(),
            config: OCIDescriptor::new(oci::OCI_CONFIG, &digest_of(b"{}"), 2),
            layers: Vec::new(),
            annotations: None,
        };
        registry.insert_manifest(
            &ImageReference::parse(reference).unwrap(),
            oci::OCI_MANIFEST,
            serde_json::to_vec(&manifest).unwrap(),
        );
    }

    #[tokio::test]
    async fn test_each_base_is_fetched_once() {
        let registry = Arc::new(MemoryRegistry::new());
        seed(&registry, "registry.example.com/base:latest");
        let cache = Arc::new(BaseImageCache::new());

        let first = BaseImageResolver::new(registry.clone(), cache.clone());
        let a = first.resolve("registry.example.com/base:latest").await.unwrap();
        let b = first.resolve("registry.example.com/base:latest").await.unwrap();
        let second = BaseImageResolver::new(registry.clone(), cache.clone());
        let c = second.resolve("registry.example.com/base:latest").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert!(matches!(a.as_ref(), BaseImage::Image(_)));
        assert_eq!(registry.manifest_gets(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_media_type() {
        let registry = Arc::new(MemoryRegistry::new());
        let reference = ImageReference::parse("registry.example.com/chart:1.0").unwrap();
        registry.insert_manifest(&reference, "application/vnd.cncf.helm.chart.content.v1.tar+gzip", b"{}".to_vec());
        let resolver = BaseImageResolver::new(registry, Arc::new(BaseImageCache::new()));
        let err = resolver.resolve("registry.example.com/chart:1.0").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaType(_)));
    }

    #[tokio::test]
    async fn test_invalid_reference() {
        let registry = Arc::new(MemoryRegistry::new());
        let resolver = BaseImageResolver::new(registry.clone(), Arc::new(BaseImageCache::new()));
        let err = resolver.resolve("Not A Reference").await.unwrap_err();
        assert!(matches!(err, Error::InvalidReference { .. }));
        assert_eq!(registry.manifest_gets(), 0);
    }
}
