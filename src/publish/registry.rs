use crate::build::{BuildResult, BuiltImage, Sbom};
use crate::error::{is_transient, Result, ResultExt};
use crate::oci::digest::hex_part;
use crate::oci::{self, Repository};
use crate::options::PublishOptions;
use crate::publish::Publisher;
use crate::registry::{Blob, Registry};
use crate::retry::{retry, RetryPolicy};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// The reference `result` is published under, without talking to a registry
pub fn reference_for(result: &BuildResult, import_path: &str, options: &PublishOptions) -> Result<String> {
    let name = options.naming.name(&options.repository, import_path)?;
    Ok(match single_tag(options) {
        Some(tag) => format!("{}:{}@{}", name, tag, result.digest()),
        None => format!("{}@{}", name, result.digest()),
    })
}

fn single_tag(options: &PublishOptions) -> Option<&str> {
    match options.tags.as_slice() {
        [tag] if options.tag_reference => Some(tag.as_str()),
        _ => None,
    }
}

/// Tag an SBOM for the image with `digest` is attached under
pub fn sbom_tag(digest: &str) -> String {
    format!("sha256-{}.sbom", hex_part(digest))
}

pub struct RegistryPublisher {
    registry: Arc<dyn Registry>,
    options: PublishOptions,
    retry: RetryPolicy,
}

impl RegistryPublisher {
    pub fn new(registry: Arc<dyn Registry>, options: PublishOptions) -> Self {
        Self {
            registry,
            options,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    async fn upload_blobs<'a, I>(&self, repository: &Repository, blobs: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Blob>,
    {
        let mut seen = HashSet::new();
        for blob in blobs {
            if !seen.insert(blob.digest.clone()) {
                continue;
            }
            if self.registry.blob_exists(repository, &blob.digest).await? {
                tracing::debug!(digest = %blob.digest, repository = %repository, "Blob already present");
                continue;
            }
            self.registry
                .upload_blob(repository, blob)
                .await
                .with_context(|| format!("uploading blob {}", blob.digest))?;
        }
        Ok(())
    }

    /// Children by digest, then the top-level manifest by digest, then tags
    async fn push_manifests(&self, repository: &Repository, result: &BuildResult) -> Result<()> {
        if let BuildResult::Index(index) = result {
            for image in &index.images {
                self.registry
                    .put_manifest(repository, &image.digest, &image.payload())
                    .await?;
            }
        }
        let payload = result.payload();
        self.registry
            .put_manifest(repository, result.digest(), &payload)
            .await?;
        for tag in &self.options.tags {
            self.registry.put_manifest(repository, tag, &payload).await?;
        }
        Ok(())
    }

    async fn attach_sbom(&self, repository: &Repository, image: &BuiltImage, sbom: &Sbom) -> Result<()> {
        let config = Blob::inline(oci::OCI_EMPTY, b"{}".to_vec());
        let layer = Blob::inline(&sbom.media_type, sbom.data.clone());
        self.upload_blobs(repository, [&config, &layer]).await?;
        let artifact = BuiltImage::assemble(oci::OCI_MANIFEST, config, vec![layer], None, None)?;
        let tag = sbom_tag(&image.digest);
        self.registry
            .put_manifest(repository, &tag, &artifact.payload())
            .await
            .with_context(|| format!("attaching {} sbom", sbom.mode))?;
        tracing::debug!(image = %image.digest, tag = %tag, "Attached SBOM");
        Ok(())
    }
}

#[async_trait]
impl Publisher for RegistryPublisher {
    async fn publish(&self, result: &BuildResult, import_path: &str) -> Result<String> {
        let start = Instant::now();
        let name = self.options.naming.name(&self.options.repository, import_path)?;
        let repository = Repository::parse(&name)?;

        let images = result.images();
        let blobs: Vec<&Blob> = images.iter().flat_map(|image| image.blobs()).collect();
        self.upload_blobs(&repository, blobs).await?;

        retry(&self.retry, "push manifest", is_transient, |_attempt| {
            self.push_manifests(&repository, result)
        })
        .await
        .with_context(|| format!("pushing manifest for {}", name))?;

        for image in &images {
            if let Some(sbom) = &image.sbom {
                self.attach_sbom(&repository, image, sbom).await?;
            }
        }

        let reference = reference_for(result, import_path, &self.options)?;
        tracing::info!(
            importpath = import_path,
            reference = %reference,
            duration_ms = start.elapsed().as_millis() as u64,
            "Published"
        );
        Ok(reference)
    }
}
