//! Narrow distribution-API surface used for base-image resolution and
//! publishing, with an HTTP implementation and an in-memory one.

pub mod auth;
pub mod http;
pub mod memory;
pub mod transport;

pub use auth::{Credential, CredentialSource, Keychain};
pub use http::HttpRegistry;
pub use memory::MemoryRegistry;

use crate::error::Result;
use crate::oci::{ImageReference, Repository};
use async_trait::async_trait;

/// A manifest as fetched from a registry
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteManifest {
    pub media_type: String,
    pub digest: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlobContent {
    /// Bytes produced locally
    Inline(Vec<u8>),
    /// Blob already present in another repository (base image layers)
    Remote(Repository),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub digest: String,
    pub size: u64,
    pub media_type: String,
    pub content: BlobContent,
}

impl Blob {
    pub fn inline(media_type: &str, data: Vec<u8>) -> Self {
        Self {
            digest: crate::oci::digest::digest_of(&data),
            size: data.len() as u64,
            media_type: media_type.to_string(),
            content: BlobContent::Inline(data),
        }
    }

    pub fn remote(media_type: &str, digest: &str, size: u64, source: Repository) -> Self {
        Self {
            digest: digest.to_string(),
            size,
            media_type: media_type.to_string(),
            content: BlobContent::Remote(source),
        }
    }

    pub fn descriptor(&self) -> crate::oci::OCIDescriptor {
        crate::oci::OCIDescriptor::new(&self.media_type, &self.digest, self.size)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestPayload {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl ManifestPayload {
    pub fn digest(&self) -> String {
        crate::oci::digest::digest_of(&self.bytes)
    }
}

/// Registry operations needed by the resolver and publisher
#[async_trait]
pub trait Registry: Send + Sync {
    async fn get_manifest(&self, reference: &ImageReference) -> Result<RemoteManifest>;

    async fn get_blob(&self, repository: &Repository, digest: &str) -> Result<Vec<u8>>;

    async fn blob_exists(&self, repository: &Repository, digest: &str) -> Result<bool>;

    /// Uploads a blob, mounting or copying remote content as needed
    async fn upload_blob(&self, repository: &Repository, blob: &Blob) -> Result<()>;

    /// Pushes a manifest under a tag or digest, returning its digest
    async fn put_manifest(
        &self,
        repository: &Repository,
        reference: &str,
        manifest: &ManifestPayload,
    ) -> Result<String>;
}
