use crate::error::{RegistryError, Result};
use crate::oci::digest::digest_of;
use crate::oci::{self, ImageReference, OCIIndex, OCIManifest, Repository};
use crate::registry::{Blob, BlobContent, ManifestPayload, Registry, RemoteManifest};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-process registry holding blobs and manifests in memory. Validates
/// that pushed manifests only reference content it already has, counts
/// calls, and can be told to fail upcoming manifest pushes.
#[derive(Default)]
pub struct MemoryRegistry {
    blobs: RwLock<HashMap<(String, String), Vec<u8>>>,
    manifests: RwLock<HashMap<(String, String), RemoteManifest>>,
    manifest_faults: Mutex<VecDeque<RegistryError>>,
    manifest_gets: AtomicUsize,
    blob_uploads: AtomicUsize,
    manifest_puts: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_blob(&self, repository: &Repository, data: Vec<u8>) -> String {
        let digest = digest_of(&data);
        self.blobs
            .write()
            .insert((repository.to_string(), digest.clone()), data);
        digest
    }

    /// Stores a manifest under its digest and, when present, its tag
    pub fn insert_manifest(&self, reference: &ImageReference, media_type: &str, bytes: Vec<u8>) -> String {
        let manifest = RemoteManifest {
            media_type: media_type.to_string(),
            digest: digest_of(&bytes),
            bytes,
        };
        let digest = manifest.digest.clone();
        let repo = reference.repository.to_string();
        let mut manifests = self.manifests.write();
        if let Some(tag) = &reference.tag {
            manifests.insert((repo.clone(), tag.clone()), manifest.clone());
        }
        manifests.insert((repo, digest.clone()), manifest);
        digest
    }

    /// Makes the next manifest pushes fail with `error`, `times` times
    pub fn fail_manifest_puts(&self, error: RegistryError, times: usize) {
        let mut faults = self.manifest_faults.lock();
        for _ in 0..times {
            faults.push_back(error.clone());
        }
    }

    pub fn manifest(&self, repository: &Repository, reference: &str) -> Option<RemoteManifest> {
        self.manifests
            .read()
            .get(&(repository.to_string(), reference.to_string()))
            .cloned()
    }

    pub fn has_blob(&self, repository: &Repository, digest: &str) -> bool {
        self.blobs
            .read()
            .contains_key(&(repository.to_string(), digest.to_string()))
    }

    /// Repositories that hold at least one manifest, sorted
    pub fn repositories(&self) -> Vec<String> {
        let mut repos: Vec<String> = self.manifests.read().keys().map(|(r, _)| r.clone()).collect();
        repos.sort();
        repos.dedup();
        repos
    }

    pub fn manifest_gets(&self) -> usize {
        self.manifest_gets.load(Ordering::SeqCst)
    }

    pub fn blob_uploads(&self) -> usize {
        self.blob_uploads.load(Ordering::SeqCst)
    }

    pub fn manifest_puts(&self) -> usize {
        self.manifest_puts.load(Ordering::SeqCst)
    }

    fn not_found(method: &str, url: String, code: &str) -> RegistryError {
        let body = format!(r#"{{"errors":[{{"code":"{}","message":"not found"}}]}}"#, code);
        RegistryError::from_response(method, &url, 404, body.as_bytes())
    }

    fn missing_reference(&self, repository: &Repository, manifest: &ManifestPayload) -> Option<String> {
        let repo = repository.to_string();
        if oci::is_index(&manifest.media_type) {
            let index: OCIIndex = serde_json::from_slice(&manifest.bytes).ok()?;
            let manifests = self.manifests.read();
            return index
                .manifests
                .iter()
                .find(|d| !manifests.contains_key(&(repo.clone(), d.digest.clone())))
                .map(|d| d.digest.clone());
        }
        let parsed: OCIManifest = serde_json::from_slice(&manifest.bytes).ok()?;
        let blobs = self.blobs.read();
        std::iter::once(&parsed.config)
            .chain(parsed.layers.iter())
            .find(|d| !blobs.contains_key(&(repo.clone(), d.digest.clone())))
            .map(|d| d.digest.clone())
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get_manifest(&self, reference: &ImageReference) -> Result<RemoteManifest> {
        self.manifest_gets.fetch_add(1, Ordering::SeqCst);
        self.manifest(&reference.repository, reference.identifier())
            .ok_or_else(|| Self::not_found("GET", format!("{}", reference), "MANIFEST_UNKNOWN").into())
    }

    async fn get_blob(&self, repository: &Repository, digest: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(&(repository.to_string(), digest.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found("GET", format!("{}@{}", repository, digest), "BLOB_UNKNOWN").into())
    }

    async fn blob_exists(&self, repository: &Repository, digest: &str) -> Result<bool> {
        Ok(self.has_blob(repository, digest))
    }

    async fn upload_blob(&self, repository: &Repository, blob: &Blob) -> Result<()> {
        self.blob_uploads.fetch_add(1, Ordering::SeqCst);
        let data = match &blob.content {
            BlobContent::Inline(data) => data.clone(),
            BlobContent::Remote(source) => self.get_blob(source, &blob.digest).await?,
        };
        if digest_of(&data) != blob.digest {
            return Err(RegistryError::from_response(
                "PUT",
                &format!("{}@{}", repository, blob.digest),
                400,
                br#"{"errors":[{"code":"DIGEST_INVALID","message":"provided digest did not match uploaded content"}]}"#,
            )
            .into());
        }
        self.blobs
            .write()
            .insert((repository.to_string(), blob.digest.clone()), data);
        Ok(())
    }

    async fn put_manifest(
        &self,
        repository: &Repository,
        reference: &str,
        manifest: &ManifestPayload,
    ) -> Result<String> {
        self.manifest_puts.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.manifest_faults.lock().pop_front() {
            return Err(fault.into());
        }
        if let Some(missing) = self.missing_reference(repository, manifest) {
            let body = format!(
                r#"{{"errors":[{{"code":"MANIFEST_BLOB_UNKNOWN","message":"blob unknown to registry","detail":"{}"}}]}}"#,
                missing
            );
            return Err(RegistryError::from_response(
                "PUT",
                &format!("{}:{}", repository, reference),
                400,
                body.as_bytes(),
            )
            .into());
        }
        let digest = manifest.digest();
        let stored = RemoteManifest {
            media_type: manifest.media_type.clone(),
            digest: digest.clone(),
            bytes: manifest.bytes.clone(),
        };
        let mut manifests = self.manifests.write();
        manifests.insert((repository.to_string(), digest.clone()), stored.clone());
        manifests.insert((repository.to_string(), reference.to_string()), stored);
        Ok(digest)
    }
}
