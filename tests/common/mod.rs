#![allow(dead_code)]

use async_trait::async_trait;
use ocipress::build::{CompileRequest, CompiledBinary, Compiler, PackageInfo};
use ocipress::error::{Error, Result};
use ocipress::oci::{self, ImageReference, OCIDescriptor, OCIIndex, OCIManifest, Platform};
use ocipress::registry::MemoryRegistry;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const BASE: &str = "registry.example.com/base:latest";

/// Produces a binary derived from its inputs instead of running a toolchain
#[derive(Default)]
pub struct StubCompiler {
    compiles: AtomicUsize,
}

impl StubCompiler {
    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Compiler for StubCompiler {
    async fn locate(&self, working_dir: &Path, import_path: &str) -> Result<PackageInfo> {
        if import_path.contains("missing") {
            return Err(Error::PackageNotFound {
                import_path: import_path.to_string(),
                reason: "no Go files".to_string(),
            });
        }
        let name = import_path.rsplit('/').next().unwrap_or(import_path).to_string();
        Ok(PackageInfo {
            import_path: import_path.to_string(),
            dir: working_dir.to_path_buf(),
            name,
        })
    }

    async fn compile(&self, package: &PackageInfo, request: &CompileRequest<'_>) -> Result<CompiledBinary> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let data = format!(
            "{}|{}|{}",
            package.import_path,
            request.platform,
            request.ldflags.join(" ")
        );
        Ok(CompiledBinary {
            name: package.name.clone(),
            data: data.into_bytes(),
            build_info: Some(format!(
                "/tmp/{}: go1.22.1\n\tpath\t{}\n\tmod\t{}\t(devel)\t\n",
                package.name, package.import_path, package.import_path
            )),
            data_files: Vec::new(),
        })
    }
}

fn image_for(registry: &MemoryRegistry, reference: &ImageReference, platform: &Platform) -> (Vec<u8>, String) {
    let repository = &reference.repository;
    let config = serde_json::json!({
        "os": platform.os,
        "architecture": platform.architecture,
        "config": {"Env": ["PATH=/usr/bin:/bin"], "Cmd": ["/bin/sh"]},
        "rootfs": {"type": "layers", "diff_ids": []},
    });
    let config = serde_json::to_vec(&config).unwrap();
    let layer = format!("base layer for {}", platform).into_bytes();
    let config_digest = registry.insert_blob(repository, config.clone());
    let layer_digest = registry.insert_blob(repository, layer.clone());
    let manifest = OCIManifest {
        schema_version: 2,
        media_type: oci::OCI_MANIFEST.to_string(),
        config: OCIDescriptor::new(oci::OCI_CONFIG, &config_digest, config.len() as u64),
        layers: vec![OCIDescriptor::new(oci::OCI_LAYER_GZIP, &layer_digest, layer.len() as u64)],
        annotations: None,
    };
    let bytes = serde_json::to_vec(&manifest).unwrap();
    let untagged = ImageReference {
        repository: repository.clone(),
        tag: None,
        digest: None,
    };
    let digest = registry.insert_manifest(&untagged, oci::OCI_MANIFEST, bytes.clone());
    (bytes, digest)
}

/// A single-platform linux/amd64 OCI base image under `reference`
pub fn seed_base_image(registry: &MemoryRegistry, reference: &str) {
    let reference = ImageReference::parse(reference).unwrap();
    let platform = Platform::new("linux", "amd64", None);
    let (bytes, _) = image_for(registry, &reference, &platform);
    registry.insert_manifest(&reference, oci::OCI_MANIFEST, bytes);
}

/// A multi-platform OCI base index under `reference`
pub fn seed_base_index(registry: &MemoryRegistry, reference: &str, platforms: &[&str]) {
    let reference = ImageReference::parse(reference).unwrap();
    let mut manifests = Vec::new();
    for platform in platforms {
        let platform: Platform = platform.parse().unwrap();
        let (bytes, digest) = image_for(registry, &reference, &platform);
        manifests.push(OCIDescriptor::new(oci::OCI_MANIFEST, &digest, bytes.len() as u64).with_platform(platform));
    }
    let index = OCIIndex {
        schema_version: 2,
        media_type: oci::OCI_INDEX.to_string(),
        manifests,
        annotations: None,
    };
    registry.insert_manifest(&reference, oci::OCI_INDEX, serde_json::to_vec(&index).unwrap());
}
