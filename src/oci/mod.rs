pub mod config;
pub mod digest;
pub mod layer;
pub mod manifest;
pub mod platform;
pub mod reference;

pub use manifest::{OCIDescriptor, OCIIndex, OCIManifest};
pub use platform::Platform;
pub use reference::{ImageReference, Repository};

use oci_spec::image::MediaType;

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const OCI_EMPTY: &str = "application/vnd.oci.empty.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Media types accepted when fetching a manifest by tag or digest
pub const MANIFEST_ACCEPT: &[&str] = &[OCI_MANIFEST, OCI_INDEX, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST];

/// True for single-image manifests, OCI or Docker
pub fn is_image(media_type: &str) -> bool {
    matches!(MediaType::from(media_type), MediaType::ImageManifest) || media_type == DOCKER_MANIFEST
}

/// True for multi-platform indexes, OCI or Docker
pub fn is_index(media_type: &str) -> bool {
    matches!(MediaType::from(media_type), MediaType::ImageIndex) || media_type == DOCKER_MANIFEST_LIST
}

/// True for the Docker v2 schema 2 family
pub fn is_docker(media_type: &str) -> bool {
    media_type == DOCKER_MANIFEST || media_type == DOCKER_MANIFEST_LIST
}
