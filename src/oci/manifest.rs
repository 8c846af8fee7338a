use crate::oci::platform::Platform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OCIManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub config: OCIDescriptor,
    pub layers: Vec<OCIDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OCIDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl OCIDescriptor {
    pub fn new(media_type: &str, digest: &str, size: u64) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: digest.to_string(),
            size,
            platform: None,
            urls: None,
            annotations: None,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OCIIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub manifests: Vec<OCIDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl OCIIndex {
    /// Platforms advertised by the index, skipping attestation entries
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = Vec::new();
        for platform in self.manifests.iter().filter_map(|m| m.platform.as_ref()) {
            if !platform.is_unknown() && !platforms.contains(platform) {
                platforms.push(platform.clone());
            }
        }
        platforms
    }

    /// First child manifest whose platform satisfies `wanted`
    pub fn find(&self, wanted: &Platform) -> Option<&OCIDescriptor> {
        self.manifests.iter().find(|m| {
            m.platform
                .as_ref()
                .map(|p| wanted.matches(p))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:aa", "size": 10,
             "platform": {"architecture": "amd64", "os": "linux"}},
            {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:bb", "size": 11,
             "platform": {"architecture": "arm64", "os": "linux", "variant": "v8"}},
            {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:cc", "size": 12,
             "platform": {"architecture": "unknown", "os": "unknown"}}
        ]
    }"#;

    #[test]
    fn test_index_platforms_skip_attestations() {
        let index: OCIIndex = serde_json::from_str(INDEX).unwrap();
        let platforms = index.platforms();
        assert_eq!(platforms.len(), 2);
        assert_eq!(platforms[1].to_string(), "linux/arm64/v8");
    }

    #[test]
    fn test_index_find_by_platform() {
        let index: OCIIndex = serde_json::from_str(INDEX).unwrap();
        let found = index.find(&"linux/arm64".parse().unwrap()).unwrap();
        assert_eq!(found.digest, "sha256:bb");
        assert!(index.find(&"linux/s390x".parse().unwrap()).is_none());
    }

    #[test]
    fn test_manifest_without_media_type_parses() {
        let manifest: OCIManifest = serde_json::from_str(
            r#"{"schemaVersion":2,"config":{"mediaType":"application/vnd.oci.image.config.v1+json","digest":"sha256:aa","size":2},"layers":[]}"#,
        )
        .unwrap();
        assert!(manifest.media_type.is_empty());
        let out = serde_json::to_string(&manifest).unwrap();
        assert!(!out.contains("mediaType\":\"\""));
    }
}
