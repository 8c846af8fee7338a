//! Image references: `registry/repository[:tag][@digest]`.

use crate::constants::{DOCKER_HUB_REGISTRY, MAX_REPOSITORY_LENGTH};
use crate::error::{Error, Result};
use crate::oci::digest::is_valid_digest;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

fn component_regex() -> &'static Regex {
    static COMPONENT: OnceLock<Regex> = OnceLock::new();
    COMPONENT.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("static regex")
    })
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("static regex"))
}

fn invalid(reference: &str, reason: impl Into<String>) -> Error {
    Error::InvalidReference {
        reference: reference.to_string(),
        reason: reason.into(),
    }
}

/// Checks a repository path (without registry) against distribution naming rules
pub fn validate_repository_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Err("repository path is empty".to_string());
    }
    if path.len() > MAX_REPOSITORY_LENGTH {
        return Err(format!(
            "repository path is {} characters, the limit is {}",
            path.len(),
            MAX_REPOSITORY_LENGTH
        ));
    }
    for component in path.split('/') {
        if !component_regex().is_match(component) {
            return Err(format!(
                "path component {:?} must be lowercase alphanumerics separated by '.', '_', '__' or '-'",
                component
            ));
        }
    }
    Ok(())
}

/// A registry host plus repository path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
    pub registry: String,
    pub path: String,
}

impl Repository {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid(s, "empty repository"));
        }
        let (registry, path) = match s.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DOCKER_HUB_REGISTRY.to_string(), s.to_string()),
        };
        let registry = if registry == "docker.io" {
            DOCKER_HUB_REGISTRY.to_string()
        } else {
            registry
        };
        let path = if registry == DOCKER_HUB_REGISTRY && !path.contains('/') {
            format!("library/{}", path)
        } else {
            path
        };
        validate_repository_path(&path).map_err(|reason| invalid(s, reason))?;
        Ok(Self { registry, path })
    }

    /// Plain HTTP is only used for loopback registries
    pub fn scheme(&self) -> &'static str {
        let host = self.registry.split(':').next().unwrap_or_default();
        if host == "localhost" || host == "127.0.0.1" || self.registry.starts_with("[::1]") {
            "http"
        } else {
            "https"
        }
    }

    /// Base URL of the distribution API, e.g. `https://ghcr.io/v2`
    pub fn api_base(&self) -> String {
        let host = if self.registry == DOCKER_HUB_REGISTRY {
            "registry-1.docker.io"
        } else {
            self.registry.as_str()
        };
        format!("{}://{}/v2", self.scheme(), host)
    }

    pub fn with_digest(&self, digest: &str) -> ImageReference {
        ImageReference {
            repository: self.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }

    pub fn with_tag(&self, tag: &str) -> ImageReference {
        ImageReference {
            repository: self.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.path)
    }
}

/// A fully parsed image reference; identity is the digest when present
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub repository: Repository,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid(s, "empty reference"));
        }
        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                if !is_valid_digest(digest) {
                    return Err(invalid(s, format!("malformed digest {:?}", digest)));
                }
                (name, Some(digest.to_string()))
            }
            None => (s, None),
        };
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name[split + 1..];
                if !tag_regex().is_match(tag) {
                    return Err(invalid(s, format!("malformed tag {:?}", tag)));
                }
                (&name[..split], Some(tag.to_string()))
            }
            None => (name, None),
        };
        let repository = Repository::parse(name).map_err(|e| match e {
            Error::InvalidReference { reason, .. } => invalid(s, reason),
            other => other,
        })?;
        Ok(Self {
            repository,
            tag,
            digest,
        })
    }

    /// The tag or digest used to address this manifest, digest preferred
    pub fn identifier(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or("latest")
    }

    /// Two references denote the same image iff their digests match
    pub fn same_image(&self, other: &ImageReference) -> bool {
        self.repository == other.repository
            && self.digest.is_some()
            && self.digest == other.digest
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
