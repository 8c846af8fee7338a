//! Pure policies mapping (repository, import path) to an image name.

use crate::build::strip_scheme;
use crate::error::{Error, Result};
use crate::oci::digest::sha256_string;
use crate::oci::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamingPolicy {
    /// The repository itself
    Bare,
    /// `<repo>/<import path>`
    PreserveImportPath,
    /// `<repo>/<last element>-<hash of import path>`
    Hashed,
}

impl NamingPolicy {
    pub fn name(&self, repository: &str, import_path: &str) -> Result<String> {
        let repository = repository.trim().trim_end_matches('/');
        let import_path = strip_scheme(import_path);
        let name = match self {
            NamingPolicy::Bare => repository.to_string(),
            NamingPolicy::PreserveImportPath => {
                let path: Vec<String> = import_path
                    .split('/')
                    .filter(|c| !c.is_empty() && *c != ".")
                    .map(|c| c.to_ascii_lowercase())
                    .collect();
                if path.is_empty() {
                    repository.to_string()
                } else {
                    format!("{}/{}", repository, path.join("/"))
                }
            }
            NamingPolicy::Hashed => format!("{}/{}", repository, hashed_name(import_path)),
        };
        Repository::parse(&name).map_err(|e| Error::InvalidName {
            name: name.clone(),
            reason: match e {
                Error::InvalidReference { reason, .. } => reason,
                other => other.to_string(),
            },
        })?;
        Ok(name)
    }
}

fn hashed_name(import_path: &str) -> String {
    let last = import_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let sanitized: String = last
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let sanitized = sanitized.trim_matches('-');
    let hash = sha256_string(import_path);
    if sanitized.is_empty() {
        hash[..32].to_string()
    } else {
        format!("{}-{}", sanitized, &hash[..32])
    }
}
