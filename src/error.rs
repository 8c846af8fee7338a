/// ocipress error types and handling utilities
use crate::constants::TRANSIENT_MANIFEST_CODES;
use serde::Deserialize;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for ocipress operations
#[derive(Debug, Error)]
pub enum Error {
    /// No repository could be resolved from any configuration source
    #[error("one of KO_DOCKER_REPO env var, or provider `repo`, or resource `repo` must be set")]
    MissingRepository,

    #[error("invalid sbom type: {0:?} (expected one of spdx, cyclonedx, go.version-m, none)")]
    InvalidSbom(String),

    #[error("the environment variable SOURCE_DATE_EPOCH should be the number of seconds since January 1st 1970, 00:00 UTC, got: {0:?}")]
    InvalidEpoch(String),

    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("invalid platform {0:?}: expected all | <os>[/<arch>[/<variant>]]")]
    InvalidPlatform(String),

    #[error("invalid label selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid image name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("package not found: {import_path}: {reason}")]
    PackageNotFound { import_path: String, reason: String },

    #[error("compiling {import_path} for {platform}: {reason}")]
    CompilationFailed {
        import_path: String,
        platform: String,
        reason: String,
    },

    #[error("unexpected base image media type: {0}")]
    UnsupportedMediaType(String),

    #[error("base image {base} has no image for platform {platform}")]
    PlatformNotFound { base: String, platform: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("reading manifests from {origin}: {reason}")]
    Manifest { origin: String, reason: String },

    /// An error annotated with the operation it happened in
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping context annotations
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root(),
            Error::MissingRepository
                | Error::InvalidSbom(_)
                | Error::InvalidEpoch(_)
                | Error::InvalidReference { .. }
                | Error::InvalidPlatform(_)
                | Error::InvalidSelector { .. }
                | Error::InvalidName { .. }
                | Error::Config(_)
        )
    }
}

/// Extension for attaching operation context to fallible results
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

/// One entry of a distribution-API error response body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryErrorDetail {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RegistryErrorBody {
    #[serde(default)]
    errors: Vec<RegistryErrorDetail>,
}

/// Errors reported by a registry or the transport talking to it
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("{method} {url}: unexpected status {status}{}", describe_details(.errors))]
    Status {
        method: String,
        url: String,
        status: u16,
        errors: Vec<RegistryErrorDetail>,
    },

    #[error("authenticating to {registry}: {reason}")]
    Auth { registry: String, reason: String },

    #[error("registry transport error: {0}")]
    Transport(String),

    #[error("malformed registry response from {url}: {reason}")]
    Protocol { url: String, reason: String },
}

impl RegistryError {
    /// Builds a status error, decoding the structured error list when present
    pub fn from_response(method: &str, url: &str, status: u16, body: &[u8]) -> Self {
        let errors = serde_json::from_slice::<RegistryErrorBody>(body)
            .map(|b| b.errors)
            .unwrap_or_default();
        RegistryError::Status {
            method: method.to_string(),
            url: url.to_string(),
            status,
            errors,
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        match self {
            RegistryError::Status { errors, .. } => errors.iter().any(|e| e.code == code),
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn describe_details(errors: &[RegistryErrorDetail]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = errors
        .iter()
        .map(|e| {
            if e.message.is_empty() {
                e.code.clone()
            } else {
                format!("{}: {}", e.code, e.message)
            }
        })
        .collect();
    format!(" ({})", parts.join("; "))
}

/// Reports whether a registry error is the blob-propagation window after an upload
pub fn is_transient_registry_error(err: &RegistryError) -> bool {
    TRANSIENT_MANIFEST_CODES.iter().any(|code| err.has_code(code))
}

/// Helper to determine if an error is worth retrying
pub fn is_transient(err: &Error) -> bool {
    match err.root() {
        Error::Registry(e) => is_transient_registry_error(e),
        _ => false,
    }
}
