// Centralized constants for ocipress to avoid magic numbers

/// Base image used when neither the resource nor the provider names one
pub const DEFAULT_BASE_IMAGE: &str = "cgr.dev/chainguard/static";

/// Platform built when the platform list is empty
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// Working directory used when none is configured
pub const DEFAULT_WORKING_DIR: &str = ".";

/// User agent sent with every registry request
pub const USER_AGENT: &str = concat!("ocipress/", env!("CARGO_PKG_VERSION"));

/// Scheme marking a string in a manifest as a build directive
pub const DIRECTIVE_SCHEME: &str = "ko://";

/// Environment variable holding the default container repository
pub const ENV_DOCKER_REPO: &str = "KO_DOCKER_REPO";

/// Environment variable holding the reproducible-build timestamp
pub const ENV_SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// Environment variable pointing at the Go toolchain binary
pub const ENV_GO_PATH: &str = "KO_GO_PATH";

/// Manifest pushes are attempted at most this many times
pub const PUBLISH_MAX_ATTEMPTS: u32 = 3;

/// Fixed delay between manifest push attempts in milliseconds
pub const PUBLISH_RETRY_DELAY_MS: u64 = 1000;

/// Registry error codes that signal blobs have not yet propagated
pub const TRANSIENT_MANIFEST_CODES: &[&str] = &["MANIFEST_INVALID", "MANIFEST_BLOB_UNKNOWN"];

/// Sentinel reference reported when a read-time build fails
pub const ZERO_REFERENCE: &str =
    "example.com/zero@sha256:0000000000000000000000000000000000000000000000000000000000000000";

/// Directory the application binary is placed in
pub const APP_DIR: &str = "/ko-app";

/// Directory static `kodata` files are placed in
pub const KO_DATA_PATH: &str = "/var/run/ko";

/// Name of the static data directory next to a main package
pub const KO_DATA_DIR: &str = "kodata";

/// Longest repository path a registry accepts
pub const MAX_REPOSITORY_LENGTH: usize = 255;

/// Separator between documents of a multi-document YAML stream
pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// Registry host used for references without an explicit registry
pub const DOCKER_HUB_REGISTRY: &str = "index.docker.io";

/// Timeout for cloud metadata credential lookups in milliseconds
pub const METADATA_TIMEOUT_MS: u64 = 2000;
