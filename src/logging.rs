use std::io;
/// Structured logging utilities for ocipress
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Initialize structured logging with optional JSON output
pub fn init_logging(json_output: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ocipress=info"));

    let registry = Registry::default().with(env_filter);

    if json_output {
        // JSON output for log aggregation by the host process
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    }

    Ok(())
}

/// Shortens a digest or hash for log output
pub fn short_digest(digest: &str) -> &str {
    let hex = digest.split_once(':').map(|(_, h)| h).unwrap_or(digest);
    &hex[..12.min(hex.len())]
}

#[macro_export]
macro_rules! log_cache_hit {
    ($kind:expr, $key:expr) => {
        tracing::debug!(kind = $kind, key = %$key, "Cache hit");
    };
}

#[macro_export]
macro_rules! log_cache_miss {
    ($kind:expr, $key:expr) => {
        tracing::debug!(kind = $kind, key = %$key, "Cache miss");
    };
}

#[macro_export]
macro_rules! log_build_start {
    ($import_path:expr, $platforms:expr) => {
        tracing::info!(importpath = %$import_path, platforms = %$platforms, "Build started");
    };
}

#[macro_export]
macro_rules! log_build_complete {
    ($import_path:expr, $digest:expr, $duration_ms:expr) => {
        tracing::info!(
            importpath = %$import_path,
            digest = %$crate::logging::short_digest(&$digest),
            duration_ms = $duration_ms,
            "Build completed"
        );
    };
}

#[macro_export]
macro_rules! log_registry_operation {
    ($operation:expr, $target:expr, $duration_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            subject = %$target,
            duration_ms = $duration_ms,
            "Registry operation completed"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_digest_strips_algorithm() {
        let digest = "sha256:abc123def456abc123def456";
        assert_eq!(short_digest(digest), "abc123def456");
    }

    #[test]
    fn test_short_digest_handles_short_values() {
        assert_eq!(short_digest("abc"), "abc");
        assert_eq!(short_digest("sha256:"), "");
    }
}
