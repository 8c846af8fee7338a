//! Publishing build results to a registry.

pub mod noop;
pub mod registry;

pub use noop::NoopPublisher;
pub use registry::{reference_for, RegistryPublisher};

use crate::build::BuildResult;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `result` built from `import_path`, returning the reference
    /// substituted for the directive
    async fn publish(&self, result: &BuildResult, import_path: &str) -> Result<String>;
}
