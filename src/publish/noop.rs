use crate::build::BuildResult;
use crate::error::Result;
use crate::options::PublishOptions;
use crate::publish::{reference_for, Publisher};
use async_trait::async_trait;

/// Publishes nothing. Without options the import path is handed back
/// unchanged; with options it reports the reference a push would produce.
#[derive(Debug, Default, Clone)]
pub struct NoopPublisher {
    options: Option<PublishOptions>,
}

impl NoopPublisher {
    pub fn with_options(options: PublishOptions) -> Self {
        Self { options: Some(options) }
    }
}

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, result: &BuildResult, import_path: &str) -> Result<String> {
        match &self.options {
            Some(options) => reference_for(result, import_path, options),
            None => Ok(import_path.to_string()),
        }
    }
}
