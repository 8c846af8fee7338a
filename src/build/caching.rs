use crate::build::{strip_scheme, BuildResult, Builder};
use crate::error::Result;
use crate::{log_cache_hit, log_cache_miss};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Memoises builds by import path. Concurrent callers for the same path
/// share one build; failures are not remembered.
pub struct CachingBuilder {
    inner: Arc<dyn Builder>,
    results: Mutex<HashMap<String, Arc<OnceCell<Arc<BuildResult>>>>>,
}

impl CachingBuilder {
    pub fn new(inner: Arc<dyn Builder>) -> Self {
        Self {
            inner,
            results: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Builder for CachingBuilder {
    async fn build(&self, import_path: &str) -> Result<Arc<BuildResult>> {
        let key = strip_scheme(import_path).to_string();
        let cell = {
            let mut results = self.results.lock();
            results.entry(key.clone()).or_default().clone()
        };
        if let Some(result) = cell.get() {
            log_cache_hit!("build", key);
            return Ok(result.clone());
        }
        log_cache_miss!("build", key);
        let result = cell
            .get_or_try_init(|| self.inner.build(&key))
            .await?;
        Ok(result.clone())
    }

    fn is_supported_reference(&self, value: &str) -> bool {
        self.inner.is_supported_reference(value)
    }
}
