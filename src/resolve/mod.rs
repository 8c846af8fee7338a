//! Resolving manifest streams: every `ko://` directive is built, published
//! and replaced by the resulting reference.

pub mod files;
pub mod normalize;
pub mod rewrite;
pub mod selector;

pub use files::{FilenameOptions, Source};
pub use selector::Selector;

use crate::build::{strip_scheme, Builder, CachingBuilder, NoopBuilder};
use crate::error::{Result, ResultExt};
use crate::publish::{NoopPublisher, Publisher};
use futures::future::try_join_all;
use serde_yaml::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Normalised manifests and their content identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: String,
    pub manifests: Vec<String>,
}

impl Resolved {
    /// Normalises a combined stream and derives its identity
    pub fn from_stream(stream: &str) -> Result<Self> {
        let manifests = normalize::normalize(stream, "resolved manifests")?;
        Ok(Self {
            id: normalize::identity(&manifests),
            manifests,
        })
    }
}

pub struct ManifestResolver {
    builder: CachingBuilder,
    publisher: Arc<dyn Publisher>,
}

impl ManifestResolver {
    pub fn new(builder: Arc<dyn Builder>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            builder: CachingBuilder::new(builder),
            publisher,
        }
    }

    /// Leaves directives as bare import paths without building anything
    pub fn dry() -> Self {
        Self::new(Arc::new(NoopBuilder), Arc::new(NoopPublisher::default()))
    }

    pub async fn resolve(&self, files: &FilenameOptions, selector: &Selector) -> Result<Resolved> {
        let sources = files::read_sources(files).await?;
        self.resolve_sources(&sources, selector).await
    }

    pub async fn resolve_sources(&self, sources: &[Source], selector: &Selector) -> Result<Resolved> {
        let start = Instant::now();
        let mut documents: Vec<Value> = Vec::new();
        for source in sources {
            for document in normalize::split_documents(&source.content, &source.origin)? {
                if selector.matches(&document) {
                    documents.push(document);
                }
            }
        }

        let is_supported = |s: &str| self.builder.is_supported_reference(s);
        let mut directives = Vec::new();
        for document in &documents {
            rewrite::collect_directives(document, &is_supported, &mut directives);
        }

        let references = try_join_all(directives.iter().map(|d| self.build_and_publish(d))).await?;
        let replacements: HashMap<String, String> = directives.into_iter().zip(references).collect();
        for document in &mut documents {
            rewrite::substitute(document, &replacements);
        }

        let combined = normalize::join_documents(&normalize::serialize_documents(&documents)?);
        let resolved = Resolved::from_stream(&combined)?;
        tracing::info!(
            documents = resolved.manifests.len(),
            images = replacements.len(),
            id = %crate::logging::short_digest(&resolved.id),
            duration_ms = start.elapsed().as_millis() as u64,
            "Resolved manifests"
        );
        Ok(resolved)
    }

    async fn build_and_publish(&self, directive: &str) -> Result<String> {
        let import_path = strip_scheme(directive);
        let result = self
            .builder
            .build(import_path)
            .await
            .with_context(|| format!("building {}", directive))?;
        self.publisher
            .publish(&result, import_path)
            .await
            .with_context(|| format!("publishing {}", directive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(content: &str) -> Source {
        Source {
            origin: "inline".to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_dry_resolve_strips_scheme() {
        let resolved = ManifestResolver::dry()
            .resolve_sources(
                &[source("image: ko://example.com/cmd/app\n---\nother: ko://example.com/cmd/app\n")],
                &Selector::everything(),
            )
            .await
            .unwrap();
        assert_eq!(resolved.manifests, vec!["image: example.com/cmd/app\n", "other: example.com/cmd/app\n"]);
        assert_eq!(resolved.id, normalize::identity(&resolved.manifests));
    }

    #[tokio::test]
    async fn test_selector_filters_before_building() {
        let stream = "metadata:\n  labels:\n    app: web\nimage: ko://example.com/web\n---\nmetadata:\n  labels:\n    app: db\nimage: ko://example.com/db\n";
        let resolved = ManifestResolver::dry()
            .resolve_sources(&[source(stream)], &Selector::parse("app=web").unwrap())
            .await
            .unwrap();
        assert_eq!(resolved.manifests.len(), 1);
        assert!(resolved.manifests[0].contains("example.com/web"));
    }

    #[tokio::test]
    async fn test_empty_input_resolves_to_nothing() {
        let resolved = ManifestResolver::dry()
            .resolve_sources(&[source("---\n---\n")], &Selector::everything())
            .await
            .unwrap();
        assert!(resolved.manifests.is_empty());
        assert_eq!(resolved.id, crate::oci::digest::sha256_string(""));
    }
}
