mod common;

use common::{seed_base_image, StubCompiler, BASE};
use ocipress::constants::ZERO_REFERENCE;
use ocipress::error::Error;
use ocipress::namer::NamingPolicy;
use ocipress::oci::Repository;
use ocipress::options::PartialOptions;
use ocipress::registry::MemoryRegistry;
use ocipress::resolve::FilenameOptions;
use ocipress::resource::{
    dry_resolve, BuildResourceConfig, Provider, ProviderConfig, ResolveResourceConfig, Severity,
};
use ocipress::retry::RetryPolicy;
use std::sync::Arc;
use tempfile::TempDir;

const DEPLOYMENT: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  labels:
    app: web
spec:
  template:
    spec:
      containers:
        - name: web
          image: ko://example.com/cmd/web
        - name: sidecar
          image: ko://example.com/cmd/sidecar
---
apiVersion: batch/v1
kind: Job
metadata:
  name: migrate
  labels:
    app: db
spec:
  template:
    spec:
      containers:
        - name: migrate
          image: ko://example.com/cmd/web
"#;

struct Fixture {
    registry: Arc<MemoryRegistry>,
    compiler: Arc<StubCompiler>,
    provider: Provider,
}

fn fixture(repo: &str) -> Fixture {
    let registry = Arc::new(MemoryRegistry::new());
    seed_base_image(&registry, BASE);
    let compiler = Arc::new(StubCompiler::default());
    let provider = Provider::configure(&ProviderConfig {
        repo: Some(repo.to_string()),
        ..Default::default()
    })
    .unwrap()
    .with_environment(PartialOptions::default())
    .with_registry(registry.clone())
    .with_compiler(compiler.clone())
    .with_retry_policy(RetryPolicy::none());
    Fixture {
        registry,
        compiler,
        provider,
    }
}

fn build_config(importpath: &str) -> BuildResourceConfig {
    BuildResourceConfig {
        base_image: Some(BASE.to_string()),
        sbom: Some("none".to_string()),
        ..BuildResourceConfig::new(importpath)
    }
}

fn manifests_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.yaml"), DEPLOYMENT).unwrap();
    dir
}

fn resolve_config(dir: &TempDir) -> ResolveResourceConfig {
    ResolveResourceConfig {
        filenames: vec![dir.path().display().to_string()],
        base_image: Some(BASE.to_string()),
        sbom: Some("none".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_build_preserves_import_path() {
    let f = fixture("registry.example.com/team");
    let state = f.provider.create_build(&build_config("example.com/cmd/web")).await.unwrap();
    assert!(state
        .image_ref
        .starts_with("registry.example.com/team/example.com/cmd/web@sha256:"));
    assert_eq!(state.id, state.image_ref);
}

#[tokio::test]
async fn test_resource_repo_is_used_verbatim() {
    let f = fixture("registry.example.com/team");
    let config = BuildResourceConfig {
        repo: Some("registry.example.com/exact".to_string()),
        ..build_config("example.com/cmd/web")
    };
    let first = f.provider.create_build(&config).await.unwrap();
    let second = f
        .provider
        .create_build(&BuildResourceConfig {
            ldflags: vec!["-X main.version=2".to_string()],
            ..config
        })
        .await
        .unwrap();

    let name = |reference: &str| reference.split('@').next().unwrap().to_string();
    assert_eq!(name(&first.image_ref), "registry.example.com/exact");
    assert_eq!(name(&second.image_ref), name(&first.image_ref));
    assert_ne!(first.image_ref, second.image_ref);
}

#[tokio::test]
async fn test_single_tag_reference_is_opt_in() {
    let f = fixture("registry.example.com/team");
    let config = BuildResourceConfig {
        tags: vec!["v1".to_string()],
        ..build_config("example.com/cmd/web")
    };
    let plain = f.provider.create_build(&config).await.unwrap();
    assert!(plain
        .image_ref
        .starts_with("registry.example.com/team/example.com/cmd/web@sha256:"));

    let tagged = f
        .provider
        .create_build(&BuildResourceConfig {
            tag_reference: true,
            ..config
        })
        .await
        .unwrap();
    assert!(tagged
        .image_ref
        .starts_with("registry.example.com/team/example.com/cmd/web:v1@sha256:"));
}

#[tokio::test]
async fn test_read_build_matches_create() {
    let f = fixture("registry.example.com/team");
    let config = build_config("example.com/cmd/web");
    let created = f.provider.create_build(&config).await.unwrap();
    let puts = f.registry.manifest_puts();

    let outcome = f.provider.read_build(&config, &created).await.unwrap();
    assert_eq!(outcome.state, created);
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(f.registry.manifest_puts(), puts);
}

#[tokio::test]
async fn test_read_build_clears_id_on_drift() {
    let f = fixture("registry.example.com/team");
    let created = f.provider.create_build(&build_config("example.com/cmd/web")).await.unwrap();

    let changed = BuildResourceConfig {
        ldflags: vec!["-s".to_string()],
        ..build_config("example.com/cmd/web")
    };
    let outcome = f.provider.read_build(&changed, &created).await.unwrap();
    assert!(outcome.state.id.is_empty());
    assert_ne!(outcome.state.image_ref, created.image_ref);
}

#[tokio::test]
async fn test_read_build_failure_is_softened() {
    let f = fixture("registry.example.com/team");
    let created = f.provider.create_build(&build_config("example.com/cmd/web")).await.unwrap();

    let outcome = f
        .provider
        .read_build(&build_config("example.com/cmd/missing"), &created)
        .await
        .unwrap();
    assert_eq!(outcome.state.image_ref, ZERO_REFERENCE);
    assert!(outcome.state.id.is_empty());
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].severity, Severity::Warning);
    assert!(outcome.diagnostics[0].detail.contains("example.com/cmd/missing"));
}

#[tokio::test]
async fn test_create_build_without_repository_fails() {
    let registry = Arc::new(MemoryRegistry::new());
    let provider = Provider::configure(&ProviderConfig::default())
        .unwrap()
        .with_environment(PartialOptions::default())
        .with_registry(registry)
        .with_compiler(Arc::new(StubCompiler::default()));
    let err = provider
        .create_build(&build_config("example.com/cmd/web"))
        .await
        .unwrap_err();
    assert!(matches!(err.root(), Error::MissingRepository));
}

#[tokio::test]
async fn test_resolve_builds_each_directive_once() {
    let f = fixture("registry.example.com/team");
    let dir = manifests_dir();
    let state = f.provider.create_resolve(&resolve_config(&dir)).await.unwrap();

    assert_eq!(state.manifests.len(), 2);
    assert_eq!(state.id.len(), 64);
    for manifest in &state.manifests {
        assert!(!manifest.contains("ko://"));
        assert!(manifest.contains("registry.example.com/team/web-"));
    }
    assert_eq!(f.compiler.compiles(), 2);
}

#[tokio::test]
async fn test_resolve_with_selector() {
    let f = fixture("registry.example.com/team");
    let dir = manifests_dir();
    let config = ResolveResourceConfig {
        selector: Some("app=db".to_string()),
        ..resolve_config(&dir)
    };
    let state = f.provider.create_resolve(&config).await.unwrap();
    assert_eq!(state.manifests.len(), 1);
    assert!(state.manifests[0].contains("kind: Job"));
    assert_eq!(f.compiler.compiles(), 1);
}

#[tokio::test]
async fn test_read_resolve_does_not_move_tags() {
    let f = fixture("registry.example.com/team");
    let dir = manifests_dir();
    let config = ResolveResourceConfig {
        tags: vec!["release".to_string()],
        repo: Some("registry.example.com/app".to_string()),
        ..resolve_config(&dir)
    };
    let created = f.provider.create_resolve(&config).await.unwrap();
    let name = NamingPolicy::Hashed
        .name("registry.example.com/app", "example.com/cmd/web")
        .unwrap();
    let repository = Repository::parse(&name).unwrap();
    let tagged = f.registry.manifest(&repository, "release").unwrap();

    let read = f.provider.read_resolve(&config).await.unwrap();
    assert_eq!(read.state, created);
    assert_eq!(f.registry.manifest(&repository, "release").unwrap(), tagged);
}

#[tokio::test]
async fn test_resolve_repo_keeps_one_repository_per_import_path() {
    let f = fixture("registry.example.com/team");
    let dir = manifests_dir();
    let config = ResolveResourceConfig {
        tags: vec!["release".to_string()],
        repo: Some("registry.example.com/app".to_string()),
        ..resolve_config(&dir)
    };
    let state = f.provider.create_resolve(&config).await.unwrap();

    let mut digests = Vec::new();
    for import_path in ["example.com/cmd/web", "example.com/cmd/sidecar"] {
        let name = NamingPolicy::Hashed.name("registry.example.com/app", import_path).unwrap();
        assert!(state.manifests[0].contains(&format!("{}@sha256:", name)));
        let repository = Repository::parse(&name).unwrap();
        digests.push(f.registry.manifest(&repository, "release").unwrap().digest);
    }
    assert_ne!(digests[0], digests[1]);
    assert!(f
        .registry
        .manifest(&Repository::parse("registry.example.com/app").unwrap(), "release")
        .is_none());
}

#[tokio::test]
async fn test_resolve_without_push_leaves_the_registry_alone() {
    let f = fixture("registry.example.com/team");
    let dir = manifests_dir();
    let config = ResolveResourceConfig {
        push: Some(false),
        ..resolve_config(&dir)
    };
    let unpushed = f.provider.create_resolve(&config).await.unwrap();
    assert_eq!(f.registry.manifest_puts(), 0);
    assert_eq!(f.registry.blob_uploads(), 0);
    for manifest in &unpushed.manifests {
        assert!(manifest.contains("registry.example.com/team/web-"));
        assert!(manifest.contains("@sha256:"));
    }

    let pushed = f.provider.create_resolve(&resolve_config(&dir)).await.unwrap();
    assert_eq!(pushed, unpushed);
    assert!(f.registry.manifest_puts() > 0);
}

#[tokio::test]
async fn test_resolve_identity_is_stable() {
    let f = fixture("registry.example.com/team");
    let dir = manifests_dir();
    let first = f.provider.create_resolve(&resolve_config(&dir)).await.unwrap();
    let second = f.provider.update_resolve(&resolve_config(&dir)).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_dry_resolve_needs_no_repository() {
    let dir = manifests_dir();
    let files = FilenameOptions {
        filenames: vec![dir.path().join("app.yaml").display().to_string()],
        recursive: false,
    };
    let state = dry_resolve(&files, "").await.unwrap();
    assert_eq!(state.manifests.len(), 2);
    assert!(state.manifests[0].contains("image: example.com/cmd/web"));
    assert!(state.manifests[0].contains("image: example.com/cmd/sidecar"));
}
