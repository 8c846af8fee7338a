use criterion::{criterion_group, criterion_main, Criterion};
use ocipress::build::is_directive;
use ocipress::resolve::normalize;
use ocipress::resolve::rewrite::collect_directives;
use ocipress::resolve::{ManifestResolver, Selector, Source};
use std::hint::black_box;

fn manifest_stream(documents: usize) -> String {
    (0..documents)
        .map(|i| {
            format!(
                "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: app-{i}\n  labels:\n    app: app-{i}\nspec:\n  template:\n    spec:\n      containers:\n        - name: app\n          image: ko://example.com/cmd/app-{}\n",
                i % 10
            )
        })
        .collect::<Vec<_>>()
        .join("---\n")
}

fn bench_normalize(c: &mut Criterion) {
    let stream = manifest_stream(200);
    c.bench_function("normalize 200 documents", |b| {
        b.iter(|| {
            let documents = normalize::normalize(black_box(&stream), "bench").unwrap();
            normalize::identity(&documents)
        })
    });
}

fn bench_collect_directives(c: &mut Criterion) {
    let documents = normalize::split_documents(&manifest_stream(200), "bench").unwrap();
    c.bench_function("collect directives", |b| {
        b.iter(|| {
            let mut found = Vec::new();
            for document in &documents {
                collect_directives(black_box(document), &is_directive, &mut found);
            }
            found
        })
    });
}

fn bench_dry_resolve(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let sources = vec![Source {
        origin: "bench".to_string(),
        content: manifest_stream(200),
    }];
    c.bench_function("dry resolve", |b| {
        b.iter(|| {
            runtime
                .block_on(ManifestResolver::dry().resolve_sources(black_box(&sources), &Selector::everything()))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_normalize, bench_collect_directives, bench_dry_resolve);
criterion_main!(benches);
