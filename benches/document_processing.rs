//! Performance benchmarks for document processing
//!
//! These benchmarks measure:
//! - Directive parsing of a single large document
//! - Sequential compilation of the test corpus
//! - Concurrent compilation of a generated multi-document build
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::PathBuf;
use vera_core::{
    codec::{DiagnosticSink, DirectiveParser},
    compiler::{discover, DocumentCompiler, SourceDocument},
    config::BuildConfig,
};

// One document with `count` theorems, each with a proof, a figure and a backward reference.
fn generated_document(count: usize) -> String {
    let mut text = String::from("---\ndocumentId: generated\n---\n\n# Generated\n\n");
    for idx in 0..count {
        text.push_str(&format!(
            ":::theorem{{#thm-{idx}}}\n::statement\nClaim {idx}.\n:::\n\
             :::proof\nSee [the previous result](#thm-{prev}).\n:::\n\
             :::figure{{#fig-{idx} src=\"fig-{idx}.png\"}}\n::caption\nFigure {idx}.\n:::\n\n",
            prev = idx.saturating_sub(1)
        ));
    }
    text
}

// `count` documents that each reference a definition in the next one.
fn generated_build(count: usize) -> Vec<SourceDocument> {
    (0..count)
        .map(|idx| {
            SourceDocument::new(
                format!("doc-{idx}.md"),
                format!(
                    ":::term_def{{#term-{idx}}}\nTerm {idx}.\n:::\n\
                     Uses [the next term](doc-{next}.md#term-{next}).\n",
                    next = (idx + 1) % count
                ),
            )
        })
        .collect()
}

fn bench_parse_document(c: &mut Criterion) {
    let text = generated_document(500);
    let parser = DirectiveParser::default();

    c.bench_function("parse_document", |b| {
        b.iter(|| {
            let mut sink = DiagnosticSink::new("generated");
            let raw = parser.parse(&text, &mut sink);
            raw.nodes.len()
        });
    });
}

fn bench_compile_corpus(c: &mut Criterion) {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/corpus");
    let config = BuildConfig::load_or_default(&root).unwrap();
    let sources = discover(&root, &config).unwrap();
    let compiler = DocumentCompiler::new(config);

    c.bench_function("compile_corpus", |b| {
        b.iter(|| compiler.compile_sequential(&sources).diagnostics.len());
    });
}

fn bench_compile_concurrent(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let compiler = DocumentCompiler::default();
    let mut group = c.benchmark_group("compile_concurrent");

    for count in [10usize, 100] {
        let sources = generated_build(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &sources, |b, sources| {
            b.to_async(&rt).iter(|| async {
                let report = compiler.compile(sources.clone()).await.unwrap();
                report.graph.map(|graph| graph.edges().len())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_parse_document,
    bench_compile_corpus,
    bench_compile_concurrent
);
criterion_main!(benches);
