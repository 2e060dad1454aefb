//! Shared test utilities for pipeline testing

use crate::{
    codec::{builder::EntityBuilder, diagnostic::Diagnostic, directive::DirectiveParser},
    compiler::{process_document, DocumentCompiler, SourceDocument},
    properties::Document,
    validator::BuildReport,
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Parse and build a single document with the default configuration.
pub fn build_document(path: &str, text: &str) -> (Document, Vec<Diagnostic>) {
    process_document(
        &SourceDocument::new(path, text),
        &DirectiveParser::default(),
        &EntityBuilder::default(),
    )
}

/// Run the whole pipeline over `(path, text)` pairs on the calling thread.
pub fn compile(documents: &[(&str, &str)]) -> BuildReport {
    init_logging();
    let sources: Vec<SourceDocument> = documents
        .iter()
        .map(|(path, text)| SourceDocument::new(*path, *text))
        .collect();
    DocumentCompiler::default().compile_sequential(&sources)
}

/// Diagnostic kind strings in report order, for compact assertions.
pub fn kinds(report: &BuildReport) -> Vec<&'static str> {
    report
        .diagnostics
        .iter()
        .map(|diagnostic| diagnostic.kind.as_str())
        .collect()
}
