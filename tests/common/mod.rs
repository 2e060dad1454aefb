//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vera_core::compiler::SourceDocument;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// The checked-in corpus under `tests/corpus`.
#[allow(dead_code)]
pub fn corpus_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/corpus")
}

/// Copy the corpus into a fresh temp directory so tests can add or break files.
#[allow(dead_code)]
pub fn copy_corpus() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    copy_dir_recursive(&corpus_root(), temp_dir.path()).unwrap();
    temp_dir
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    if !dst.exists() {
        std::fs::create_dir_all(dst)?;
    }
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// `(path, text)` pairs as build inputs.
#[allow(dead_code)]
pub fn sources(documents: &[(&str, &str)]) -> Vec<SourceDocument> {
    documents
        .iter()
        .map(|(path, text)| SourceDocument::new(*path, *text))
        .collect()
}
