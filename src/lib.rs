//! # vera-core
//!
//! A Rust library that turns Markdown with typed directive blocks into a validated, cross-linked
//! knowledge graph.
//!
//! ## Overview
//!
//! Documents mark up content as typed *entities* (theorems, figures, definitions, narrative
//! blocks and so on) using `:::kind{attributes} ... :::` directives. Entities carry stable local
//! ids, provenance metadata and `[label](#id)` / `[label](path#id)` cross-references. vera-core
//! checks all of it and hands renderers a read-only [`DocumentGraph`](graph::DocumentGraph), or
//! a full list of diagnostics when something is wrong.
//!
//! ### Key Features
//!
//! - **Closed kind set**: 35 entity kinds with per-kind attribute schemas and child rules
//! - **Error tolerance**: every phase records diagnostics and keeps going, so one run reports everything
//! - **Two-pass resolution**: references may point at documents processed later in the build
//! - **Layered provenance**: frontmatter defaults, entity attributes and audit tables merged per entity
//! - **Concurrent builds**: per-document work runs in parallel around a single barrier
//!
//! ## Architecture
//!
//! - **[`codec`]**: directive parsing and entity building for a single document
//! - **[`properties`]**: entity kinds, typed payloads, documents, references, spans
//! - **[`provenance`]**: provenance records and the layer merge
//! - **[`resolver`]**: the symbol table and reference binding
//! - **[`validator`]**: semantic checks and the [`BuildReport`](validator::BuildReport)
//! - **[`graph`]**: the validated graph with backlink queries and JSON export
//! - **[`compiler`]**: build orchestration and directory discovery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use vera_core::compiler::DocumentCompiler;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = Path::new("./docs");
//!     let compiler = DocumentCompiler::for_root(root)?;
//!     let report = compiler.compile_directory(root).await?;
//!
//!     // Warnings and errors are always reported, the graph only on success.
//!     println!("{report}");
//!     if let Some(graph) = &report.graph {
//!         println!("{}", graph.to_json_string()?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### In-memory Builds
//!
//! ```rust
//! use vera_core::{
//!     codec::DiagnosticKind,
//!     compiler::{DocumentCompiler, SourceDocument},
//! };
//!
//! let sources = vec![
//!     SourceDocument::new("definitions.md", ":::term_def{#term-entropy}\nH(X).\n:::\n"),
//!     SourceDocument::new("analysis.md", "See [entropy](definitions.md#term-entropy) and [T5](#thm-5).\n"),
//! ];
//! let report = DocumentCompiler::default().compile_sequential(&sources);
//! assert!(!report.succeeded());
//! assert_eq!(report.diagnostics[0].kind, DiagnosticKind::UnresolvedReference);
//! ```

pub mod codec;
pub mod compiler;
pub mod config;
pub mod error;
pub mod graph;
pub mod properties;
pub mod provenance;
pub mod resolver;
pub mod validator;

#[cfg(test)]
pub mod tests;

pub use error::VeraError;
