//! Document scanning and entity building.
//!
//! This module turns the text of a single document into a [`Document`](crate::properties::Document)
//! without looking at any other document of the build.
//!
//! ## Key Components
//!
//! - [`DirectiveParser`] - line scanner producing a [`RawDocument`] tree of `:::kind{...}` blocks
//! - [`EntityBuilder`] - maps raw nodes onto the closed kind set, checking each kind's schema
//! - [`SchemaRegistry`](schema_registry::SchemaRegistry) - per-kind attribute, section and
//!   child rules (accessible via [`SCHEMAS`])
//! - [`Diagnostic`] / [`DiagnosticSink`] - problems reported as data, never as `Err`
//!
//! ## Directive Syntax
//!
//! ```markdown
//! ---
//! documentId: analysis
//! provenance:
//!   extraction: { method: ocr, confidence: 0.92 }
//! ---
//!
//! :::figure_block{#fig-arch src="arch.png" alt="Architecture"}
//! ::caption
//! System architecture.
//! :::
//!
//! As shown in [the figure](#fig-arch) and [entropy](definitions.md#term-entropy).
//! ```
//!
//! ```rust
//! use vera_core::codec::{builder::build, directive::parse};
//!
//! let (raw, syntax) = parse(":::theorem{#thm-main}\nBounded.\n:::\n[T1](#thm-main)\n");
//! assert!(syntax.is_empty());
//! let (document, schema) = build(raw, "notes.md");
//! assert!(schema.is_empty());
//! assert_eq!(document.entities[0].local_id.as_deref(), Some("thm-main"));
//! assert_eq!(document.references[0].target, "thm-main");
//! ```

pub mod attributes;
pub mod builder;
pub mod diagnostic;
pub mod directive;
pub mod frontmatter;
pub mod md;
pub mod schema_registry;

pub use builder::EntityBuilder;
pub use diagnostic::{Diagnostic, DiagnosticClass, DiagnosticKind, DiagnosticSink, Severity};
pub use directive::{DirectiveParser, RawDocument, RawNode};
pub use schema_registry::SCHEMAS;
