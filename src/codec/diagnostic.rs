//! Diagnostic types for directive parsing, entity building, resolution and validation.
//!
//! Every problem found in document content is a [`Diagnostic`]: phases record them and keep
//! going, so one build surfaces the full set. Diagnostics carry a stable kind string (see
//! [`DiagnosticKind::as_str`]) and enough location data for an external tool to draw inline
//! markers without re-parsing.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::properties::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fails the build; the graph is withheld.
    Error,
    /// Reported, but the graph is still returned.
    Warning,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// The error taxonomy a diagnostic kind belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticClass {
    Syntax,
    Schema,
    DuplicateId,
    Reference,
    Provenance,
    Semantic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    // Syntax
    UnbalancedCloser,
    UnclosedDirective,
    MalformedDirective,
    MalformedAttributes,
    NestingTooDeep,
    MalformedFrontmatter,
    // Schema
    UnknownKind,
    MissingAttribute,
    InvalidAttribute,
    DisallowedChild,
    UnknownAttribute,
    DuplicateAttribute,
    UnexpectedSection,
    // Duplicates
    DuplicateId,
    DuplicateDocument,
    // References
    UnresolvedReference,
    UnknownDocument,
    AmbiguousIdentifier,
    AliasShadowed,
    // Provenance
    ConfidenceOutOfRange,
    MalformedProvenance,
    // Semantic completeness
    UnprovedClaim,
    LowConfidence,
}

impl DiagnosticKind {
    /// Stable identifier for tooling.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::UnbalancedCloser => "unbalanced-closer",
            DiagnosticKind::UnclosedDirective => "unclosed-directive",
            DiagnosticKind::MalformedDirective => "malformed-directive",
            DiagnosticKind::MalformedAttributes => "malformed-attributes",
            DiagnosticKind::NestingTooDeep => "nesting-too-deep",
            DiagnosticKind::MalformedFrontmatter => "malformed-frontmatter",
            DiagnosticKind::UnknownKind => "unknown-kind",
            DiagnosticKind::MissingAttribute => "missing-attribute",
            DiagnosticKind::InvalidAttribute => "invalid-attribute",
            DiagnosticKind::DisallowedChild => "disallowed-child",
            DiagnosticKind::UnknownAttribute => "unknown-attribute",
            DiagnosticKind::DuplicateAttribute => "duplicate-attribute",
            DiagnosticKind::UnexpectedSection => "unexpected-section",
            DiagnosticKind::DuplicateId => "duplicate-id",
            DiagnosticKind::DuplicateDocument => "duplicate-document",
            DiagnosticKind::UnresolvedReference => "unresolved-reference",
            DiagnosticKind::UnknownDocument => "unknown-document",
            DiagnosticKind::AmbiguousIdentifier => "ambiguous-identifier",
            DiagnosticKind::AliasShadowed => "alias-shadowed",
            DiagnosticKind::ConfidenceOutOfRange => "confidence-out-of-range",
            DiagnosticKind::MalformedProvenance => "malformed-provenance",
            DiagnosticKind::UnprovedClaim => "unproved-claim",
            DiagnosticKind::LowConfidence => "low-confidence",
        }
    }

    pub fn class(&self) -> DiagnosticClass {
        match self {
            DiagnosticKind::UnbalancedCloser
            | DiagnosticKind::UnclosedDirective
            | DiagnosticKind::MalformedDirective
            | DiagnosticKind::MalformedAttributes
            | DiagnosticKind::NestingTooDeep
            | DiagnosticKind::MalformedFrontmatter => DiagnosticClass::Syntax,
            DiagnosticKind::UnknownKind
            | DiagnosticKind::MissingAttribute
            | DiagnosticKind::InvalidAttribute
            | DiagnosticKind::DisallowedChild
            | DiagnosticKind::UnknownAttribute
            | DiagnosticKind::DuplicateAttribute
            | DiagnosticKind::UnexpectedSection => DiagnosticClass::Schema,
            DiagnosticKind::DuplicateId | DiagnosticKind::DuplicateDocument => {
                DiagnosticClass::DuplicateId
            }
            DiagnosticKind::UnresolvedReference
            | DiagnosticKind::UnknownDocument
            | DiagnosticKind::AmbiguousIdentifier
            | DiagnosticKind::AliasShadowed => DiagnosticClass::Reference,
            DiagnosticKind::ConfidenceOutOfRange | DiagnosticKind::MalformedProvenance => {
                DiagnosticClass::Provenance
            }
            DiagnosticKind::UnprovedClaim | DiagnosticKind::LowConfidence => {
                DiagnosticClass::Semantic
            }
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            DiagnosticKind::UnknownAttribute
            | DiagnosticKind::DuplicateAttribute
            | DiagnosticKind::UnexpectedSection
            | DiagnosticKind::AliasShadowed
            | DiagnosticKind::UnprovedClaim
            | DiagnosticKind::LowConfidence => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl Display for DiagnosticKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub document_id: String,
    pub span: Span,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub suggestion: Option<String>,
    /// Further spans involved, e.g. every occurrence of a duplicated id.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub related: Vec<Span>,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        document_id: impl Into<String>,
        span: Span,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            kind,
            severity: kind.default_severity(),
            document_id: document_id.into(),
            span,
            message: message.into(),
            suggestion: None,
            related: vec![],
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_related(mut self, related: Vec<Span>) -> Self {
        self.related = related;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}[{}] {}:{}: {}",
            self.severity, self.kind, self.document_id, self.span.line, self.message
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean `{suggestion}`?)")?;
        }
        Ok(())
    }
}

/// Per-document diagnostic collector. Each document task owns one; the orchestrator merges them
/// after the task returns, so no list is ever shared between tasks.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticSink {
    document_id: String,
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new(document_id: impl Into<String>) -> Self {
        DiagnosticSink {
            document_id: document_id.into(),
            diagnostics: vec![],
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Re-key this sink, and everything already reported to it, to another document id. Used
    /// once frontmatter has named the document.
    pub fn rename(&mut self, document_id: &str) {
        self.document_id = document_id.to_string();
        for diagnostic in self.diagnostics.iter_mut() {
            diagnostic.document_id = document_id.to_string();
        }
    }

    /// Record a diagnostic against this sink's document and return it for further decoration.
    pub fn report(
        &mut self,
        kind: DiagnosticKind,
        span: Span,
        message: impl Into<String>,
    ) -> &mut Diagnostic {
        let diagnostic = Diagnostic::new(kind, self.document_id.clone(), span, message);
        tracing::debug!("{diagnostic}");
        self.diagnostics.push(diagnostic);
        let last = self.diagnostics.len() - 1;
        &mut self.diagnostics[last]
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_kebab_case_and_serialize_identically() {
        let kinds = [
            DiagnosticKind::UnbalancedCloser,
            DiagnosticKind::MissingAttribute,
            DiagnosticKind::DuplicateId,
            DiagnosticKind::UnresolvedReference,
            DiagnosticKind::ConfidenceOutOfRange,
            DiagnosticKind::UnprovedClaim,
        ];
        for kind in kinds {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_default_severities() {
        assert_eq!(
            DiagnosticKind::UnprovedClaim.default_severity(),
            Severity::Warning
        );
        assert_eq!(
            DiagnosticKind::AliasShadowed.default_severity(),
            Severity::Warning
        );
        assert_eq!(
            DiagnosticKind::MissingAttribute.default_severity(),
            Severity::Error
        );
        assert_eq!(
            DiagnosticKind::AmbiguousIdentifier.class(),
            DiagnosticClass::Reference
        );
    }

    #[test]
    fn test_display_includes_suggestion() {
        let diagnostic = Diagnostic::new(
            DiagnosticKind::UnresolvedReference,
            "paper.md",
            Span::new(10, 30, 3, 3),
            "unresolved reference `#thm-5`",
        )
        .with_suggestion("#thm-4");
        assert_eq!(
            diagnostic.to_string(),
            "error[unresolved-reference] paper.md:3: unresolved reference `#thm-5` (did you mean `#thm-4`?)"
        );
    }

    #[test]
    fn test_sink_tags_document() {
        let mut sink = DiagnosticSink::new("a.md");
        sink.report(DiagnosticKind::UnknownKind, Span::default(), "unknown kind")
            .suggestion = Some("theorem_block".into());
        let diagnostics = sink.into_vec();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].document_id, "a.md");
        assert_eq!(diagnostics[0].suggestion.as_deref(), Some("theorem_block"));
    }
}
