//! Consistency validation and the build report.
//!
//! The validator never short-circuits. It takes the diagnostics every earlier phase collected,
//! adds kind-specific semantic checks, and orders the lot deterministically:
//!
//! 1. syntax
//! 2. duplicate ids and documents
//! 3. references
//! 4. schema
//! 5. provenance
//! 6. semantic checks
//!
//! Within a class, diagnostics follow document build order, then source position. The graph is
//! only attached to the report when no diagnostic is an error.

use serde_json::json;
use std::fmt::{Display, Formatter};

use crate::{
    codec::diagnostic::{Diagnostic, DiagnosticClass, DiagnosticKind},
    config::BuildConfig,
    graph::DocumentGraph,
    properties::{Document, EntityHandle, EntityKind, ReferenceOrigin},
    resolver::ResolvedGraph,
};

/// Everything a semantic check may look at. Read-only.
pub struct CheckContext<'a> {
    pub documents: &'a [Document],
    pub resolved: &'a ResolvedGraph,
    pub config: &'a BuildConfig,
}

/// A kind-specific completeness rule. Implementations append diagnostics and must not depend on
/// anything but the context, so repeated runs report identically.
pub trait SemanticCheck: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, context: &CheckContext, diagnostics: &mut Vec<Diagnostic>);
}

/// Theorems need a descendant proof or guarantee, a directly following proof, or a proof that
/// declares `proves=` for them.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnprovedClaim;

impl UnprovedClaim {
    fn is_proved(context: &CheckContext, document: usize, entity: usize) -> bool {
        let doc = &context.documents[document];
        let proving = |index: usize| {
            doc.entity(index).is_some_and(|candidate| {
                matches!(
                    candidate.kind,
                    EntityKind::ProofBlock | EntityKind::GuaranteeBlock
                )
            })
        };
        if doc.descendants(entity).into_iter().any(proving) {
            return true;
        }
        if doc
            .next_sibling(entity)
            .and_then(|sibling| doc.entity(sibling))
            .is_some_and(|sibling| sibling.kind == EntityKind::ProofBlock)
        {
            return true;
        }
        let handle = EntityHandle::new(document, entity);
        context
            .resolved
            .edges
            .iter()
            .any(|edge| edge.origin == ReferenceOrigin::Proves && edge.target == handle)
    }
}

impl SemanticCheck for UnprovedClaim {
    fn name(&self) -> &'static str {
        "unproved-claim"
    }

    fn check(&self, context: &CheckContext, diagnostics: &mut Vec<Diagnostic>) {
        for (position, document) in context.documents.iter().enumerate() {
            for entity in document
                .entities
                .iter()
                .filter(|entity| entity.kind == EntityKind::TheoremBlock)
            {
                if !UnprovedClaim::is_proved(context, position, entity.index) {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::UnprovedClaim,
                        document.id.clone(),
                        entity.span,
                        format!(
                            "unproved claim: {} has no proof_block or guarantee_block",
                            entity.display_name()
                        ),
                    ));
                }
            }
        }
    }
}

/// Guarantees whose merged confidence falls below the configured threshold.
#[derive(Debug, Clone, Copy)]
pub struct LowConfidenceGuarantee {
    pub threshold: f64,
}

impl SemanticCheck for LowConfidenceGuarantee {
    fn name(&self) -> &'static str {
        "low-confidence"
    }

    fn check(&self, context: &CheckContext, diagnostics: &mut Vec<Diagnostic>) {
        for document in context.documents.iter() {
            for entity in document
                .entities
                .iter()
                .filter(|entity| entity.kind == EntityKind::GuaranteeBlock)
            {
                let Some(confidence) = entity.provenance.confidence else {
                    continue;
                };
                if confidence < self.threshold {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::LowConfidence,
                        document.id.clone(),
                        entity.span,
                        format!(
                            "guarantee {} has confidence {confidence}, below the threshold of {}",
                            entity.display_name(),
                            self.threshold
                        ),
                    ));
                }
            }
        }
    }
}

fn class_rank(class: DiagnosticClass) -> u8 {
    match class {
        DiagnosticClass::Syntax => 0,
        DiagnosticClass::DuplicateId => 1,
        DiagnosticClass::Reference => 2,
        DiagnosticClass::Schema => 3,
        DiagnosticClass::Provenance => 4,
        DiagnosticClass::Semantic => 5,
    }
}

/// Stable ordering by class, document build position and source position.
pub fn order_diagnostics(documents: &[Document], diagnostics: &mut [Diagnostic]) {
    let position = |id: &str| {
        documents
            .iter()
            .position(|document| document.id == id)
            .unwrap_or(documents.len())
    };
    diagnostics.sort_by_cached_key(|diagnostic| {
        (
            class_rank(diagnostic.kind.class()),
            position(&diagnostic.document_id),
            diagnostic.span.start,
            diagnostic.span.end,
        )
    });
}

pub struct Validator {
    config: BuildConfig,
    checks: Vec<Box<dyn SemanticCheck>>,
}

impl Validator {
    /// A validator with the built-in semantic checks.
    pub fn new(config: &BuildConfig) -> Self {
        Validator {
            config: config.clone(),
            checks: vec![
                Box::new(UnprovedClaim),
                Box::new(LowConfidenceGuarantee {
                    threshold: config.guarantee_confidence_threshold,
                }),
            ],
        }
    }

    pub fn with_check(mut self, check: Box<dyn SemanticCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Assemble the build report. `diagnostics` are those already reported by parsing,
    /// building, provenance attachment and resolution.
    #[tracing::instrument(skip_all, fields(documents = documents.len()))]
    pub fn validate(
        &self,
        documents: Vec<Document>,
        resolved: ResolvedGraph,
        mut diagnostics: Vec<Diagnostic>,
    ) -> BuildReport {
        let context = CheckContext {
            documents: &documents,
            resolved: &resolved,
            config: &self.config,
        };
        for check in self.checks.iter() {
            let before = diagnostics.len();
            check.check(&context, &mut diagnostics);
            tracing::debug!(
                "check {} reported {} diagnostic(s)",
                check.name(),
                diagnostics.len() - before
            );
        }
        order_diagnostics(&documents, &mut diagnostics);

        let failed = diagnostics.iter().any(Diagnostic::is_error);
        let graph = match failed {
            true => None,
            false => Some(DocumentGraph::new(documents, resolved)),
        };
        let report = BuildReport { diagnostics, graph };
        tracing::info!("{}", report.summary());
        report
    }
}

/// Validate with the built-in checks.
pub fn validate(
    documents: Vec<Document>,
    resolved: ResolvedGraph,
    diagnostics: Vec<Diagnostic>,
    config: &BuildConfig,
) -> BuildReport {
    Validator::new(config).validate(documents, resolved, diagnostics)
}

/// Ordered diagnostics plus the graph, present iff there are no errors.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub diagnostics: Vec<Diagnostic>,
    pub graph: Option<DocumentGraph>,
}

impl BuildReport {
    pub fn succeeded(&self) -> bool {
        self.graph.is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_warning())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn summary(&self) -> String {
        format!(
            "build {}: {} error(s), {} warning(s)",
            match self.succeeded() {
                true => "succeeded",
                false => "failed",
            },
            self.error_count(),
            self.warning_count()
        )
    }

    /// Machine-readable report for external tools.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "succeeded": self.succeeded(),
            "errors": self.error_count(),
            "warnings": self.warning_count(),
            "diagnostics": self.diagnostics,
        })
    }
}

impl Display for BuildReport {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        for diagnostic in self.diagnostics.iter() {
            writeln!(f, "{diagnostic}")?;
        }
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{builder::EntityBuilder, diagnostic::DiagnosticSink, directive::DirectiveParser},
        resolver::resolve,
    };
    use pretty_assertions::assert_eq;

    fn run(text: &str) -> BuildReport {
        let mut sink = DiagnosticSink::new("doc.md");
        let raw = DirectiveParser::default().parse(text, &mut sink);
        let document = EntityBuilder::default().build(raw, "doc.md", Some("doc.md"), &mut sink);
        let documents = vec![document];
        let (resolved, resolution) = resolve(&documents);
        let mut diagnostics = sink.into_vec();
        diagnostics.extend(resolution);
        validate(documents, resolved, diagnostics, &BuildConfig::default())
    }

    fn kinds(report: &BuildReport) -> Vec<DiagnosticKind> {
        report.diagnostics.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_unproved_claim_is_a_warning() {
        let report = run(":::theorem_block{#thm-x}\nClaim.\n:::\n");
        assert_eq!(kinds(&report), vec![DiagnosticKind::UnprovedClaim]);
        assert!(report.diagnostics[0].message.starts_with("unproved claim"));
        assert!(report.succeeded());
    }

    #[test]
    fn test_attached_proofs() {
        let nested = ":::theorem{#a}\n:::proof\nx\n:::\n:::\n";
        let sibling = ":::theorem{#a}\n:::\n:::proof_block\nx\n:::\n";
        let declared = ":::theorem{#a}\n:::\n:::hint\n:::\n:::proof_block{proves=\"#a\"}\nx\n:::\n";
        let guaranteed = ":::theorem{#a}\n:::guarantee\nx\n:::\n:::\n";
        for text in [nested, sibling, declared, guaranteed] {
            let report = run(text);
            assert!(report.diagnostics.is_empty(), "{text}: {:?}", report.diagnostics);
        }
    }

    #[test]
    fn test_low_confidence_guarantee() {
        let report = run(":::guarantee_block{#g confidence=0.3}\n:::\n:::guarantee_block{#h confidence=0.9}\n:::\n");
        assert_eq!(kinds(&report), vec![DiagnosticKind::LowConfidence]);
        assert!(report.succeeded());
    }

    #[test]
    fn test_errors_withhold_the_graph() {
        let report = run(":::figure_block{#fig-1}\n:::\n");
        assert_eq!(kinds(&report), vec![DiagnosticKind::MissingAttribute]);
        assert!(!report.succeeded());
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.to_json()["succeeded"], false);
    }

    #[test]
    fn test_class_ordering() {
        let text = "[x](#nope)\n:::figure{#f}\n:::\n:::theorem{#t}\n:::\n:::hint{#f}\n:::\n:::\n";
        let report = run(text);
        assert_eq!(
            kinds(&report),
            vec![
                DiagnosticKind::UnbalancedCloser,
                DiagnosticKind::DuplicateId,
                DiagnosticKind::UnresolvedReference,
                DiagnosticKind::MissingAttribute,
                DiagnosticKind::UnprovedClaim,
            ]
        );
    }

    struct NoHints;

    impl SemanticCheck for NoHints {
        fn name(&self) -> &'static str {
            "no-hints"
        }

        fn check(&self, context: &CheckContext, diagnostics: &mut Vec<Diagnostic>) {
            for document in context.documents {
                for entity in document.entities.iter().filter(|e| e.kind == EntityKind::Hint) {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::LowConfidence,
                        document.id.clone(),
                        entity.span,
                        "hints are discouraged",
                    ));
                }
            }
        }
    }

    #[test]
    fn test_custom_check() {
        let mut sink = DiagnosticSink::new("doc.md");
        let raw = DirectiveParser::default().parse(":::hint\n:::\n", &mut sink);
        let documents = vec![EntityBuilder::default().build(raw, "doc.md", None, &mut sink)];
        let (resolved, _) = resolve(&documents);
        let report = Validator::new(&BuildConfig::default())
            .with_check(Box::new(NoHints))
            .validate(documents, resolved, sink.into_vec());
        assert_eq!(report.warning_count(), 1);
    }
}
