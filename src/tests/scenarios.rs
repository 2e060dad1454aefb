//! End-to-end behavior of the pipeline on small in-memory builds.

use super::helpers::*;
use crate::{codec::diagnostic::DiagnosticKind, properties::EntityKind};
use pretty_assertions::assert_eq;
use test_log::test;

#[test]
fn test_theorem_referenced_in_body() {
    let report = compile(&[(
        "notes.md",
        ":::theorem{#thm-main}\nEvery bounded sequence has a convergent subsequence.\n:::\n\nBy [Theorem 1](#thm-main) we are done.\n",
    )]);
    assert_eq!(report.error_count(), 0);
    let graph = report.graph.expect("build should succeed");
    assert_eq!(graph.edges().len(), 1);
    let target = graph.entity(graph.edges()[0].target).unwrap();
    assert_eq!(target.local_id.as_deref(), Some("thm-main"));
}

#[test]
fn test_unresolved_reference_suggests_neighbor() {
    let report = compile(&[(
        "notes.md",
        ":::theorem_block{#thm-4}\n:::\n:::proof_block\n:::\n[See Theorem 5](#thm-5)\n",
    )]);
    assert_eq!(kinds(&report), vec!["unresolved-reference"]);
    let error = &report.diagnostics[0];
    assert_eq!(error.suggestion.as_deref(), Some("#thm-4"));
    assert_eq!(error.span.line, 5);
    assert!(report.graph.is_none());
}

#[test]
fn test_duplicate_id_cites_every_span() {
    let report = compile(&[(
        "notes.md",
        ":::example{#foo}\nfirst\n:::\n:::example{#foo}\nsecond\n:::\n",
    )]);
    assert_eq!(kinds(&report), vec!["duplicate-id"]);
    let error = &report.diagnostics[0];
    let lines: Vec<usize> = error.related.iter().map(|span| span.line).collect();
    assert_eq!(lines, vec![1, 4]);
}

#[test]
fn test_cross_document_reference() {
    let report = compile(&[
        (
            "definitions.md",
            ":::term_def{#term-entropy}\nThe expected information content.\n:::\n",
        ),
        (
            "analysis.md",
            "The [entropy](definitions.md#term-entropy) of the source is bounded.\n",
        ),
    ]);
    assert_eq!(report.error_count(), 0, "{report}");
    let graph = report.graph.unwrap();
    let entropy = graph.lookup("definitions.md", "term-entropy").unwrap();
    let backlinks = graph.backlinks(entropy);
    assert_eq!(backlinks.len(), 1);
    assert_eq!(backlinks[0].source_document, 1);
}

#[test]
fn test_missing_required_attribute_withholds_graph() {
    let report = compile(&[("notes.md", ":::figure_block{#fig-1}\n::caption\nArchitecture.\n:::\n")]);
    assert_eq!(kinds(&report), vec!["missing-attribute"]);
    assert_eq!(report.diagnostics[0].message, "missing required attribute: src");
    assert!(report.graph.is_none());
}

#[test]
fn test_unproved_claim_is_a_warning() {
    let report = compile(&[("notes.md", ":::theorem_block{#thm-x}\nA claim.\n:::\n")]);
    assert_eq!(kinds(&report), vec!["unproved-claim"]);
    assert!(report.diagnostics[0].message.starts_with("unproved claim"));
    assert!(report.succeeded());
}

#[test]
fn test_proof_attached_by_sibling_child_or_proves() {
    let report = compile(&[(
        "notes.md",
        concat!(
            ":::theorem{#thm-a}\n:::\n:::proof\nTrivial.\n:::\n",
            ":::theorem{#thm-b}\n:::guarantee\n:::\n:::\n",
            ":::theorem{#thm-c}\n:::\n:::example\n:::\n:::proof{proves=\"#thm-c\"}\n:::\n",
        ),
    )]);
    assert_eq!(kinds(&report), Vec::<&str>::new());
    let graph = report.graph.unwrap();
    let thm_c = graph.lookup("notes.md", "thm-c").unwrap();
    assert_eq!(graph.backlinks(thm_c).len(), 1);
}

#[test]
fn test_every_problem_reported_in_one_run() {
    let report = compile(&[
        (
            "a.md",
            ":::figure{#fig}\n:::\n:::lemma{#l}\n:::\n:::\n[x](#fig-2)\n:::theorem{#t}\n:::\n",
        ),
        ("b.md", "[y](missing.md#x)\n"),
    ]);
    assert_eq!(
        kinds(&report),
        vec![
            "unbalanced-closer",
            "unresolved-reference",
            "unknown-document",
            "missing-attribute",
            "unknown-kind",
            "unproved-claim",
        ]
    );
}

#[test]
fn test_provenance_layers_merge() {
    let report = compile(&[(
        "scan.md",
        concat!(
            "---\n",
            "provenance:\n",
            "  source: { type: pdf, path: paper.pdf }\n",
            "  extraction: { method: ocr, confidence: 0.9 }\n",
            "---\n",
            ":::guarantee{#g-1 confidence=0.3 sourceLoc=\"p. 4\"}\n",
            "Holds for all inputs.\n",
            "::_provenance\n",
            "| timestamp | actor | action | note |\n",
            "| --- | --- | --- | --- |\n",
            "| 2024-01-02 | reviewer | corrected | fixed OCR error |\n",
            ":::\n",
            ":::table{#tab-1}\n:::\n",
        ),
    )]);
    assert_eq!(kinds(&report), vec!["low-confidence"]);
    let graph = report.graph.unwrap();
    let document = graph.document("scan.md").unwrap();

    let guarantee = document.find_by_local_id("g-1").unwrap();
    assert_eq!(guarantee.kind, EntityKind::GuaranteeBlock);
    assert_eq!(guarantee.provenance.confidence, Some(0.3));
    assert_eq!(guarantee.provenance.method.as_deref(), Some("ocr"));
    assert_eq!(guarantee.provenance.source_loc.as_deref(), Some("p. 4"));
    assert_eq!(guarantee.provenance.audit.len(), 1);
    assert_eq!(guarantee.provenance.audit[0].actor.as_deref(), Some("reviewer"));

    let table = document.find_by_local_id("tab-1").unwrap();
    assert_eq!(table.provenance.confidence, Some(0.9));
    assert_eq!(table.provenance.source_path.as_deref(), Some("paper.pdf"));
    assert!(table.provenance.audit.is_empty());
}

#[test]
fn test_out_of_range_confidence_is_not_clamped() {
    let (document, diagnostics) =
        build_document("notes.md", ":::result{#r confidence=1.4}\n:::\n");
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::ConfidenceOutOfRange);
    assert_eq!(document.entities[0].provenance.confidence, None);
    assert_eq!(
        document.entities[0].raw_attributes.get("confidence").map(String::as_str),
        Some("1.4")
    );
}
