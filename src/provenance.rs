//! Provenance layering.
//!
//! A [`ProvenanceRecord`] is composed from three layers: the document's frontmatter defaults,
//! entity-level attributes (`sourceLoc`, `confidence`, `method`, `source`, `sourceType`) which
//! override those defaults, and an optional `#_provenance` table whose rows are appended as
//! [`AuditEvent`]s without touching any scalar field.
//!
//! Confidence values outside `[0, 1]` are reported, never clamped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    codec::{
        diagnostic::{DiagnosticKind, DiagnosticSink},
        frontmatter::{text_field, FrontmatterProvenance, TextField},
    },
    properties::{LabeledSection, Span},
};

/// Document-level provenance taken from frontmatter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentProvenance {
    pub source_type: Option<String>,
    pub source_path: Option<String>,
    pub sha256: Option<String>,
    pub extraction_method: Option<String>,
    pub extraction_confidence: Option<f64>,
    pub tool: Option<String>,
    pub version: Option<String>,
}

/// One row of a rich provenance table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: Option<String>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub note: Option<String>,
}

/// Merged provenance of a single entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub source_type: Option<String>,
    pub source_path: Option<String>,
    pub sha256: Option<String>,
    pub method: Option<String>,
    pub confidence: Option<f64>,
    pub source_loc: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub audit: Vec<AuditEvent>,
}

pub fn confidence_in_range(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn is_sha256(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|ch| ch.is_ascii_hexdigit())
}

impl DocumentProvenance {
    /// Lift the frontmatter `provenance` tree, reporting malformed hashes and confidences.
    /// Rejected fields are left unset.
    pub fn from_frontmatter(
        provenance: Option<&FrontmatterProvenance>,
        span: Span,
        sink: &mut DiagnosticSink,
    ) -> DocumentProvenance {
        let Some(provenance) = provenance else {
            return DocumentProvenance::default();
        };

        let mut text = |field: Option<&TextField>, name: &str| {
            text_field(field, name, DiagnosticKind::MalformedProvenance, span, &mut *sink)
        };
        let source_type = text(provenance.source.kind.as_ref(), "provenance.source.type");
        let source_path = text(provenance.source.path.as_ref(), "provenance.source.path");
        let sha256 = text(provenance.source.sha256.as_ref(), "provenance.source.sha256");
        let extraction_method = text(
            provenance.extraction.method.as_ref(),
            "provenance.extraction.method",
        );
        let tool = text(provenance.extraction.tool.as_ref(), "provenance.extraction.tool");
        let version = text(
            provenance.extraction.version.as_ref(),
            "provenance.extraction.version",
        );

        let sha256 = match sha256.as_deref() {
            Some(hash) if is_sha256(hash) => Some(hash.to_ascii_lowercase()),
            Some(hash) => {
                sink.report(
                    DiagnosticKind::MalformedProvenance,
                    span,
                    format!("source.sha256 `{hash}` is not a 64-digit hex SHA-256 digest"),
                );
                None
            }
            None => None,
        };

        let extraction_confidence = match &provenance.extraction.confidence {
            None | Some(serde_yaml::Value::Null) => None,
            Some(value) => match value.as_f64() {
                Some(confidence) if confidence_in_range(confidence) => Some(confidence),
                Some(confidence) => {
                    sink.report(
                        DiagnosticKind::ConfidenceOutOfRange,
                        span,
                        format!("extraction.confidence {confidence} is outside [0, 1]"),
                    );
                    None
                }
                None => {
                    sink.report(
                        DiagnosticKind::MalformedProvenance,
                        span,
                        format!("extraction.confidence must be a number, got {value:?}"),
                    );
                    None
                }
            },
        };

        DocumentProvenance {
            source_type,
            source_path,
            sha256,
            extraction_method,
            extraction_confidence,
            tool,
            version,
        }
    }
}

impl From<&DocumentProvenance> for ProvenanceRecord {
    fn from(document: &DocumentProvenance) -> Self {
        ProvenanceRecord {
            source_type: document.source_type.clone(),
            source_path: document.source_path.clone(),
            sha256: document.sha256.clone(),
            method: document.extraction_method.clone(),
            confidence: document.extraction_confidence,
            source_loc: None,
            audit: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Timestamp,
    Actor,
    Action,
    Note,
    Ignored,
}

impl Column {
    fn from_header(header: &str) -> Column {
        match header.trim().to_lowercase().as_str() {
            "timestamp" | "date" | "time" => Column::Timestamp,
            "actor" | "by" | "who" => Column::Actor,
            "action" | "aspect" | "event" => Column::Action,
            "note" | "detail" | "details" => Column::Note,
            _ => Column::Ignored,
        }
    }
}

/// Split a `| a | b |` row into trimmed cells. `\|` is a literal pipe.
fn split_row(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    let mut cells = vec![];
    let mut cell = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&'|') => {
                cell.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut cell).trim().to_string()),
            ch => cell.push(ch),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

fn is_separator(cells: &[String]) -> bool {
    cells.iter().all(|cell| {
        !cell.is_empty() && cell.chars().all(|ch| matches!(ch, '-' | ':' | ' '))
    })
}

fn non_empty(cell: &str) -> Option<String> {
    match cell.is_empty() {
        true => None,
        false => Some(cell.to_string()),
    }
}

/// Parse a rich provenance sub-block into audit events.
pub fn parse_audit_table(section: &LabeledSection, sink: &mut DiagnosticSink) -> Vec<AuditEvent> {
    let mut events = vec![];
    let mut header: Option<Vec<Column>> = None;
    for (row, line) in section.text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.starts_with('|') {
            sink.report(
                DiagnosticKind::MalformedProvenance,
                section.span,
                format!(
                    "provenance row {}: expected a table row, got `{trimmed}`",
                    row + 1
                ),
            );
            continue;
        }
        let cells = split_row(trimmed);
        if header.is_none() {
            let mut mapped: Vec<Column> = cells.iter().map(|h| Column::from_header(h)).collect();
            if mapped.iter().all(|column| *column == Column::Ignored) {
                if cells.len() != 2 {
                    sink.report(
                        DiagnosticKind::MalformedProvenance,
                        section.span,
                        format!(
                            "provenance table header `{trimmed}` names no known column (timestamp, actor, action, note)"
                        ),
                    );
                    return events;
                }
                mapped = vec![Column::Action, Column::Note];
            }
            header = Some(mapped);
            continue;
        }
        let Some(columns) = header.as_ref() else {
            continue;
        };
        if is_separator(&cells) {
            continue;
        }
        if cells.len() != columns.len() {
            sink.report(
                DiagnosticKind::MalformedProvenance,
                section.span,
                format!(
                    "provenance row {} has {} cell(s), the header has {}",
                    row + 1,
                    cells.len(),
                    columns.len()
                ),
            );
            continue;
        }
        let mut event = AuditEvent::default();
        for (column, cell) in columns.iter().zip(&cells) {
            let slot = match column {
                Column::Timestamp => &mut event.timestamp,
                Column::Actor => &mut event.actor,
                Column::Action => &mut event.action,
                Column::Note => &mut event.note,
                Column::Ignored => continue,
            };
            *slot = non_empty(cell);
        }
        events.push(event);
    }
    events
}

/// Merge the three provenance layers for one entity.
///
/// `attributes` are the entity's raw attributes; only the provenance keys are read. A
/// `confidence` that is not a finite number was already reported by the builder as an invalid
/// attribute and is dropped here without a second diagnostic.
pub fn attach(
    attributes: &BTreeMap<String, String>,
    rich: Option<&LabeledSection>,
    document: &DocumentProvenance,
    span: Span,
    sink: &mut DiagnosticSink,
) -> ProvenanceRecord {
    let mut record = ProvenanceRecord::from(document);

    if let Some(source_loc) = attributes.get("sourceLoc") {
        record.source_loc = Some(source_loc.clone());
    }
    if let Some(method) = attributes.get("method") {
        record.method = Some(method.clone());
    }
    if let Some(source) = attributes.get("source") {
        record.source_path = Some(source.clone());
    }
    if let Some(source_type) = attributes.get("sourceType") {
        record.source_type = Some(source_type.clone());
    }
    if let Some(raw) = attributes.get("confidence") {
        record.confidence = match raw.trim().parse::<f64>() {
            Ok(confidence) if confidence_in_range(confidence) => Some(confidence),
            Ok(confidence) if confidence.is_finite() => {
                sink.report(
                    DiagnosticKind::ConfidenceOutOfRange,
                    span,
                    format!("confidence {confidence} is outside [0, 1]"),
                );
                None
            }
            _ => None,
        };
    }

    if let Some(section) = rich {
        record.audit.extend(parse_audit_table(section, sink));
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::frontmatter::{ExtractionSection, SourceSection};

    fn section(text: &str) -> LabeledSection {
        LabeledSection {
            label: "_provenance".to_string(),
            text: text.to_string(),
            span: Span::new(0, 1, 4, 8),
        }
    }

    fn frontmatter(confidence: serde_yaml::Value, sha256: Option<&str>) -> FrontmatterProvenance {
        FrontmatterProvenance {
            source: SourceSection {
                kind: Some("pdf".into()),
                path: Some("papers/knuth.pdf".into()),
                sha256: sha256.map(TextField::from),
            },
            extraction: ExtractionSection {
                method: Some("ocr".into()),
                confidence: Some(confidence),
                tool: None,
                version: None,
            },
        }
    }

    #[test]
    fn test_entity_attributes_override_document_defaults() {
        let mut sink = DiagnosticSink::new("doc");
        let document = DocumentProvenance::from_frontmatter(
            Some(&frontmatter(serde_yaml::Value::from(0.8), None)),
            Span::default(),
            &mut sink,
        );
        let attributes = BTreeMap::from([
            ("sourceLoc".to_string(), "p.12".to_string()),
            ("confidence".to_string(), "0.97".to_string()),
        ]);
        let record = attach(&attributes, None, &document, Span::default(), &mut sink);
        assert!(sink.is_empty());
        assert_eq!(record.confidence, Some(0.97));
        assert_eq!(record.source_loc.as_deref(), Some("p.12"));
        assert_eq!(record.method.as_deref(), Some("ocr"));
        assert_eq!(record.source_path.as_deref(), Some("papers/knuth.pdf"));
    }

    #[test]
    fn test_out_of_range_confidence_is_reported_not_clamped() {
        let mut sink = DiagnosticSink::new("doc");
        let attributes = BTreeMap::from([("confidence".to_string(), "1.4".to_string())]);
        let record = attach(
            &attributes,
            None,
            &DocumentProvenance::default(),
            Span::default(),
            &mut sink,
        );
        assert_eq!(record.confidence, None);
        assert_eq!(
            sink.diagnostics()[0].kind,
            DiagnosticKind::ConfidenceOutOfRange
        );
    }

    #[test]
    fn test_frontmatter_checks() {
        let mut sink = DiagnosticSink::new("doc");
        let document = DocumentProvenance::from_frontmatter(
            Some(&frontmatter(serde_yaml::Value::from("high"), Some("abc123"))),
            Span::default(),
            &mut sink,
        );
        assert_eq!(document.extraction_confidence, None);
        assert_eq!(document.sha256, None);
        let kinds: Vec<DiagnosticKind> = sink.diagnostics().iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DiagnosticKind::MalformedProvenance,
                DiagnosticKind::MalformedProvenance
            ]
        );
    }

    #[test]
    fn test_rich_table_is_appended() {
        let mut sink = DiagnosticSink::new("doc");
        let rich = section(
            "| Aspect | Detail |\n|--------|--------|\n| Source | [Knuth 1997], p.42 |\n| Method | Manual transcription |",
        );
        let attributes = BTreeMap::from([("confidence".to_string(), "0.9".to_string())]);
        let record = attach(
            &attributes,
            Some(&rich),
            &DocumentProvenance::default(),
            Span::default(),
            &mut sink,
        );
        assert!(sink.is_empty(), "{:?}", sink.diagnostics());
        assert_eq!(record.confidence, Some(0.9));
        assert_eq!(record.audit.len(), 2);
        assert_eq!(record.audit[0].action.as_deref(), Some("Source"));
        assert_eq!(record.audit[0].note.as_deref(), Some("[Knuth 1997], p.42"));
    }

    #[test]
    fn test_audit_columns_by_header() {
        let mut sink = DiagnosticSink::new("doc");
        let rich = section(
            "| Date | By | Action | Note | Extra |\n|---|---|---|---|---|\n| 2024-03-01 | alice | corrected | fixed \\| typo | x |",
        );
        let events = parse_audit_table(&rich, &mut sink);
        assert!(sink.is_empty());
        assert_eq!(
            events,
            vec![AuditEvent {
                timestamp: Some("2024-03-01".into()),
                actor: Some("alice".into()),
                action: Some("corrected".into()),
                note: Some("fixed | typo".into()),
            }]
        );
    }

    #[test]
    fn test_malformed_rows() {
        let mut sink = DiagnosticSink::new("doc");
        let rich = section("| Action | Note |\n|---|---|\n| only one |\nfree text\n| ok | fine |");
        let events = parse_audit_table(&rich, &mut sink);
        assert_eq!(events.len(), 1);
        assert_eq!(sink.diagnostics().len(), 2);
        assert!(sink
            .diagnostics()
            .iter()
            .all(|d| d.kind == DiagnosticKind::MalformedProvenance));
    }
}
