//! YAML frontmatter delimited by `---` lines at the very top of a document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    codec::diagnostic::{DiagnosticKind, DiagnosticSink},
    properties::{LineIndex, Span},
};

/// A text-valued field as written. Any other YAML value is kept so that the one field can be
/// reported while the rest of the block is still used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextField {
    Text(String),
    Other(serde_yaml::Value),
}

impl TextField {
    /// Numbers and booleans are taken as written (`version: 1.2`); mappings, sequences and
    /// tagged values are not text.
    pub fn as_text(&self) -> Option<String> {
        match self {
            TextField::Text(text) => Some(text.clone()),
            TextField::Other(serde_yaml::Value::Number(number)) => Some(number.to_string()),
            TextField::Other(serde_yaml::Value::Bool(flag)) => Some(flag.to_string()),
            TextField::Other(_) => None,
        }
    }
}

impl From<&str> for TextField {
    fn from(text: &str) -> Self {
        TextField::Text(text.to_string())
    }
}

/// Read an optional text field, reporting a non-text value under `name` as `kind`.
pub fn text_field(
    field: Option<&TextField>,
    name: &str,
    kind: DiagnosticKind,
    span: Span,
    sink: &mut DiagnosticSink,
) -> Option<String> {
    let field = field?;
    let text = field.as_text();
    if text.is_none() {
        sink.report(
            kind,
            span,
            format!("frontmatter field `{name}` must be text, ignoring it"),
        );
    }
    text
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSection {
    #[serde(rename = "type")]
    pub kind: Option<TextField>,
    pub path: Option<TextField>,
    pub sha256: Option<TextField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSection {
    pub method: Option<TextField>,
    /// Left untyped so a non-numeric value can be reported instead of failing the whole block.
    pub confidence: Option<serde_yaml::Value>,
    pub tool: Option<TextField>,
    pub version: Option<TextField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontmatterProvenance {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub extraction: ExtractionSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontmatter {
    pub document_id: Option<TextField>,
    pub title: Option<TextField>,
    pub provenance: Option<FrontmatterProvenance>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// The raw frontmatter block as located in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrontmatter {
    pub yaml: String,
    /// Covers both delimiter lines.
    pub span: Span,
    /// The top-level `documentId:` line, if present.
    pub id_line: Option<Span>,
    /// Byte offset where the document body starts.
    pub body_start: usize,
}

pub enum FrontmatterScan {
    Absent,
    Found(RawFrontmatter),
    /// An opening `---` with no closing delimiter; carries the opening line's span.
    Unterminated(Span),
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end() == "---"
}

/// Locate a frontmatter block. Only a `---` on the first line opens one.
pub fn scan_frontmatter(text: &str, lines: &LineIndex) -> FrontmatterScan {
    let mut offset = 0;
    let mut opened = false;
    let mut yaml_start = 0;
    let mut id_line = None;
    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        if !opened {
            if !is_delimiter(line) {
                return FrontmatterScan::Absent;
            }
            opened = true;
            yaml_start = offset;
            continue;
        }
        if is_delimiter(line) {
            return FrontmatterScan::Found(RawFrontmatter {
                yaml: text[yaml_start..start].to_string(),
                span: lines.span(0, offset),
                id_line,
                body_start: offset,
            });
        }
        if id_line.is_none() && line.starts_with("documentId:") {
            id_line = Some(lines.span(start, offset));
        }
    }
    if opened {
        FrontmatterScan::Unterminated(lines.span(0, yaml_start))
    } else {
        FrontmatterScan::Absent
    }
}

impl Frontmatter {
    pub fn parse(yaml: &str) -> Result<Frontmatter, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Frontmatter::default());
        }
        serde_yaml::from_str(yaml)
    }
}
