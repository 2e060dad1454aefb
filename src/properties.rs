/// [crate::properties] contains the data model shared by every phase: the closed set of
/// [EntityKind]s, typed [EntityData] payloads, [Entity] trees stored as per-document arenas,
/// pending [Reference]s and source [Span]s.
pub use enumset::EnumSet;
use enumset::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::provenance::{DocumentProvenance, ProvenanceRecord};

/// Hex SHA-256 digest of a document's text.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// NFC-normalized, trimmed identifier; `None` when nothing is left.
pub fn normalize_id(id: &str) -> Option<String> {
    let id = id.trim();
    match id.is_empty() {
        true => None,
        false => Some(id.nfc().collect()),
    }
}

/// Byte and line extent of a construct in its source document. Lines are 1-based, byte offsets
/// are 0-based and `end` is exclusive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub end_line: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, end_line: usize) -> Self {
        Span {
            start,
            end,
            line,
            end_line,
        }
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.line == self.end_line {
            write!(f, "line {}", self.line)
        } else {
            write!(f, "lines {}-{}", self.line, self.end_line)
        }
    }
}

/// Maps byte offsets back to 1-based line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (idx, ch) in source.char_indices() {
            if ch == '\n' {
                starts.push(idx + 1);
            }
        }
        Self {
            starts,
            len: source.len(),
        }
    }

    pub fn line(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    pub fn span(&self, start: usize, end: usize) -> Span {
        let end = end.min(self.len).max(start);
        let last = if end > start { end - 1 } else { start };
        Span::new(start, end, self.line(start), self.line(last))
    }
}

/// The closed set of entity kinds. Serialized with the canonical directive names
/// (`theorem_block`, `term_def`, ...).
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(repr = "u64")]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    // Structural
    SectionBlock,
    // Data & visual
    FigureBlock,
    TableBlock,
    ResultBlock,
    DiagramBlock,
    CodeBlock,
    ComparisonBlock,
    // Formal & technical
    AbstractBlock,
    TheoremBlock,
    ProofBlock,
    GuaranteeBlock,
    OperationBlock,
    ExampleBlock,
    ExerciseBlock,
    ProfileBlock,
    // Narrative
    AdmonitionBlock,
    QuoteBlock,
    DialogueBlock,
    VerseBlock,
    LetterBlock,
    TimelineBlock,
    // Definitions
    TypeDef,
    EnumDef,
    FunctionDef,
    PredicateDef,
    NotationDef,
    TermDef,
    AxiomDef,
    RuleDef,
    GrammarDef,
    JudgmentDef,
    ReferenceDef,
    // Supporting
    ProofStep,
    Event,
    Hint,
    /// Placeholder for a directive whose kind string is not in the closed set. Never has a
    /// schema; retained so later diagnostics can still point at its span.
    Unknown,
}

impl EntityKind {
    /// Every kind with a schema, i.e. everything except [EntityKind::Unknown].
    pub fn known() -> EnumSet<EntityKind> {
        EnumSet::all() - EntityKind::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::SectionBlock => "section_block",
            EntityKind::FigureBlock => "figure_block",
            EntityKind::TableBlock => "table_block",
            EntityKind::ResultBlock => "result_block",
            EntityKind::DiagramBlock => "diagram_block",
            EntityKind::CodeBlock => "code_block",
            EntityKind::ComparisonBlock => "comparison_block",
            EntityKind::AbstractBlock => "abstract_block",
            EntityKind::TheoremBlock => "theorem_block",
            EntityKind::ProofBlock => "proof_block",
            EntityKind::GuaranteeBlock => "guarantee_block",
            EntityKind::OperationBlock => "operation_block",
            EntityKind::ExampleBlock => "example_block",
            EntityKind::ExerciseBlock => "exercise_block",
            EntityKind::ProfileBlock => "profile_block",
            EntityKind::AdmonitionBlock => "admonition_block",
            EntityKind::QuoteBlock => "quote_block",
            EntityKind::DialogueBlock => "dialogue_block",
            EntityKind::VerseBlock => "verse_block",
            EntityKind::LetterBlock => "letter_block",
            EntityKind::TimelineBlock => "timeline_block",
            EntityKind::TypeDef => "type_def",
            EntityKind::EnumDef => "enum_def",
            EntityKind::FunctionDef => "function_def",
            EntityKind::PredicateDef => "predicate_def",
            EntityKind::NotationDef => "notation_def",
            EntityKind::TermDef => "term_def",
            EntityKind::AxiomDef => "axiom_def",
            EntityKind::RuleDef => "rule_def",
            EntityKind::GrammarDef => "grammar_def",
            EntityKind::JudgmentDef => "judgment_def",
            EntityKind::ReferenceDef => "reference_def",
            EntityKind::ProofStep => "proof_step",
            EntityKind::Event => "event",
            EntityKind::Hint => "hint",
            EntityKind::Unknown => "unknown",
        }
    }

    /// `theorem` for `theorem_block` and so on. Only `_block` kinds have a short spelling.
    pub fn short_name(&self) -> Option<&'static str> {
        self.as_str().strip_suffix("_block")
    }

    /// Looks up a kind by its canonical or short spelling.
    pub fn from_name(name: &str) -> Option<EntityKind> {
        EntityKind::known()
            .iter()
            .find(|kind| kind.as_str() == name || kind.short_name() == Some(name))
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A schema-validated attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    List(Vec<String>),
    Text(String),
}

/// Validated attributes keyed by schema attribute name, handed to [EntityData::from_attributes].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedAttributes(pub BTreeMap<&'static str, TypedValue>);

impl TypedAttributes {
    pub fn insert(&mut self, name: &'static str, value: TypedValue) {
        self.0.insert(name, value);
    }

    pub fn text(&self, name: &str) -> Option<String> {
        match self.0.get(name) {
            Some(TypedValue::Text(text)) => Some(text.clone()),
            Some(TypedValue::List(items)) => Some(items.join(",")),
            _ => None,
        }
    }

    pub fn text_or_default(&self, name: &str) -> String {
        self.text(name).unwrap_or_default()
    }

    pub fn list(&self, name: &str) -> Vec<String> {
        match self.0.get(name) {
            Some(TypedValue::List(items)) => items.clone(),
            Some(TypedValue::Text(text)) if !text.is_empty() => vec![text.clone()],
            _ => vec![],
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(TypedValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(TypedValue::Float(value)) => Some(*value),
            Some(TypedValue::Integer(value)) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.0.get(name) {
            Some(TypedValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }
}

/// Kind-specific payload. Each variant carries exactly the fields its schema declares; common
/// fields (id, title, alias, provenance keys) live on [Entity].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityData {
    Section {
        level: u8,
    },
    Figure {
        src: String,
        alt: Option<String>,
        width: Option<String>,
    },
    Table {
        alignments: Vec<String>,
    },
    Result {
        metric: Option<String>,
        value: Option<String>,
        task: Option<String>,
        dataset: Option<String>,
    },
    Diagram {
        notation: String,
    },
    Code {
        language: Option<String>,
        executable: bool,
    },
    Comparison {
        subjects: Vec<String>,
    },
    Abstract,
    Theorem {
        variant: String,
        name: Option<String>,
    },
    Proof {
        proves: Option<String>,
    },
    Guarantee {
        scope: Option<String>,
    },
    Operation {
        verb: Option<String>,
        endpoint: Option<String>,
    },
    Example,
    Exercise {
        difficulty: Option<String>,
    },
    Profile {
        name: Option<String>,
        role: Option<String>,
        affiliation: Option<String>,
    },
    Admonition {
        variant: String,
    },
    Quote {
        author: Option<String>,
        cite: Option<String>,
    },
    Dialogue {
        speakers: Vec<String>,
    },
    Verse,
    Letter {
        to: Option<String>,
        from: Option<String>,
        date: Option<String>,
    },
    Timeline,
    TypeDef {
        language: Option<String>,
    },
    EnumDef {
        variants: Vec<String>,
    },
    FunctionDef {
        signature: Option<String>,
        language: Option<String>,
    },
    PredicateDef {
        arity: Option<i64>,
    },
    NotationDef {
        symbol: Option<String>,
    },
    TermDef {
        term: Option<String>,
    },
    AxiomDef {
        system: Option<String>,
    },
    RuleDef {
        name: Option<String>,
    },
    GrammarDef {
        notation: String,
    },
    JudgmentDef {
        form: Option<String>,
    },
    ReferenceDef {
        authors: Vec<String>,
        year: Option<i64>,
        doi: Option<String>,
        url: Option<String>,
    },
    ProofStep {
        justification: Option<String>,
    },
    Event {
        date: Option<String>,
    },
    Hint,
    Unknown {
        name: String,
    },
}

impl EntityData {
    /// Builds the typed payload for `kind` out of validated attributes. Missing required fields
    /// arrive here already defaulted by the builder.
    pub fn from_attributes(kind: EntityKind, attrs: &TypedAttributes, raw_kind: &str) -> Self {
        match kind {
            EntityKind::SectionBlock => EntityData::Section {
                level: attrs
                    .integer("level")
                    .and_then(|level| u8::try_from(level).ok())
                    .unwrap_or(1),
            },
            EntityKind::FigureBlock => EntityData::Figure {
                src: attrs.text_or_default("src"),
                alt: attrs.text("alt"),
                width: attrs.text("width"),
            },
            EntityKind::TableBlock => EntityData::Table {
                alignments: attrs.list("alignments"),
            },
            EntityKind::ResultBlock => EntityData::Result {
                metric: attrs.text("metric"),
                value: attrs.text("value"),
                task: attrs.text("task"),
                dataset: attrs.text("dataset"),
            },
            EntityKind::DiagramBlock => EntityData::Diagram {
                notation: attrs.text_or_default("notation"),
            },
            EntityKind::CodeBlock => EntityData::Code {
                language: attrs.text("language"),
                executable: attrs.boolean("executable").unwrap_or(false),
            },
            EntityKind::ComparisonBlock => EntityData::Comparison {
                subjects: attrs.list("subjects"),
            },
            EntityKind::AbstractBlock => EntityData::Abstract,
            EntityKind::TheoremBlock => EntityData::Theorem {
                variant: attrs.text_or_default("variant"),
                name: attrs.text("name"),
            },
            EntityKind::ProofBlock => EntityData::Proof {
                proves: attrs.text("proves"),
            },
            EntityKind::GuaranteeBlock => EntityData::Guarantee {
                scope: attrs.text("scope"),
            },
            EntityKind::OperationBlock => EntityData::Operation {
                verb: attrs.text("verb"),
                endpoint: attrs.text("endpoint"),
            },
            EntityKind::ExampleBlock => EntityData::Example,
            EntityKind::ExerciseBlock => EntityData::Exercise {
                difficulty: attrs.text("difficulty"),
            },
            EntityKind::ProfileBlock => EntityData::Profile {
                name: attrs.text("name"),
                role: attrs.text("role"),
                affiliation: attrs.text("affiliation"),
            },
            EntityKind::AdmonitionBlock => EntityData::Admonition {
                variant: attrs.text_or_default("variant"),
            },
            EntityKind::QuoteBlock => EntityData::Quote {
                author: attrs.text("author"),
                cite: attrs.text("cite"),
            },
            EntityKind::DialogueBlock => EntityData::Dialogue {
                speakers: attrs.list("speakers"),
            },
            EntityKind::VerseBlock => EntityData::Verse,
            EntityKind::LetterBlock => EntityData::Letter {
                to: attrs.text("to"),
                from: attrs.text("from"),
                date: attrs.text("date"),
            },
            EntityKind::TimelineBlock => EntityData::Timeline,
            EntityKind::TypeDef => EntityData::TypeDef {
                language: attrs.text("language"),
            },
            EntityKind::EnumDef => EntityData::EnumDef {
                variants: attrs.list("variants"),
            },
            EntityKind::FunctionDef => EntityData::FunctionDef {
                signature: attrs.text("signature"),
                language: attrs.text("language"),
            },
            EntityKind::PredicateDef => EntityData::PredicateDef {
                arity: attrs.integer("arity"),
            },
            EntityKind::NotationDef => EntityData::NotationDef {
                symbol: attrs.text("symbol"),
            },
            EntityKind::TermDef => EntityData::TermDef {
                term: attrs.text("term"),
            },
            EntityKind::AxiomDef => EntityData::AxiomDef {
                system: attrs.text("system"),
            },
            EntityKind::RuleDef => EntityData::RuleDef {
                name: attrs.text("name"),
            },
            EntityKind::GrammarDef => EntityData::GrammarDef {
                notation: attrs.text_or_default("notation"),
            },
            EntityKind::JudgmentDef => EntityData::JudgmentDef {
                form: attrs.text("form"),
            },
            EntityKind::ReferenceDef => EntityData::ReferenceDef {
                authors: attrs.list("authors"),
                year: attrs.integer("year"),
                doi: attrs.text("doi"),
                url: attrs.text("url"),
            },
            EntityKind::ProofStep => EntityData::ProofStep {
                justification: attrs.text("justification"),
            },
            EntityKind::Event => EntityData::Event {
                date: attrs.text("date"),
            },
            EntityKind::Hint => EntityData::Hint,
            EntityKind::Unknown => EntityData::Unknown {
                name: raw_kind.to_string(),
            },
        }
    }
}

/// A labeled child of an entity introduced by a `::name` marker (`::caption`, `::source`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSection {
    pub label: String,
    pub text: String,
    pub span: Span,
}

/// A typed, identified unit of document content. Entities live in their [Document]'s arena and
/// point at each other by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub index: usize,
    pub kind: EntityKind,
    /// The kind string as written in the directive.
    pub kind_name: String,
    pub local_id: Option<String>,
    pub alias: Option<String>,
    pub title: Option<String>,
    pub data: EntityData,
    /// Every attribute exactly as written, so diagnostics and renderers can quote it.
    pub raw_attributes: BTreeMap<String, String>,
    pub sections: Vec<LabeledSection>,
    /// Body text with nested directives and labeled sections removed.
    pub text: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub provenance: ProvenanceRecord,
    pub span: Span,
}

impl Entity {
    pub fn section(&self, label: &str) -> Option<&LabeledSection> {
        self.sections.iter().find(|section| section.label == label)
    }

    /// `#id` when the entity has a local id, otherwise the kind and line.
    pub fn display_name(&self) -> String {
        match &self.local_id {
            Some(id) => format!("#{id}"),
            None => format!("{} at {}", self.kind, self.span),
        }
    }
}

/// Addresses an entity across a build: document position in the build plus arena index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EntityHandle {
    pub document: usize,
    pub entity: usize,
}

impl EntityHandle {
    pub fn new(document: usize, entity: usize) -> Self {
        EntityHandle { document, entity }
    }
}

/// Where a reference was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceOrigin {
    /// `[label](#id)` or `[label](path#id)` in content.
    Inline,
    /// A `proves=` attribute on a proof block.
    Proves,
}

/// A directed edge from an entity (or document-level prose when `source` is `None`) to an
/// identifier, optionally qualified by a document path. Unbound until the resolver runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub source: Option<usize>,
    pub target_document: Option<String>,
    pub target: String,
    pub label: String,
    pub origin: ReferenceOrigin,
    pub span: Span,
}

impl Reference {
    pub fn is_intra_document(&self) -> bool {
        self.target_document.is_none()
    }

    /// The reference target as written, `path#id` or `#id`.
    pub fn target_string(&self) -> String {
        match &self.target_document {
            Some(path) => format!("{path}#{}", self.target),
            None => format!("#{}", self.target),
        }
    }
}

/// A built document: frontmatter provenance plus an arena of entities and the references found
/// in its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Where the id is declared: the frontmatter `documentId` line, else line 1.
    pub id_span: Span,
    pub path: Option<String>,
    pub title: Option<String>,
    /// Hex SHA-256 of the document text.
    pub content_hash: String,
    pub provenance: DocumentProvenance,
    pub entities: Vec<Entity>,
    pub roots: Vec<usize>,
    /// Local id to the first entity declaring it.
    pub registry: BTreeMap<String, usize>,
    pub references: Vec<Reference>,
}

impl Document {
    pub fn entity(&self, index: usize) -> Option<&Entity> {
        self.entities.get(index)
    }

    pub fn find_by_local_id(&self, id: &str) -> Option<&Entity> {
        self.registry
            .get(id)
            .and_then(|index| self.entities.get(*index))
    }

    /// All descendants of `index` in document order, excluding `index` itself.
    pub fn descendants(&self, index: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let Some(entity) = self.entities.get(index) else {
            return out;
        };
        let mut stack: Vec<usize> = entity.children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(child) = self.entities.get(next) {
                stack.extend(child.children.iter().rev().copied());
            }
        }
        out
    }

    /// The sibling that directly follows `index` under the same parent (or among the roots).
    pub fn next_sibling(&self, index: usize) -> Option<usize> {
        let entity = self.entities.get(index)?;
        let siblings = match entity.parent {
            Some(parent) => &self.entities.get(parent)?.children,
            None => &self.roots,
        };
        let position = siblings.iter().position(|sibling| *sibling == index)?;
        siblings.get(position + 1).copied()
    }

    /// Directory portion of the document path (`chapters` for `chapters/intro.md`).
    pub fn directory(&self) -> &str {
        let path = self.path.as_deref().unwrap_or(self.id.as_str());
        match path.rfind('/') {
            Some(idx) => &path[..idx],
            None => "",
        }
    }
}
