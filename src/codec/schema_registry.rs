// Schema dispatch table for entity kinds
//
// Maps every kind in the closed set to its attribute schema (required attributes, optional
// attributes with defaults, value types), the labeled sections it expects and the child kinds it
// may contain. The table is built once and is read-only afterwards.

use enumset::{enum_set, EnumSet};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

use crate::properties::{EntityKind, TypedValue};

/// Global schema table.
pub static SCHEMAS: Lazy<SchemaRegistry> = Lazy::new(SchemaRegistry::create);

/// Attributes accepted on every kind.
pub const COMMON_ATTRIBUTES: &[AttrSpec] = &[
    AttrSpec::optional("id", AttrType::Text),
    AttrSpec::optional("title", AttrType::Text),
    AttrSpec::optional("alias", AttrType::Text),
];

/// Entity-level provenance keys, accepted on every kind and routed to the provenance attacher.
pub const PROVENANCE_ATTRIBUTES: &[AttrSpec] = &[
    AttrSpec::optional("sourceLoc", AttrType::Text),
    AttrSpec::optional("confidence", AttrType::Float),
    AttrSpec::optional("method", AttrType::Text),
    AttrSpec::optional("source", AttrType::Text),
    AttrSpec::optional("sourceType", AttrType::Text),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Text,
    /// Comma-separated values.
    List,
    Integer {
        min: i64,
        max: i64,
    },
    Float,
    /// `true` or `false`, nothing else.
    Bool,
    Choice(&'static [&'static str]),
}

impl AttrType {
    /// Convert a raw attribute value, or explain why it does not fit.
    pub fn coerce(&self, raw: &str) -> Result<TypedValue, String> {
        match self {
            AttrType::Text => Ok(TypedValue::Text(raw.to_string())),
            AttrType::List => Ok(TypedValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
            )),
            AttrType::Integer { min, max } => match raw.trim().parse::<i64>() {
                Ok(value) if (*min..=*max).contains(&value) => Ok(TypedValue::Integer(value)),
                _ => Err(format!("expected an integer between {min} and {max}")),
            },
            AttrType::Float => match raw.trim().parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(TypedValue::Float(value)),
                _ => Err("expected a number".to_string()),
            },
            AttrType::Bool => match raw {
                "true" => Ok(TypedValue::Bool(true)),
                "false" => Ok(TypedValue::Bool(false)),
                _ => Err("expected `true` or `false`".to_string()),
            },
            AttrType::Choice(options) => match options.contains(&raw) {
                true => Ok(TypedValue::Text(raw.to_string())),
                false => Err(format!("expected one of: {}", options.join(", "))),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSpec {
    pub name: &'static str,
    pub ty: AttrType,
    pub required: bool,
    pub default: Option<&'static str>,
}

impl AttrSpec {
    pub const fn required(name: &'static str, ty: AttrType) -> Self {
        AttrSpec {
            name,
            ty,
            required: true,
            default: None,
        }
    }

    pub const fn optional(name: &'static str, ty: AttrType) -> Self {
        AttrSpec {
            name,
            ty,
            required: false,
            default: None,
        }
    }

    pub const fn with_default(name: &'static str, ty: AttrType, default: &'static str) -> Self {
        AttrSpec {
            name,
            ty,
            required: false,
            default: Some(default),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KindSchema {
    pub kind: EntityKind,
    pub attributes: Vec<AttrSpec>,
    /// Labels of `::name` sections this kind expects (the provenance label is always allowed).
    pub sections: &'static [&'static str],
    pub children: EnumSet<EntityKind>,
}

impl KindSchema {
    /// Kind-specific attribute spec, falling back to the common and provenance keys.
    pub fn attribute(&self, name: &str) -> Option<&AttrSpec> {
        self.attributes
            .iter()
            .chain(COMMON_ATTRIBUTES)
            .chain(PROVENANCE_ATTRIBUTES)
            .find(|spec| spec.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &AttrSpec> {
        self.attributes.iter().filter(|spec| spec.required)
    }

    pub fn allows_child(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Unknown || self.children.contains(kind)
    }

    pub fn allows_section(&self, label: &str) -> bool {
        label == crate::codec::directive::PROVENANCE_LABEL || self.sections.contains(&label)
    }
}

const MEDIA: EnumSet<EntityKind> = enum_set!(
    EntityKind::FigureBlock
        | EntityKind::TableBlock
        | EntityKind::ResultBlock
        | EntityKind::DiagramBlock
        | EntityKind::CodeBlock
        | EntityKind::ComparisonBlock
);

const DEFINITION_CHILDREN: EnumSet<EntityKind> = enum_set!(
    EntityKind::ExampleBlock | EntityKind::Hint | EntityKind::AdmonitionBlock | EntityKind::CodeBlock
);

const THEOREM_VARIANTS: &[&str] = &[
    "theorem",
    "lemma",
    "corollary",
    "proposition",
    "conjecture",
    "claim",
];
const ADMONITION_VARIANTS: &[&str] = &[
    "note",
    "tip",
    "info",
    "warning",
    "caution",
    "important",
    "danger",
];
const DIAGRAM_NOTATIONS: &[&str] = &["mermaid", "graphviz", "plantuml", "tikz", "ascii"];
const GRAMMAR_NOTATIONS: &[&str] = &["ebnf", "bnf", "abnf", "peg"];
const DIFFICULTIES: &[&str] = &["easy", "medium", "hard"];

use AttrType::*;

fn text(name: &'static str) -> AttrSpec {
    AttrSpec::optional(name, Text)
}

fn schema(
    kind: EntityKind,
    attributes: Vec<AttrSpec>,
    sections: &'static [&'static str],
    children: EnumSet<EntityKind>,
) -> KindSchema {
    KindSchema {
        kind,
        attributes,
        sections,
        children,
    }
}

/// Read-only mapping of kind → schema.
pub struct SchemaRegistry(BTreeMap<EntityKind, KindSchema>);

impl SchemaRegistry {
    /// Build the table for the full closed kind set.
    pub fn create() -> Self {
        use EntityKind as K;
        let none = EnumSet::empty();
        let schemas = vec![
            schema(
                K::SectionBlock,
                vec![AttrSpec::with_default(
                    "level",
                    Integer { min: 1, max: 6 },
                    "1",
                )],
                &[],
                EntityKind::known() - (K::ProofStep | K::Event),
            ),
            schema(
                K::FigureBlock,
                vec![AttrSpec::required("src", Text), text("alt"), text("width")],
                &["caption"],
                enum_set!(K::FigureBlock),
            ),
            schema(
                K::TableBlock,
                vec![AttrSpec::optional("alignments", List)],
                &["caption"],
                none,
            ),
            schema(
                K::ResultBlock,
                vec![text("metric"), text("value"), text("task"), text("dataset")],
                &["results", "caption"],
                none,
            ),
            schema(
                K::DiagramBlock,
                vec![AttrSpec::with_default(
                    "notation",
                    Choice(DIAGRAM_NOTATIONS),
                    "mermaid",
                )],
                &["source", "caption"],
                none,
            ),
            schema(
                K::CodeBlock,
                vec![
                    text("language"),
                    AttrSpec::with_default("executable", Bool, "false"),
                ],
                &["source", "output"],
                none,
            ),
            schema(
                K::ComparisonBlock,
                vec![AttrSpec::required("subjects", List)],
                &["criteria", "caption"],
                enum_set!(K::TableBlock | K::FigureBlock | K::ResultBlock),
            ),
            schema(K::AbstractBlock, vec![], &[], none),
            schema(
                K::TheoremBlock,
                vec![
                    AttrSpec::with_default("variant", Choice(THEOREM_VARIANTS), "theorem"),
                    text("name"),
                ],
                &["statement"],
                enum_set!(
                    K::ProofBlock
                        | K::GuaranteeBlock
                        | K::ExampleBlock
                        | K::Hint
                        | K::AdmonitionBlock
                        | K::FigureBlock
                        | K::DiagramBlock
                        | K::TableBlock
                ),
            ),
            schema(
                K::ProofBlock,
                vec![text("proves")],
                &[],
                enum_set!(
                    K::ProofStep
                        | K::FigureBlock
                        | K::DiagramBlock
                        | K::TableBlock
                        | K::CodeBlock
                        | K::Hint
                        | K::AdmonitionBlock
                        | K::ExampleBlock
                ),
            ),
            schema(
                K::GuaranteeBlock,
                vec![text("scope")],
                &["statement"],
                enum_set!(K::ProofBlock | K::ExampleBlock | K::Hint),
            ),
            schema(
                K::OperationBlock,
                vec![text("verb"), text("endpoint")],
                &[],
                MEDIA
                    | K::ExampleBlock
                    | K::GuaranteeBlock
                    | K::AdmonitionBlock
                    | K::TypeDef
                    | K::FunctionDef
                    | K::Hint,
            ),
            schema(
                K::ExampleBlock,
                vec![],
                &[],
                MEDIA | K::ExerciseBlock | K::Hint | K::AdmonitionBlock | K::QuoteBlock,
            ),
            schema(
                K::ExerciseBlock,
                vec![AttrSpec::optional("difficulty", Choice(DIFFICULTIES))],
                &["statement"],
                MEDIA | K::Hint | K::ExampleBlock | K::ProofBlock,
            ),
            schema(
                K::ProfileBlock,
                vec![text("name"), text("role"), text("affiliation")],
                &[],
                enum_set!(K::TimelineBlock | K::QuoteBlock | K::FigureBlock),
            ),
            schema(
                K::AdmonitionBlock,
                vec![AttrSpec::with_default(
                    "variant",
                    Choice(ADMONITION_VARIANTS),
                    "note",
                )],
                &[],
                MEDIA | K::ExampleBlock | K::QuoteBlock | K::Hint,
            ),
            schema(K::QuoteBlock, vec![text("author"), text("cite")], &[], none),
            schema(
                K::DialogueBlock,
                vec![AttrSpec::optional("speakers", List)],
                &[],
                none,
            ),
            schema(K::VerseBlock, vec![], &[], none),
            schema(
                K::LetterBlock,
                vec![text("to"), text("from"), text("date")],
                &[],
                none,
            ),
            schema(K::TimelineBlock, vec![], &[], enum_set!(K::Event)),
            schema(
                K::TypeDef,
                vec![text("language")],
                &["source"],
                DEFINITION_CHILDREN,
            ),
            schema(
                K::EnumDef,
                vec![AttrSpec::optional("variants", List)],
                &[],
                enum_set!(K::ExampleBlock | K::Hint),
            ),
            schema(
                K::FunctionDef,
                vec![text("signature"), text("language")],
                &["source"],
                DEFINITION_CHILDREN,
            ),
            schema(
                K::PredicateDef,
                vec![AttrSpec::optional("arity", Integer { min: 0, max: 64 })],
                &[],
                DEFINITION_CHILDREN,
            ),
            schema(
                K::NotationDef,
                vec![text("symbol")],
                &[],
                DEFINITION_CHILDREN,
            ),
            schema(K::TermDef, vec![text("term")], &[], DEFINITION_CHILDREN),
            schema(K::AxiomDef, vec![text("system")], &[], DEFINITION_CHILDREN),
            schema(
                K::RuleDef,
                vec![text("name")],
                &[],
                enum_set!(K::ExampleBlock | K::Hint),
            ),
            schema(
                K::GrammarDef,
                vec![AttrSpec::with_default(
                    "notation",
                    Choice(GRAMMAR_NOTATIONS),
                    "ebnf",
                )],
                &["source"],
                enum_set!(K::RuleDef | K::ExampleBlock | K::Hint),
            ),
            schema(
                K::JudgmentDef,
                vec![text("form")],
                &[],
                enum_set!(K::RuleDef | K::ExampleBlock | K::Hint),
            ),
            schema(
                K::ReferenceDef,
                vec![
                    AttrSpec::optional("authors", List),
                    AttrSpec::optional("year", Integer { min: 0, max: 9999 }),
                    text("doi"),
                    text("url"),
                ],
                &[],
                none,
            ),
            schema(
                K::ProofStep,
                vec![text("justification")],
                &[],
                enum_set!(K::ProofStep | K::Hint),
            ),
            schema(K::Event, vec![text("date")], &[], none),
            schema(K::Hint, vec![], &[], none),
        ];

        SchemaRegistry(
            schemas
                .into_iter()
                .map(|schema| (schema.kind, schema))
                .collect(),
        )
    }

    pub fn get(&self, kind: EntityKind) -> Option<&KindSchema> {
        self.0.get(&kind)
    }

    /// Resolve a directive kind string (canonical or short spelling) to its schema.
    pub fn lookup(&self, name: &str) -> Option<&KindSchema> {
        EntityKind::from_name(name).and_then(|kind| self.get(kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &KindSchema> {
        self.0.values()
    }

    /// Replacement for an unknown spelling. A name that is a `variant` of some kind, such as
    /// `lemma`, maps to that kind with the variant set (`theorem{variant=lemma}`); otherwise the
    /// closest canonical kind name within two edits.
    pub fn suggest_kind(&self, name: &str) -> Option<String> {
        let as_variant = self.0.values().find_map(|schema| {
            match schema.attributes.iter().find(|spec| spec.name == "variant")?.ty {
                AttrType::Choice(options) if options.contains(&name) => Some(format!(
                    "{}{{variant={name}}}",
                    schema.kind.short_name().unwrap_or(schema.kind.as_str())
                )),
                _ => None,
            }
        });
        if as_variant.is_some() {
            return as_variant;
        }
        self.0
            .keys()
            .flat_map(|kind| {
                std::iter::once(kind.as_str())
                    .chain(kind.short_name())
                    .map(move |spelling| (strsim::levenshtein(name, spelling), *kind))
            })
            .filter(|(distance, _)| *distance <= 2)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, kind)| kind.as_str().to_string())
    }
}
