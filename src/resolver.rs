//! Two-pass reference resolution.
//!
//! 1. [`SymbolTable::collect`] walks every built document once and records `(document,
//!    identifier) → entity` for local ids and, for entities without a local id, aliases.
//!    Duplicates, shadowed aliases and ambiguous identifiers are reported here.
//! 2. [`bind_document`] looks every pending [`Reference`] of one document up in the finished,
//!    read-only table.
//!
//! The table is a plain value owned by the caller. Nothing here is global, so independent builds
//! never observe each other.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    codec::diagnostic::{Diagnostic, DiagnosticKind},
    properties::{Document, EntityHandle, ReferenceOrigin, Span},
};

/// Largest edit distance at which an intra-document identifier is offered as a suggestion.
pub const SUGGESTION_DISTANCE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symbol {
    Entity(usize),
    /// Declared as a local id by one entity and as an alias by another.
    Ambiguous,
}

/// Outcome of [`SymbolTable::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found(EntityHandle),
    Missing,
    Ambiguous,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    ids: BTreeMap<String, usize>,
    paths: BTreeMap<String, usize>,
    symbols: Vec<BTreeMap<String, Symbol>>,
}

/// Resolve `path` against `dir`, folding `.` and `..` segments.
fn join_relative(dir: &str, path: &str) -> String {
    let mut parts: Vec<&str> = dir.split('/').filter(|part| !part.is_empty()).collect();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    parts.join("/")
}

fn describe_spans(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|span| span.line.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

impl SymbolTable {
    /// Collection pass over every document of a build.
    #[tracing::instrument(skip_all, fields(documents = documents.len()))]
    pub fn collect(documents: &[Document]) -> (SymbolTable, Vec<Diagnostic>) {
        let mut table = SymbolTable::default();
        let mut diagnostics = vec![];

        for (index, document) in documents.iter().enumerate() {
            match table.ids.get(&document.id) {
                Some(first) => diagnostics.push(Diagnostic::new(
                    DiagnosticKind::DuplicateDocument,
                    document.id.clone(),
                    document.id_span,
                    format!(
                        "document id `{}` is used by both `{}` and `{}`",
                        document.id,
                        documents[*first].path.as_deref().unwrap_or(&documents[*first].id),
                        document.path.as_deref().unwrap_or(&document.id),
                    ),
                )),
                None => {
                    table.ids.insert(document.id.clone(), index);
                }
            }
            if let Some(path) = &document.path {
                table.paths.entry(path.clone()).or_insert(index);
            }
            table
                .symbols
                .push(collect_document(document, &mut diagnostics));
        }

        tracing::debug!(
            "collected {} identifier(s) across {} document(s)",
            table.symbols.iter().map(BTreeMap::len).sum::<usize>(),
            documents.len()
        );
        (table, diagnostics)
    }

    /// Build-position of the document addressed by `path` from `source`: matched against
    /// document ids, then document paths, then paths relative to `source`'s directory.
    pub fn resolve_document(&self, source: &Document, path: &str) -> Option<usize> {
        if let Some(index) = self.ids.get(path).or_else(|| self.paths.get(path)) {
            return Some(*index);
        }
        let relative = join_relative(source.directory(), path);
        self.ids
            .get(&relative)
            .or_else(|| self.paths.get(&relative))
            .copied()
    }

    pub fn lookup(&self, document: usize, identifier: &str) -> Lookup {
        match self
            .symbols
            .get(document)
            .and_then(|symbols| symbols.get(identifier))
        {
            Some(Symbol::Entity(entity)) => Lookup::Found(EntityHandle::new(document, *entity)),
            Some(Symbol::Ambiguous) => Lookup::Ambiguous,
            None => Lookup::Missing,
        }
    }
}

fn collect_document(
    document: &Document,
    diagnostics: &mut Vec<Diagnostic>,
) -> BTreeMap<String, Symbol> {
    let mut symbols = BTreeMap::new();

    let mut declared: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    let mut aliased: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for entity in document.entities.iter() {
        if let Some(id) = &entity.local_id {
            declared.entry(id.as_str()).or_default().push(entity.index);
        }
        if let Some(alias) = &entity.alias {
            match &entity.local_id {
                Some(id) => diagnostics.push(Diagnostic::new(
                    DiagnosticKind::AliasShadowed,
                    document.id.clone(),
                    entity.span,
                    format!("alias `{alias}` is ignored because the entity declares the id `#{id}`"),
                )),
                None => aliased.entry(alias.as_str()).or_default().push(entity.index),
            }
        }
    }

    let span_of = |index: &usize| document.entities[*index].span;
    for (id, occurrences) in declared.iter() {
        symbols.insert(id.to_string(), Symbol::Entity(occurrences[0]));
        report_duplicates(document, id, occurrences, diagnostics);
    }
    for (alias, occurrences) in aliased.iter() {
        match symbols.get(*alias) {
            Some(Symbol::Entity(owner)) => {
                let owner_span = span_of(owner);
                let mut spans = vec![owner_span];
                spans.extend(occurrences.iter().map(span_of));
                report_ambiguous(document, alias, spans, diagnostics);
                symbols.insert(alias.to_string(), Symbol::Ambiguous);
            }
            _ => {
                symbols.insert(alias.to_string(), Symbol::Entity(occurrences[0]));
                report_duplicates(document, alias, occurrences, diagnostics);
            }
        }
    }
    symbols
}

/// One `duplicate-id` naming every occurrence; the first declaration is the one bound.
fn report_duplicates(
    document: &Document,
    identifier: &str,
    occurrences: &[usize],
    diagnostics: &mut Vec<Diagnostic>,
) {
    if occurrences.len() < 2 {
        return;
    }
    let spans: Vec<Span> = occurrences
        .iter()
        .map(|index| document.entities[*index].span)
        .collect();
    diagnostics.push(
        Diagnostic::new(
            DiagnosticKind::DuplicateId,
            document.id.clone(),
            spans[1],
            format!(
                "identifier `#{identifier}` is declared {} times (lines {})",
                spans.len(),
                describe_spans(&spans)
            ),
        )
        .with_related(spans),
    );
}

fn report_ambiguous(
    document: &Document,
    identifier: &str,
    spans: Vec<Span>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    diagnostics.push(
        Diagnostic::new(
            DiagnosticKind::AmbiguousIdentifier,
            document.id.clone(),
            spans[spans.len() - 1],
            format!(
                "`{identifier}` is both a local id and an alias of another entity (lines {})",
                describe_spans(&spans)
            ),
        )
        .with_related(spans),
    );
}

/// Nearest local id of `document` within [`SUGGESTION_DISTANCE`] edits, earliest declaration
/// first on ties.
pub fn suggest(document: &Document, identifier: &str) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;
    for id in document
        .entities
        .iter()
        .filter_map(|entity| entity.local_id.as_deref())
    {
        let distance = strsim::levenshtein(identifier, id);
        if distance <= SUGGESTION_DISTANCE && best.is_none_or(|(nearest, _)| distance < nearest) {
            best = Some((distance, id));
        }
    }
    best.map(|(_, id)| format!("#{id}"))
}

/// A reference bound to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEdge {
    pub source_document: usize,
    /// Position in the source document's `references`.
    pub reference: usize,
    /// `None` for references written outside any directive.
    pub source: Option<EntityHandle>,
    pub target: EntityHandle,
    pub origin: ReferenceOrigin,
}

/// A reference that could not be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub document: usize,
    pub reference: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedGraph {
    pub edges: Vec<ReferenceEdge>,
    pub unresolved: Vec<UnresolvedReference>,
}

impl ResolvedGraph {
    /// Merge per-document binding results. Callers may pass them in any order; the result is
    /// ordered by source document and reference position.
    pub fn merge(parts: impl IntoIterator<Item = ResolvedGraph>) -> ResolvedGraph {
        let mut merged = ResolvedGraph::default();
        for part in parts {
            merged.edges.extend(part.edges);
            merged.unresolved.extend(part.unresolved);
        }
        merged
            .edges
            .sort_by_key(|edge| (edge.source_document, edge.reference));
        merged
            .unresolved
            .sort_by_key(|unresolved| (unresolved.document, unresolved.reference));
        merged
    }

    /// The edge bound for a given reference, if any.
    pub fn edge_for(&self, document: usize, reference: usize) -> Option<&ReferenceEdge> {
        self.edges
            .binary_search_by_key(&(document, reference), |edge| {
                (edge.source_document, edge.reference)
            })
            .ok()
            .map(|position| &self.edges[position])
    }
}

/// Binding pass for a single document against a finished table.
#[tracing::instrument(skip_all, fields(document = documents[index].id.as_str()))]
pub fn bind_document(
    table: &SymbolTable,
    documents: &[Document],
    index: usize,
) -> (ResolvedGraph, Vec<Diagnostic>) {
    let document = &documents[index];
    let mut resolved = ResolvedGraph::default();
    let mut diagnostics = vec![];

    for (position, reference) in document.references.iter().enumerate() {
        let unresolved = UnresolvedReference {
            document: index,
            reference: position,
        };
        let target_document = match &reference.target_document {
            None => index,
            Some(path) => match table.resolve_document(document, path) {
                Some(target) => target,
                None => {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::UnknownDocument,
                        document.id.clone(),
                        reference.span,
                        format!(
                            "reference `{}` names a document that is not part of this build",
                            reference.target_string()
                        ),
                    ));
                    resolved.unresolved.push(unresolved);
                    continue;
                }
            },
        };

        match table.lookup(target_document, &reference.target) {
            Lookup::Found(target) => resolved.edges.push(ReferenceEdge {
                source_document: index,
                reference: position,
                source: reference
                    .source
                    .map(|entity| EntityHandle::new(index, entity)),
                target,
                origin: reference.origin,
            }),
            Lookup::Ambiguous => resolved.unresolved.push(unresolved),
            Lookup::Missing => {
                let mut diagnostic = Diagnostic::new(
                    DiagnosticKind::UnresolvedReference,
                    document.id.clone(),
                    reference.span,
                    format!("unresolved reference `{}`", reference.target_string()),
                );
                if target_document == index {
                    if let Some(suggestion) = suggest(document, &reference.target) {
                        diagnostic = diagnostic.with_suggestion(suggestion);
                    }
                }
                diagnostics.push(diagnostic);
                resolved.unresolved.push(unresolved);
            }
        }
    }

    tracing::debug!(
        "bound {} of {} reference(s)",
        resolved.edges.len(),
        document.references.len()
    );
    (resolved, diagnostics)
}

/// Run both passes sequentially over `documents`.
pub fn resolve(documents: &[Document]) -> (ResolvedGraph, Vec<Diagnostic>) {
    let (table, mut diagnostics) = SymbolTable::collect(documents);
    let mut parts = Vec::with_capacity(documents.len());
    for index in 0..documents.len() {
        let (part, bound) = bind_document(&table, documents, index);
        parts.push(part);
        diagnostics.extend(bound);
    }
    (ResolvedGraph::merge(parts), diagnostics)
}
