//! Entity builder: maps [`RawNode`]s onto typed [`Entity`]s.
//!
//! Every problem found here is a diagnostic and building always continues, so the resulting
//! tree is structurally complete even for broken input: unknown kinds become
//! [`EntityKind::Unknown`] placeholders, missing attributes default to empty and mistyped values
//! stay quotable in [`Entity::raw_attributes`].

use std::collections::BTreeMap;

use crate::{
    codec::{
        diagnostic::{Diagnostic, DiagnosticKind, DiagnosticSink},
        directive::{RawDocument, RawNode, PROVENANCE_LABEL},
        frontmatter::{text_field, Frontmatter},
        md::split_reference_target,
        schema_registry::{KindSchema, PROVENANCE_ATTRIBUTES, SCHEMAS},
    },
    config::BuildConfig,
    properties::{
        normalize_id, Document, Entity, EntityData, EntityKind, Reference, ReferenceOrigin, Span,
        TypedAttributes,
    },
    provenance::{attach, DocumentProvenance},
};

#[derive(Debug, Clone)]
pub struct EntityBuilder {
    unknown_attributes_warn: bool,
}

impl Default for EntityBuilder {
    fn default() -> Self {
        EntityBuilder::new(&BuildConfig::default())
    }
}

/// `proves="#thm-1"`, `proves="defs.md#thm-1"` or a bare `proves="thm-1"`.
fn proves_target(value: &str) -> Option<(Option<String>, String)> {
    if value.contains('#') {
        return split_reference_target(value);
    }
    if value.contains('/') || value.contains("://") {
        return None;
    }
    normalize_id(value).map(|id| (None, id))
}

impl EntityBuilder {
    pub fn new(config: &BuildConfig) -> Self {
        EntityBuilder {
            unknown_attributes_warn: config.unknown_attributes_warn,
        }
    }

    /// Build a [`Document`] from a scanned tree. `document_id` is used unless the frontmatter
    /// declares a `documentId`; in that case `sink` is re-keyed to the declared id.
    #[tracing::instrument(skip_all, fields(document = document_id))]
    pub fn build(
        &self,
        raw: RawDocument,
        document_id: &str,
        path: Option<&str>,
        sink: &mut DiagnosticSink,
    ) -> Document {
        let (frontmatter, frontmatter_span) = match &raw.frontmatter {
            Some(found) => match Frontmatter::parse(&found.yaml) {
                Ok(parsed) => (parsed, found.span),
                Err(err) => {
                    sink.report(
                        DiagnosticKind::MalformedFrontmatter,
                        found.span,
                        format!("frontmatter is not valid YAML: {err}"),
                    );
                    (Frontmatter::default(), found.span)
                }
            },
            None => (Frontmatter::default(), Span::default()),
        };

        let declared_id = text_field(
            frontmatter.document_id.as_ref(),
            "documentId",
            DiagnosticKind::MalformedFrontmatter,
            frontmatter_span,
            sink,
        )
        .as_deref()
        .and_then(normalize_id);
        let title = text_field(
            frontmatter.title.as_ref(),
            "title",
            DiagnosticKind::MalformedFrontmatter,
            frontmatter_span,
            sink,
        );
        let id_span = match (&declared_id, &raw.frontmatter) {
            (Some(_), Some(found)) => found.id_line.unwrap_or(found.span),
            _ => Span::new(0, 0, 1, 1),
        };
        let id = declared_id.unwrap_or_else(|| document_id.to_string());
        if id != sink.document_id() {
            sink.rename(&id);
        }
        let provenance = DocumentProvenance::from_frontmatter(
            frontmatter.provenance.as_ref(),
            frontmatter_span,
            sink,
        );

        let mut entities: Vec<Entity> = Vec::with_capacity(raw.nodes.len());
        let mut references = raw.references;
        for node in raw.nodes.iter() {
            let parent_kind = node
                .parent
                .and_then(|parent| entities.get(parent))
                .map(|parent| parent.kind);
            let entity = self.build_entity(node, parent_kind, &provenance, sink);
            if let EntityData::Proof {
                proves: Some(target),
            } = &entity.data
            {
                match proves_target(target) {
                    Some((target_document, target)) => references.push(Reference {
                        source: Some(entity.index),
                        target_document,
                        target,
                        label: String::new(),
                        origin: ReferenceOrigin::Proves,
                        span: node.header,
                    }),
                    None => {
                        sink.report(
                            DiagnosticKind::InvalidAttribute,
                            node.header,
                            format!(
                                "`proves=\"{target}\"` is not an entity reference, expected `#id` or `path#id`"
                            ),
                        );
                    }
                }
            }
            entities.push(entity);
        }

        let mut registry = BTreeMap::new();
        for entity in entities.iter() {
            if let Some(local_id) = &entity.local_id {
                registry.entry(local_id.clone()).or_insert(entity.index);
            }
        }

        for reference in references.iter_mut() {
            if let Some(target) = normalize_id(&reference.target) {
                reference.target = target;
            }
        }
        references.sort_by_key(|reference| (reference.span.start, reference.span.end));

        tracing::debug!(
            "built {} entities and {} reference(s) for {id}",
            entities.len(),
            references.len()
        );
        Document {
            id,
            id_span,
            path: path.map(String::from),
            title,
            content_hash: raw.content_hash,
            provenance,
            entities,
            roots: raw.roots,
            registry,
            references,
        }
    }

    fn build_entity(
        &self,
        node: &RawNode,
        parent_kind: Option<EntityKind>,
        provenance: &DocumentProvenance,
        sink: &mut DiagnosticSink,
    ) -> Entity {
        let kind = match EntityKind::from_name(&node.kind) {
            Some(kind) => kind,
            None => {
                let diagnostic = sink.report(
                    DiagnosticKind::UnknownKind,
                    node.header,
                    format!("unknown directive kind `{}`", node.kind),
                );
                if let Some(suggestion) = SCHEMAS.suggest_kind(&node.kind) {
                    diagnostic.suggestion = Some(suggestion);
                }
                EntityKind::Unknown
            }
        };
        let schema = SCHEMAS.get(kind);

        if let Some(parent) = parent_kind.and_then(|parent| SCHEMAS.get(parent)) {
            if !parent.allows_child(kind) {
                sink.report(
                    DiagnosticKind::DisallowedChild,
                    node.header,
                    format!("`{kind}` is not allowed inside `{}`", parent.kind),
                );
            }
        }

        let mut raw_attributes: BTreeMap<String, String> = BTreeMap::new();
        for attribute in node.attributes.iter() {
            if raw_attributes.contains_key(&attribute.key) {
                sink.report(
                    DiagnosticKind::DuplicateAttribute,
                    node.header,
                    format!(
                        "attribute `{}` is given more than once, keeping the first value",
                        attribute.key
                    ),
                );
                continue;
            }
            raw_attributes.insert(attribute.key.clone(), attribute.value.clone());
        }

        let mut local_id = node.id.clone();
        if let Some(id) = raw_attributes.get("id") {
            match &local_id {
                Some(shorthand) => {
                    sink.report(
                        DiagnosticKind::DuplicateAttribute,
                        node.header,
                        format!("both `#{shorthand}` and `id={id}` are given, keeping `#{shorthand}`"),
                    );
                }
                None => local_id = Some(id.clone()),
            }
        }
        let local_id = local_id.as_deref().and_then(normalize_id);
        let alias = raw_attributes.get("alias").and_then(|alias| normalize_id(alias));
        let title = raw_attributes.get("title").cloned();

        let typed = match schema {
            Some(schema) => self.check_attributes(node, schema, &raw_attributes, sink),
            None => {
                check_provenance_attributes(node, &raw_attributes, sink);
                TypedAttributes::default()
            }
        };
        let data = EntityData::from_attributes(kind, &typed, &node.kind);

        let rich = node
            .sections
            .iter()
            .find(|section| section.label == PROVENANCE_LABEL);
        let record = attach(&raw_attributes, rich, provenance, node.header, sink);

        Entity {
            index: node.index,
            kind,
            kind_name: node.kind.clone(),
            local_id,
            alias,
            title,
            data,
            raw_attributes,
            sections: node.sections.clone(),
            text: node.text.clone(),
            parent: node.parent,
            children: node.children.clone(),
            provenance: record,
            span: node.span,
        }
    }

    /// Type-check attributes against `schema`, fill defaults and report missing, mistyped and
    /// unknown attributes as well as unexpected sections.
    fn check_attributes(
        &self,
        node: &RawNode,
        schema: &KindSchema,
        raw_attributes: &BTreeMap<String, String>,
        sink: &mut DiagnosticSink,
    ) -> TypedAttributes {
        let mut typed = TypedAttributes::default();
        for (key, value) in raw_attributes.iter() {
            match schema.attribute(key) {
                Some(spec) => match spec.ty.coerce(value) {
                    Ok(coerced) => typed.insert(spec.name, coerced),
                    Err(expected) => {
                        sink.report(
                            DiagnosticKind::InvalidAttribute,
                            node.header,
                            format!("`{key}=\"{value}\"` on `{}`: {expected}", schema.kind),
                        );
                    }
                },
                None if self.unknown_attributes_warn => {
                    sink.report(
                        DiagnosticKind::UnknownAttribute,
                        node.header,
                        format!("`{}` does not declare an attribute `{key}`", schema.kind),
                    );
                }
                None => {}
            }
        }

        for spec in schema.attributes.iter() {
            if typed.0.contains_key(spec.name) {
                continue;
            }
            if spec.required && !raw_attributes.contains_key(spec.name) {
                sink.report(
                    DiagnosticKind::MissingAttribute,
                    node.header,
                    format!("missing required attribute: {}", spec.name),
                );
                continue;
            }
            if let Some(Ok(default)) = spec.default.map(|default| spec.ty.coerce(default)) {
                typed.insert(spec.name, default);
            }
        }

        for section in node.sections.iter() {
            if !schema.allows_section(&section.label) {
                sink.report(
                    DiagnosticKind::UnexpectedSection,
                    section.span,
                    format!(
                        "`{}` does not expect a `::{}` section",
                        schema.kind, section.label
                    ),
                );
            }
        }
        typed
    }
}

/// Without a schema only the provenance keys have a known type; check those so a bad
/// `confidence` on a misspelled kind is still reported.
fn check_provenance_attributes(
    node: &RawNode,
    raw_attributes: &BTreeMap<String, String>,
    sink: &mut DiagnosticSink,
) {
    for spec in PROVENANCE_ATTRIBUTES {
        let Some(value) = raw_attributes.get(spec.name) else {
            continue;
        };
        if let Err(expected) = spec.ty.coerce(value) {
            sink.report(
                DiagnosticKind::InvalidAttribute,
                node.header,
                format!("`{}=\"{value}\"` on `{}`: {expected}", spec.name, node.kind),
            );
        }
    }
}

/// Build `raw` with default settings, returning the document and its schema diagnostics.
pub fn build(raw: RawDocument, document_id: &str) -> (Document, Vec<Diagnostic>) {
    let mut sink = DiagnosticSink::new(document_id);
    let document = EntityBuilder::default().build(raw, document_id, None, &mut sink);
    (document, sink.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::directive::parse;
    use pretty_assertions::assert_eq;

    fn build_text(text: &str) -> (Document, Vec<Diagnostic>) {
        let (raw, mut diagnostics) = parse(text);
        let (document, built) = build(raw, "doc.md");
        diagnostics.extend(built);
        (document, diagnostics)
    }

    fn kinds(diagnostics: &[Diagnostic]) -> Vec<DiagnosticKind> {
        diagnostics.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_typed_payloads() {
        let text = "\
:::figure_block{#fig-arch src=\"arch.png\" alt=\"Architecture Diagram\"}
::caption
System architecture.
:::
:::code_block{#code-hello language=\"python\" executable=true}
::source
print(\"Hello VERA\")
:::
";
        let (document, diagnostics) = build_text(text);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(
            document.entities[0].data,
            EntityData::Figure {
                src: "arch.png".into(),
                alt: Some("Architecture Diagram".into()),
                width: None,
            }
        );
        assert_eq!(
            document.entities[1].data,
            EntityData::Code {
                language: Some("python".into()),
                executable: true,
            }
        );
        assert_eq!(
            document.entities[0].section("caption").map(|s| s.text.as_str()),
            Some("System architecture.")
        );
    }

    #[test]
    fn test_missing_required_attribute() {
        let (document, diagnostics) = build_text(":::figure_block{#fig-1}\n:::\n");
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::MissingAttribute]);
        assert_eq!(diagnostics[0].message, "missing required attribute: src");
        assert_eq!(
            document.entities[0].data,
            EntityData::Figure {
                src: String::new(),
                alt: None,
                width: None,
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_a_placeholder() {
        let (document, diagnostics) = build_text(":::theorm{#t}\nclaim\n:::\n");
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::UnknownKind]);
        assert_eq!(diagnostics[0].suggestion.as_deref(), Some("theorem_block"));
        let entity = &document.entities[0];
        assert_eq!(entity.kind, EntityKind::Unknown);
        assert_eq!(entity.local_id.as_deref(), Some("t"));
        assert_eq!(
            entity.data,
            EntityData::Unknown {
                name: "theorm".into()
            }
        );
    }

    #[test]
    fn test_mistyped_values_are_retained() {
        let (document, diagnostics) =
            build_text(":::code_block{#c executable=yes confidence=high}\n:::\n");
        assert_eq!(
            kinds(&diagnostics),
            vec![
                DiagnosticKind::InvalidAttribute,
                DiagnosticKind::InvalidAttribute
            ]
        );
        let entity = &document.entities[0];
        assert_eq!(entity.raw_attributes["executable"], "yes");
        assert_eq!(entity.raw_attributes["confidence"], "high");
        assert_eq!(entity.provenance.confidence, None);
    }

    #[test]
    fn test_variant_spelling_points_at_owning_kind() {
        let (document, diagnostics) = build_text(":::lemma{#l}\nclaim\n:::\n");
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::UnknownKind]);
        assert_eq!(
            diagnostics[0].suggestion.as_deref(),
            Some("theorem{variant=lemma}")
        );
        assert_eq!(document.entities[0].kind, EntityKind::Unknown);
    }

    #[test]
    fn test_unknown_kind_still_checks_confidence() {
        let (document, diagnostics) = build_text(":::theorm{#t confidence=high}\n:::\n");
        assert_eq!(
            kinds(&diagnostics),
            vec![DiagnosticKind::UnknownKind, DiagnosticKind::InvalidAttribute]
        );
        assert_eq!(document.entities[0].provenance.confidence, None);
    }

    #[test]
    fn test_non_finite_confidence_is_reported_once() {
        for value in ["NaN", "inf", "-infinity"] {
            let (document, diagnostics) =
                build_text(&format!(":::theorem{{#t confidence={value}}}\n:::\n"));
            let confidence: Vec<DiagnosticKind> = kinds(&diagnostics)
                .into_iter()
                .filter(|kind| {
                    matches!(
                        kind,
                        DiagnosticKind::InvalidAttribute | DiagnosticKind::ConfidenceOutOfRange
                    )
                })
                .collect();
            assert_eq!(confidence, vec![DiagnosticKind::InvalidAttribute], "{value}");
            assert_eq!(document.entities[0].provenance.confidence, None);
        }
    }

    #[test]
    fn test_defaults_and_short_names() {
        let (document, diagnostics) =
            build_text(":::admonition\nCareful.\n:::\n:::section{#s level=3}\n:::\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(document.entities[0].kind, EntityKind::AdmonitionBlock);
        assert_eq!(
            document.entities[0].data,
            EntityData::Admonition {
                variant: "note".into()
            }
        );
        assert_eq!(document.entities[1].data, EntityData::Section { level: 3 });
    }

    #[test]
    fn test_disallowed_child_and_unexpected_section() {
        let text = ":::timeline_block\n:::hint\n:::\n:::\n:::hint\n::caption\nx\n:::\n";
        let (_, diagnostics) = build_text(text);
        assert_eq!(
            kinds(&diagnostics),
            vec![
                DiagnosticKind::DisallowedChild,
                DiagnosticKind::UnexpectedSection
            ]
        );
    }

    #[test]
    fn test_unknown_and_duplicate_attributes_warn() {
        let (_, diagnostics) = build_text(":::hint{#h colour=red colour=blue}\n:::\n");
        assert_eq!(
            kinds(&diagnostics),
            vec![
                DiagnosticKind::DuplicateAttribute,
                DiagnosticKind::UnknownAttribute
            ]
        );
        assert!(diagnostics.iter().all(Diagnostic::is_warning));
    }

    #[test]
    fn test_id_attribute_and_alias() {
        let (document, diagnostics) =
            build_text(":::term_def{id=term-entropy alias=entropy term=\"Entropy\"}\n:::\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let entity = &document.entities[0];
        assert_eq!(entity.local_id.as_deref(), Some("term-entropy"));
        assert_eq!(entity.alias.as_deref(), Some("entropy"));
    }

    #[test]
    fn test_proves_attribute_becomes_a_reference() {
        let text = ":::theorem{#thm-a}\nA.\n:::\n:::proof_block{proves=\"#thm-a\"}\nB.\n:::\n";
        let (document, diagnostics) = build_text(text);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(document.references.len(), 1);
        let reference = &document.references[0];
        assert_eq!(reference.origin, ReferenceOrigin::Proves);
        assert_eq!(reference.source, Some(1));
        assert_eq!(reference.target, "thm-a");
    }

    #[test]
    fn test_frontmatter_document_id_and_provenance() {
        let text = "---\ndocumentId: analysis\ntitle: Analysis\nprovenance:\n  extraction:\n    method: ocr\n    confidence: 0.8\n---\n:::figure{src=a.png}\n:::\n:::figure{#f2}\n:::\n";
        let (document, diagnostics) = build_text(text);
        assert_eq!(document.id, "analysis");
        assert_eq!(document.title.as_deref(), Some("Analysis"));
        assert_eq!(document.entities[0].provenance.method.as_deref(), Some("ocr"));
        assert_eq!(document.entities[0].provenance.confidence, Some(0.8));
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::MissingAttribute]);
        assert_eq!(diagnostics[0].document_id, "analysis");
        assert_eq!(document.content_hash.len(), 64);
    }

    #[test]
    fn test_registry_keeps_first_declaration() {
        let (document, _) = build_text(":::hint{#h}\nfirst\n:::\n:::hint{#h}\nsecond\n:::\n:::hint\n:::\n");
        assert_eq!(document.registry.len(), 1);
        assert_eq!(document.registry["h"], 0);
        assert_eq!(document.find_by_local_id("h").map(|e| e.text.as_str()), Some("first"));
        assert!(document.find_by_local_id("missing").is_none());
    }

    #[test]
    fn test_non_text_document_id_keeps_rest_of_frontmatter() {
        let text = "---\ndocumentId: [a, b]\ntitle: Analysis\n---\n:::hint\n:::\n";
        let (document, diagnostics) = build_text(text);
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::MalformedFrontmatter]);
        assert!(diagnostics[0].message.contains("`documentId`"));
        assert_eq!(document.id, "doc.md");
        assert_eq!(document.title.as_deref(), Some("Analysis"));
        assert_eq!(document.id_span.line, 1);
    }

    #[test]
    fn test_document_id_span_points_at_declaration() {
        let text = "---\ntitle: T\ndocumentId: 42\n---\n";
        let (document, diagnostics) = build_text(text);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(document.id, "42");
        assert_eq!(document.id_span.line, 3);
    }

    #[test]
    fn test_malformed_frontmatter() {
        let (document, diagnostics) = build_text("---\n: : [\n---\n:::hint\n:::\n");
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::MalformedFrontmatter]);
        assert_eq!(document.id, "doc.md");
        assert_eq!(document.entities.len(), 1);
    }

    #[test]
    fn test_list_attribute() {
        let (document, _) =
            build_text(":::comparison{#cmp subjects=\"GPT-4, Claude 3\"}\n:::\n");
        assert_eq!(
            document.entities[0].data,
            EntityData::Comparison {
                subjects: vec!["GPT-4".into(), "Claude 3".into()]
            }
        );
    }
}
