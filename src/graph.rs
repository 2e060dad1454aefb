//! The validated document graph handed to renderers.
//!
//! Read-only by construction: documents and edges are only reachable through shared
//! references. Edges are additionally indexed in a [`petgraph`] graph whose nodes are documents
//! (for references written outside any directive) and entities, so backlink queries do not scan
//! the whole edge list.

use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
    Direction,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::{
    error::VeraError,
    properties::{normalize_id, Document, Entity, EntityHandle, ReferenceOrigin, Span},
    resolver::{ReferenceEdge, ResolvedGraph},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum GraphNode {
    Document(usize),
    Entity(EntityHandle),
}

#[derive(Debug, Clone)]
pub struct DocumentGraph {
    documents: Vec<Document>,
    edges: Vec<ReferenceEdge>,
    index: DiGraph<GraphNode, usize>,
    nodes: BTreeMap<GraphNode, NodeIndex>,
}

/// JSON form of a [`ReferenceEdge`], addressed by document id and entity id.
#[derive(Debug, Clone, Serialize)]
struct ExportedEdge<'a> {
    source_document: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_entity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_id: Option<&'a str>,
    target_document: &'a str,
    target_entity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_id: Option<&'a str>,
    origin: ReferenceOrigin,
    label: &'a str,
    span: Span,
}

#[derive(Debug, Clone, Serialize)]
struct ExportedGraph<'a> {
    documents: &'a [Document],
    edges: Vec<ExportedEdge<'a>>,
}

impl DocumentGraph {
    pub fn new(documents: Vec<Document>, resolved: ResolvedGraph) -> Self {
        let mut index = DiGraph::new();
        let mut nodes = BTreeMap::new();
        for (position, document) in documents.iter().enumerate() {
            let node = GraphNode::Document(position);
            nodes.insert(node, index.add_node(node));
            for entity in document.entities.iter() {
                let node = GraphNode::Entity(EntityHandle::new(position, entity.index));
                nodes.insert(node, index.add_node(node));
            }
        }

        let edges = resolved.edges;
        for (weight, edge) in edges.iter().enumerate() {
            let source = match edge.source {
                Some(handle) => GraphNode::Entity(handle),
                None => GraphNode::Document(edge.source_document),
            };
            if let (Some(from), Some(to)) = (
                nodes.get(&source),
                nodes.get(&GraphNode::Entity(edge.target)),
            ) {
                index.add_edge(*from, *to, weight);
            }
        }

        DocumentGraph {
            documents,
            edges,
            index,
            nodes,
        }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn edges(&self) -> &[ReferenceEdge] {
        &self.edges
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|document| document.id == id)
    }

    pub fn entity(&self, handle: EntityHandle) -> Option<&Entity> {
        self.documents
            .get(handle.document)
            .and_then(|document| document.entity(handle.entity))
    }

    /// Find an entity by document id and local id (or alias, for entities without a local id).
    pub fn lookup(&self, document_id: &str, identifier: &str) -> Option<EntityHandle> {
        let identifier = normalize_id(identifier)?;
        let position = self
            .documents
            .iter()
            .position(|document| document.id == document_id)?;
        let document = &self.documents[position];
        document
            .find_by_local_id(&identifier)
            .or_else(|| {
                document.entities.iter().find(|entity| {
                    entity.local_id.is_none() && entity.alias.as_deref() == Some(identifier.as_str())
                })
            })
            .map(|entity| EntityHandle::new(position, entity.index))
    }

    fn collect_edges(&self, node: GraphNode, direction: Direction) -> Vec<&ReferenceEdge> {
        let Some(node) = self.nodes.get(&node) else {
            return vec![];
        };
        let mut found: Vec<&ReferenceEdge> = self
            .index
            .edges_directed(*node, direction)
            .filter_map(|edge| self.edges.get(*edge.weight()))
            .collect();
        found.sort_by_key(|edge| (edge.source_document, edge.reference));
        found
    }

    /// Every resolved reference pointing at `handle`.
    pub fn backlinks(&self, handle: EntityHandle) -> Vec<&ReferenceEdge> {
        self.collect_edges(GraphNode::Entity(handle), Direction::Incoming)
    }

    /// Every resolved reference written inside `handle` (not counting nested entities).
    pub fn references_from(&self, handle: EntityHandle) -> Vec<&ReferenceEdge> {
        self.collect_edges(GraphNode::Entity(handle), Direction::Outgoing)
    }

    /// Resolved references written in a document outside of any directive.
    pub fn document_references(&self, document: usize) -> Vec<&ReferenceEdge> {
        self.collect_edges(GraphNode::Document(document), Direction::Outgoing)
    }

    fn export_edge<'a>(&'a self, edge: &'a ReferenceEdge) -> Option<ExportedEdge<'a>> {
        let source_document = self.documents.get(edge.source_document)?;
        let reference = source_document.references.get(edge.reference)?;
        let target_document = self.documents.get(edge.target.document)?;
        let target = target_document.entity(edge.target.entity)?;
        let source = edge.source.and_then(|handle| self.entity(handle));
        Some(ExportedEdge {
            source_document: &source_document.id,
            source_entity: edge.source.map(|handle| handle.entity),
            source_id: source.and_then(|entity| entity.local_id.as_deref()),
            target_document: &target_document.id,
            target_entity: target.index,
            target_id: target.local_id.as_deref(),
            origin: edge.origin,
            label: &reference.label,
            span: reference.span,
        })
    }

    /// `{"documents": [...], "edges": [...]}`: one object per document plus the edge list.
    pub fn to_json(&self) -> Result<serde_json::Value, VeraError> {
        let exported = ExportedGraph {
            documents: &self.documents,
            edges: self
                .edges
                .iter()
                .filter_map(|edge| self.export_edge(edge))
                .collect(),
        };
        Ok(serde_json::to_value(exported)?)
    }

    pub fn to_json_string(&self) -> Result<String, VeraError> {
        Ok(serde_json::to_string_pretty(&self.to_json()?)?)
    }
}
