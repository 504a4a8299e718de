//! JSON export of a whole session graph, for persistence and external audit
//! tools. Field names and enum spellings below are the exchange format.

use crate::analysis::invariants;
use crate::error::ExportError;
use crate::store::{Edge, EdgeId, LineageGraph, Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub session_id: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub active_edge_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub metadata: GraphMetadata,
    pub nodes: BTreeMap<NodeId, Node>,
    pub edges: BTreeMap<EdgeId, Edge>,
}

impl GraphDocument {
    pub fn from_graph(graph: &LineageGraph) -> Self {
        Self {
            metadata: GraphMetadata {
                session_id: graph.session_id().to_string(),
                node_count: graph.node_count(),
                edge_count: graph.edge_count(),
                active_edge_count: graph.active_edge_count(),
            },
            nodes: graph.nodes().map(|n| (n.id, n.clone())).collect(),
            edges: graph.edges().map(|e| (e.id, e.clone())).collect(),
        }
    }

    /// Rebuilds the graph and checks every lineage invariant on the result.
    pub fn into_graph(self) -> Result<LineageGraph, ExportError> {
        let meta = &self.metadata;
        if meta.node_count != self.nodes.len() || meta.edge_count != self.edges.len() {
            return Err(ExportError::Inconsistent(format!(
                "metadata announces {} nodes and {} edges, document holds {} and {}",
                meta.node_count,
                meta.edge_count,
                self.nodes.len(),
                self.edges.len()
            )));
        }
        for (key, node) in &self.nodes {
            if *key != node.id {
                return Err(ExportError::Inconsistent(format!("node stored under {} has id {}", key, node.id)));
            }
        }
        for (key, edge) in &self.edges {
            if *key != edge.id {
                return Err(ExportError::Inconsistent(format!("edge stored under {} has id {}", key, edge.id)));
            }
        }

        let active = self.edges.values().filter(|e| e.active).count();
        if active != meta.active_edge_count {
            return Err(ExportError::Inconsistent(format!(
                "metadata announces {} active edges, document holds {}",
                meta.active_edge_count, active
            )));
        }

        let graph = LineageGraph::from_records(
            self.metadata.session_id,
            self.nodes.into_values().collect(),
            self.edges.into_values().collect(),
        )?;
        if let Err(violations) = invariants::verify(&graph) {
            let messages: Vec<String> = violations.iter().map(|v| v.message.clone()).collect();
            return Err(ExportError::Inconsistent(messages.join("; ")));
        }
        Ok(graph)
    }
}

pub fn export(graph: &LineageGraph) -> GraphDocument {
    GraphDocument::from_graph(graph)
}

pub fn import(document: GraphDocument) -> Result<LineageGraph, ExportError> {
    document.into_graph()
}

pub fn to_json(graph: &LineageGraph) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(&export(graph))?)
}

pub fn from_json(json: &str) -> Result<LineageGraph, ExportError> {
    import(serde_json::from_str(json)?)
}

pub fn to_writer(graph: &LineageGraph, writer: impl Write) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, &export(graph))?;
    Ok(())
}

pub fn from_reader(reader: impl Read) -> Result<LineageGraph, ExportError> {
    import(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EdgeKind, EdgeSpec, MappingTier, NodeKind, NodeSpec, OriginKey};

    fn small_graph() -> LineageGraph {
        let mut g = LineageGraph::new("session-1");
        let c = g.add_node(NodeSpec::source_cell(OriginKey::new("BS", 5, 3), Some(12.5))).unwrap();
        let e = g.add_node(NodeSpec::new(NodeKind::Extracted).period("FY2024").value(12.5)).unwrap();
        g.add_edge(EdgeSpec::new(EdgeKind::Extraction, vec![c], e, "spreadsheet_extraction")).unwrap();
        let m = g.add_node(NodeSpec::new(NodeKind::Mapped).concept("Cash").period("FY2024").value(12.5)).unwrap();
        g.add_edge(EdgeSpec::new(EdgeKind::Mapping { tier: MappingTier::HierarchyFallback { depth: 2 } }, vec![e], m, "hierarchy"))
            .unwrap();
        g
    }

    #[test]
    fn test_document_shape() {
        let json = to_json(&small_graph()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["metadata"]["node_count"], 3);
        assert_eq!(value["metadata"]["active_edge_count"], 2);
        assert_eq!(value["nodes"]["0"]["kind"], "source_cell");
        assert_eq!(value["edges"]["1"]["kind"]["type"], "mapping");
        assert_eq!(value["edges"]["1"]["kind"]["tier"]["hierarchy_fallback"]["depth"], 2);
    }

    #[test]
    fn test_round_trip_is_identity() {
        let g = small_graph();
        let back = from_json(&to_json(&g).unwrap()).unwrap();
        assert_eq!(export(&back), export(&g));
        assert_eq!(back.query_by_concept("Cash", Some("FY2024")).len(), 1);
    }

    #[test]
    fn test_tampered_metadata_is_rejected() {
        let mut doc = export(&small_graph());
        doc.metadata.edge_count = 7;
        assert!(matches!(import(doc), Err(ExportError::Inconsistent(_))));
    }

    #[test]
    fn test_tampered_confidence_fails_verification() {
        let mut doc = export(&small_graph());
        if let Some(edge) = doc.edges.get_mut(&EdgeId(1)) {
            edge.confidence = 0.99;
        }
        assert!(matches!(import(doc), Err(ExportError::Inconsistent(_))));
    }
}
