use crate::confidence::levels::badge;
use crate::store::{Edge, EdgeKind, LineageGraph, Node, NodeId, NodeKind};
use std::collections::HashMap;
use std::fmt::Write;

/// Renders the active lineage of `target` as an ASCII tree, producer first.
/// A node reached a second time prints a reference to the level where it was
/// first expanded.
pub fn format_trace(graph: &LineageGraph, target: NodeId) -> String {
    let mut tracer = Tracer { graph, visited_at_level: HashMap::new(), output: String::new() };

    match graph.node(target) {
        Ok(node) => {
            let _ = writeln!(tracer.output, "LINEAGE TRACE for '{}' ({}):", node.display_name(), node.id);
            let _ = writeln!(tracer.output, "--------------------------------------------------");
            tracer.trace_node(target, 1, "");
        }
        Err(_) => {
            let _ = writeln!(tracer.output, "Error: Invalid Node ID {}", target);
        }
    }
    tracer.output
}

struct Tracer<'a> {
    graph: &'a LineageGraph,
    visited_at_level: HashMap<NodeId, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_node(&mut self, node_id: NodeId, level: usize, prefix: &str) {
        if let Some(&first_seen) = self.visited_at_level.get(&node_id) {
            let _ = writeln!(self.output, "{}-> (Ref to {})", prefix, node_id_ref(node_id, first_seen));
            return;
        }
        self.visited_at_level.insert(node_id, level);

        let graph = self.graph;
        let Ok(node) = graph.node(node_id) else {
            let _ = writeln!(self.output, "{}[L{}] {} [missing]", prefix, level, node_id);
            return;
        };
        let line_header = format!("[L{}] {}{} {}", level, node.display_name(), format_value(node), badge(node.confidence));

        match node.kind {
            NodeKind::SourceCell => {
                let origin = node.origin.as_ref().map(|o| o.to_string()).unwrap_or_default();
                let _ = writeln!(self.output, "{}{} -> Cell({})", prefix, line_header, origin);
            }
            _ => match graph.active_producer(node_id).ok().flatten() {
                Some(edge) => {
                    let _ = writeln!(self.output, "{}{} = {}", prefix, line_header, format_edge(edge));
                    let sources: Vec<NodeId> = edge.source_ids.to_vec();
                    self.recurse_children(prefix, &sources, level);
                }
                None => {
                    let _ = writeln!(self.output, "{}{} [NO ACTIVE PRODUCER]", prefix, line_header);
                }
            },
        }
    }

    fn recurse_children(&mut self, prefix: &str, children: &[NodeId], level: usize) {
        let stem = build_child_stem(prefix);
        for (i, &child) in children.iter().enumerate() {
            let connector = if i == children.len() - 1 { "`-- " } else { "|-- " };
            let full_prefix = format!("{}{}", stem, connector);
            self.trace_node(child, level + 1, &full_prefix);
        }
    }
}

fn node_id_ref(id: NodeId, level: usize) -> String {
    format!("{} @ L{}", id, level)
}

fn format_value(node: &Node) -> String {
    match node.value {
        Some(v) => format!(" [{:.3}]", v),
        None => " [absent]".to_string(),
    }
}

fn format_edge(edge: &Edge) -> String {
    match &edge.kind {
        EdgeKind::Calculation { formula, .. } => format!("{} ({})", formula, edge.scoring.explain()),
        EdgeKind::Aggregation { excluded, .. } if !excluded.is_empty() => {
            format!("{} ({}; {} excluded)", edge.method, edge.scoring.explain(), excluded.len())
        }
        _ => format!("{} ({})", edge.method, edge.scoring.explain()),
    }
}

fn build_child_stem(current_prefix: &str) -> String {
    current_prefix.replace("`-- ", "    ").replace("|-- ", "|   ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EdgeSpec, FormulaComplexity, MappingTier, NodeSpec, OriginKey};

    #[test]
    fn test_trace_tree_shape() {
        let mut g = LineageGraph::new("s");
        let c = g.add_node(NodeSpec::source_cell(OriginKey::new("IS", 3, 2), Some(50.0))).unwrap();
        let e = g.add_node(NodeSpec::new(NodeKind::Extracted).period("FY2024").label("Sales").value(50.0)).unwrap();
        g.add_edge(EdgeSpec::new(EdgeKind::Extraction, vec![c], e, "spreadsheet_extraction")).unwrap();
        let m = g
            .add_node(NodeSpec::new(NodeKind::Mapped).concept("Revenue").period("FY2024").value(50.0))
            .unwrap();
        g.add_edge(EdgeSpec::new(EdgeKind::Mapping { tier: MappingTier::ExactMatch }, vec![e], m, "exact")).unwrap();
        let d = g
            .add_node(NodeSpec::new(NodeKind::Calculated).concept("Double").period("FY2024").value(100.0))
            .unwrap();
        g.add_edge(EdgeSpec::new(
            EdgeKind::Calculation { formula: "Revenue + Revenue".into(), complexity: FormulaComplexity::SimpleArithmetic },
            vec![m, m],
            d,
            "formula",
        ))
        .unwrap();

        let text = format_trace(&g, d);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "LINEAGE TRACE for 'Double' (n3):");
        assert!(lines[2].starts_with("[L1] Double [100.000] 0.90 (High) = Revenue + Revenue"));
        assert!(lines[3].starts_with("|-- [L2] Revenue [50.000]"));
        assert!(lines[4].starts_with("|   `-- [L3] Sales [50.000]"));
        assert!(lines[5].starts_with("|       `-- [L4] n0 [50.000] 1.00 (Perfect) -> Cell(IS!R3C2)"));
        assert_eq!(lines[6], "`-- -> (Ref to n2 @ L2)");
    }

    #[test]
    fn test_invalid_node() {
        let g = LineageGraph::new("s");
        assert_eq!(format_trace(&g, NodeId(7)), "Error: Invalid Node ID n7\n");
    }
}
