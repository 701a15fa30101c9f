//! In-memory assembly of one map's evidence graph, used to shape query results.
//!
//! Factors are deduplicated by name (their identity within a map) and evidence edges are
//! only kept when both endpoints are factors of the same map.
use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::properties::{Evidence, EvidenceEdge, Factor};

#[derive(Debug, Clone, Default)]
pub struct EvidenceGraph {
    graph: DiGraph<Factor, Evidence>,
    index: BTreeMap<String, NodeIndex>,
}

/// Data payload of a node element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorElement {
    pub id: String,
    pub label: String,
    pub definition: String,
}

/// Data payload of an edge element: endpoints, display label and every evidence property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceElement {
    pub source: String,
    pub target: String,
    pub label: String,
    #[serde(flatten)]
    pub evidence: Evidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementGroup {
    Edges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphElement {
    Edge {
        group: ElementGroup,
        data: EvidenceElement,
    },
    Node {
        data: FactorElement,
    },
}

/// Response body of a graph query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphElements {
    pub elements: Vec<GraphElement>,
}

impl GraphElements {
    pub fn nodes(&self) -> impl Iterator<Item = &FactorElement> {
        self.elements.iter().filter_map(|e| match e {
            GraphElement::Node { data } => Some(data),
            _ => None,
        })
    }

    pub fn edges(&self) -> impl Iterator<Item = &EvidenceElement> {
        self.elements.iter().filter_map(|e| match e {
            GraphElement::Edge { data, .. } => Some(data),
            _ => None,
        })
    }
}

impl EvidenceGraph {
    /// Build from the factors of one map and the evidence rows read alongside them. Edges
    /// with an endpoint outside `factors` are dropped.
    pub fn from_parts<F, E>(factors: F, edges: E) -> EvidenceGraph
    where
        F: IntoIterator<Item = Factor>,
        E: IntoIterator<Item = EvidenceEdge>,
    {
        let mut eg = EvidenceGraph::default();
        for factor in factors {
            eg.insert_factor(factor);
        }
        for edge in edges {
            let (Some(source), Some(target)) =
                (eg.index.get(&edge.source), eg.index.get(&edge.target))
            else {
                tracing::debug!(
                    "[EvidenceGraph] dropping edge {} -> {} ({}): endpoint outside map",
                    edge.source,
                    edge.target,
                    edge.props.doi
                );
                continue;
            };
            eg.graph.add_edge(*source, *target, edge.props);
        }
        eg
    }

    fn insert_factor(&mut self, factor: Factor) -> NodeIndex {
        if let Some(idx) = self.index.get(&factor.name) {
            return *idx;
        }
        let name = factor.name.clone();
        let idx = self.graph.add_node(factor);
        self.index.insert(name, idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Factors ordered by name.
    pub fn factors(&self) -> impl Iterator<Item = &Factor> {
        self.index.values().map(|idx| &self.graph[*idx])
    }

    /// Evidence edges ordered by (source, target, doi).
    pub fn edges(&self) -> Vec<EvidenceEdge> {
        let mut edges = self
            .graph
            .edge_references()
            .map(|e| EvidenceEdge {
                source: self.graph[e.source()].name.clone(),
                target: self.graph[e.target()].name.clone(),
                props: e.weight().clone(),
            })
            .collect::<Vec<_>>();
        edges.sort();
        edges
    }

    /// Element list for the front-end graph view: one node element per factor followed by
    /// one edge element per evidence relationship.
    pub fn elements(&self) -> GraphElements {
        let mut elements = self
            .factors()
            .map(|factor| GraphElement::Node {
                data: FactorElement {
                    id: factor.name.clone(),
                    label: factor.name.clone(),
                    definition: factor.definition.clone(),
                },
            })
            .collect::<Vec<_>>();
        elements.extend(self.edges().into_iter().map(|edge| GraphElement::Edge {
            group: ElementGroup::Edges,
            data: EvidenceElement {
                label: edge.props.label(),
                source: edge.source,
                target: edge.target,
                evidence: edge.props,
            },
        }));
        GraphElements { elements }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor(name: &str) -> Factor {
        Factor {
            name: name.to_string(),
            map_name: "m".to_string(),
            definition: format!("{name} def"),
        }
    }

    fn edge(source: &str, target: &str, doi: &str) -> EvidenceEdge {
        EvidenceEdge {
            source: source.to_string(),
            target: target.to_string(),
            props: Evidence {
                doi: doi.to_string(),
                author: "Maslach".to_string(),
                year: "2001".to_string(),
                level: "strong".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_dedup_and_edge_filtering() {
        let eg = EvidenceGraph::from_parts(
            vec![factor("Stress"), factor("Burnout"), factor("Stress")],
            vec![
                edge("Stress", "Burnout", "10.1/a"),
                edge("Stress", "Burnout", "10.1/b"),
                edge("Stress", "Elsewhere", "10.1/c"),
            ],
        );
        assert_eq!(eg.node_count(), 2);
        assert_eq!(eg.edge_count(), 2);
        let names = eg.factors().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Burnout", "Stress"]);
    }

    #[test]
    fn test_element_shape() {
        let eg = EvidenceGraph::from_parts(
            vec![factor("Stress"), factor("Burnout")],
            vec![edge("Stress", "Burnout", "10.1/xyz")],
        );
        let json = serde_json::to_value(eg.elements()).unwrap();
        let elements = json["elements"].as_array().unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0]["data"]["id"], "Burnout");
        assert!(elements[0].get("group").is_none());
        let e = &elements[2];
        assert_eq!(e["group"], "edges");
        assert_eq!(e["data"]["source"], "Stress");
        assert_eq!(e["data"]["target"], "Burnout");
        assert_eq!(e["data"]["label"], "(Maslach, 2001)");
        assert_eq!(e["data"]["doi"], "10.1/xyz");
        assert_eq!(e["data"]["level"], "strong");

        let back: GraphElements = serde_json::from_value(json).unwrap();
        assert_eq!(back.nodes().count(), 2);
        assert_eq!(back.edges().count(), 1);
    }
}
