//! Structural diff between the live canvas and new diagram text.
//!
//! Nodes are compared by id and edges by their `(from, to)` pair. A node on
//! both sides with a different label is a relabel, not an add and remove.
//! [`render_merged`] reassembles one document from the two sides for the
//! incremental apply path.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::parse::parse_document;
use crate::remap::{classify, ShapeClass};
use crate::render::render_spec;
use crate::spec::{is_semantic_id, DiagramSpec, Direction, Shape, SpecEdge, SpecGroup, SpecNode};
use crate::{Element, ElementKind, Scene, Transform};

/// A node on the live canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Semantic id.
    pub id: String,
    /// Current label.
    pub label: String,
    /// Shape.
    pub shape: Shape,
    /// Innermost group container enclosing the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// A group container on the live canvas with at least one node inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotGroup {
    /// Container id.
    pub id: String,
    /// Container label.
    pub label: String,
}

/// An edge on the live canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    /// Source id.
    pub from: String,
    /// Target id.
    pub to: String,
    /// Label.
    pub label: Option<String>,
    /// Dashed stroke.
    pub dashed: bool,
}

/// Semantic-id-addressed view of the live canvas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralSnapshot {
    /// Direction used when the new text has no valid header.
    pub direction: Direction,
    /// Nodes in canvas order.
    pub nodes: Vec<SnapshotNode>,
    /// Edges in canvas order.
    pub edges: Vec<SnapshotEdge>,
    /// Non-empty groups in canvas order.
    #[serde(default)]
    pub groups: Vec<SnapshotGroup>,
}

impl StructuralSnapshot {
    /// Extract regular nodes, their groups and the arrows between them.
    ///
    /// The direction is left at its default; see
    /// [`StructuralSnapshot::from_canvas`].
    #[must_use]
    pub fn from_scene(scene: &Scene) -> Self {
        Self::from_canvas(scene, None)
    }

    /// Like [`StructuralSnapshot::from_scene`], taking the direction from
    /// the diagram text the canvas was built from.
    #[must_use]
    pub fn from_canvas(scene: &Scene, diagram_text: Option<&str>) -> Self {
        let direction = diagram_text
            .and_then(|text| parse_document(text).direction)
            .unwrap_or_default();

        // Containers need an id usable as a group name in diagram text.
        let containers: Vec<&Element> = scene
            .elements()
            .iter()
            .filter(|e| classify(e) == Some(ShapeClass::GroupContainer))
            .filter(|e| is_semantic_id(e.id.as_str()))
            .collect();
        let innermost = |node: &Element| {
            containers
                .iter()
                .filter(|c| c.transform.encloses(&node.transform))
                .min_by(|a, b| area(&a.transform).total_cmp(&area(&b.transform)))
                .map(|c| c.id.to_string())
        };

        let nodes: Vec<SnapshotNode> = scene
            .elements()
            .iter()
            .filter(|e| classify(e) == Some(ShapeClass::RegularNode))
            .map(|e| SnapshotNode {
                id: e.id.to_string(),
                label: scene.bound_text(e.id.as_str()).unwrap_or_default().to_string(),
                shape: match e.kind {
                    ElementKind::Diamond => Shape::Decision,
                    ElementKind::Ellipse => Shape::Circle,
                    _ => Shape::Rectangle,
                },
                group: innermost(e),
            })
            .collect();
        let groups = containers
            .iter()
            .filter(|c| nodes.iter().any(|n| n.group.as_deref() == Some(c.id.as_str())))
            .map(|c| SnapshotGroup {
                id: c.id.to_string(),
                label: scene.bound_text(c.id.as_str()).unwrap_or_default().to_string(),
            })
            .collect();
        let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

        let edges = scene
            .elements()
            .iter()
            .filter_map(|e| {
                let (start, end) = e.bindings()?;
                let (from, to) = (start?.as_str(), end?.as_str());
                if !known.contains(from) || !known.contains(to) {
                    return None;
                }
                let dashed = matches!(e.kind, ElementKind::Arrow { dashed: true, .. });
                Some(SnapshotEdge {
                    from: from.to_string(),
                    to: to.to_string(),
                    label: scene.bound_text(e.id.as_str()).map(ToString::to_string),
                    dashed,
                })
            })
            .collect();

        Self {
            direction,
            nodes,
            edges,
            groups,
        }
    }

    fn node_ids(&self) -> HashSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    fn edge_pairs(&self) -> HashSet<(&str, &str)> {
        self.edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect()
    }
}

/// An edge identified by its endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeRef {
    /// Source id.
    pub from: String,
    /// Target id.
    pub to: String,
}

/// A node whose label changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUpdate {
    /// Node id.
    pub id: String,
    /// Label on the canvas.
    pub old_label: String,
    /// Label in the new text.
    pub new_label: String,
}

/// Changes needed to turn the snapshot into the new document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramDiff {
    /// Ids only in the new document.
    pub nodes_to_add: Vec<String>,
    /// Ids only on the canvas.
    pub nodes_to_remove: Vec<String>,
    /// Pairs only in the new document.
    pub edges_to_add: Vec<EdgeRef>,
    /// Pairs only on the canvas.
    pub edges_to_remove: Vec<EdgeRef>,
    /// Nodes on both sides with a new label.
    pub nodes_to_update: Vec<NodeUpdate>,
}

impl DiagramDiff {
    /// Whether the new document matches the snapshot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes_to_add.is_empty()
            && self.nodes_to_remove.is_empty()
            && self.edges_to_add.is_empty()
            && self.edges_to_remove.is_empty()
            && self.nodes_to_update.is_empty()
    }
}

/// Compare the snapshot with new diagram text.
#[must_use]
pub fn diff(snapshot: &StructuralSnapshot, text: &str) -> DiagramDiff {
    let doc = parse_document(text);
    let existing = snapshot.node_ids();
    let incoming: HashSet<&str> = doc.node_ids().collect();

    let nodes_to_add = doc
        .node_ids()
        .filter(|id| !existing.contains(id))
        .map(ToString::to_string)
        .collect();
    let nodes_to_remove = snapshot
        .nodes
        .iter()
        .filter(|n| !incoming.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();
    let nodes_to_update = snapshot
        .nodes
        .iter()
        .filter_map(|n| {
            let new_label = doc.node(&n.id)?.label.as_ref()?;
            (new_label != &n.label).then(|| NodeUpdate {
                id: n.id.clone(),
                old_label: n.label.clone(),
                new_label: new_label.clone(),
            })
        })
        .collect();

    let existing_pairs = snapshot.edge_pairs();
    let incoming_pairs: HashSet<(&str, &str)> = doc
        .edges
        .iter()
        .map(|e| (e.from.as_str(), e.to.as_str()))
        .collect();
    let edges_to_add = unique_pairs(
        doc.edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .filter(|p| !existing_pairs.contains(p)),
    );
    let edges_to_remove = unique_pairs(
        snapshot
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .filter(|p| !incoming_pairs.contains(p)),
    );

    DiagramDiff {
        nodes_to_add,
        nodes_to_remove,
        edges_to_add,
        edges_to_remove,
        nodes_to_update,
    }
}

fn area(t: &Transform) -> f32 {
    t.width.abs() * t.height.abs()
}

fn unique_pairs<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<EdgeRef> {
    let mut seen = HashSet::new();
    pairs
        .filter(|p| seen.insert(*p))
        .map(|(from, to)| EdgeRef {
            from: from.to_string(),
            to: to.to_string(),
        })
        .collect()
}

/// Render one document combining the snapshot with new diagram text.
///
/// Surviving canvas nodes come first in canvas order, relabelled where the
/// text changes their label, followed by added nodes. Surviving canvas
/// edges are followed by added edges. A surviving node stays in its canvas
/// group unless the text places it in another one. Groups declared in the
/// text come first, then canvas groups that still have members. The text's
/// direction wins over the snapshot's.
#[must_use]
pub fn render_merged(snapshot: &StructuralSnapshot, text: &str) -> String {
    let doc = parse_document(text);
    let existing = snapshot.node_ids();

    let mut nodes: Vec<SpecNode> = snapshot
        .nodes
        .iter()
        .filter_map(|n| {
            let incoming = doc.node(&n.id)?;
            let shape = if incoming.declared {
                incoming.shape
            } else {
                n.shape
            };
            Some(SpecNode {
                id: n.id.clone(),
                label: incoming.label.clone().unwrap_or_else(|| n.label.clone()),
                shape,
                group_id: incoming.group.clone().or_else(|| n.group.clone()),
            })
        })
        .collect();
    nodes.extend(
        doc.nodes
            .iter()
            .filter(|n| !existing.contains(n.id.as_str()))
            .map(|n| SpecNode {
                id: n.id.clone(),
                label: n.label.clone().unwrap_or_else(|| n.id.clone()),
                shape: n.shape,
                group_id: n.group.clone(),
            }),
    );

    let incoming_pairs: HashSet<(&str, &str)> = doc
        .edges
        .iter()
        .map(|e| (e.from.as_str(), e.to.as_str()))
        .collect();
    let existing_pairs = snapshot.edge_pairs();
    let mut edges: Vec<SpecEdge> = snapshot
        .edges
        .iter()
        .filter(|e| incoming_pairs.contains(&(e.from.as_str(), e.to.as_str())))
        .map(|e| SpecEdge {
            from: e.from.clone(),
            to: e.to.clone(),
            label: e.label.clone(),
            dashed: e.dashed,
        })
        .collect();
    edges.extend(
        doc.edges
            .iter()
            .filter(|e| !existing_pairs.contains(&(e.from.as_str(), e.to.as_str())))
            .map(|e| SpecEdge {
                from: e.from.clone(),
                to: e.to.clone(),
                label: e.label.clone(),
                dashed: e.dashed,
            }),
    );

    let declared: HashSet<&str> = doc.groups.iter().map(|g| g.id.as_str()).collect();
    let groups = doc
        .groups
        .iter()
        .map(|g| SpecGroup {
            id: g.id.clone(),
            label: g.label.clone(),
        })
        .chain(
            snapshot
                .groups
                .iter()
                .filter(|g| !declared.contains(g.id.as_str()))
                .filter(|g| nodes.iter().any(|n| n.group_id.as_deref() == Some(g.id.as_str())))
                .map(|g| SpecGroup {
                    id: g.id.clone(),
                    label: g.label.clone(),
                }),
        )
        .collect();

    let spec = DiagramSpec {
        direction: doc.direction.unwrap_or(snapshot.direction),
        nodes,
        groups,
        edges,
    };
    render_spec(&spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> StructuralSnapshot {
        StructuralSnapshot {
            direction: Direction::TD,
            nodes: nodes
                .iter()
                .map(|(id, label)| SnapshotNode {
                    id: (*id).into(),
                    label: (*label).into(),
                    shape: Shape::Rectangle,
                    group: None,
                })
                .collect(),
            groups: Vec::new(),
            edges: edges
                .iter()
                .map(|(from, to)| SnapshotEdge {
                    from: (*from).into(),
                    to: (*to).into(),
                    label: None,
                    dashed: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_add_and_remove_nodes() {
        let snap = snapshot(&[("n1", "One"), ("n2", "Two")], &[]);
        let d = diff(&snap, "flowchart TD\n  n2[\"Two\"]\n  n3[\"Three\"]\n");
        assert_eq!(d.nodes_to_add, vec!["n3"]);
        assert_eq!(d.nodes_to_remove, vec!["n1"]);
        assert!(d.nodes_to_update.is_empty());
    }

    #[test]
    fn test_relabel_is_update() {
        let snap = snapshot(&[("a", "Old")], &[]);
        let d = diff(&snap, "flowchart TD\n  a[\"New\"]\n");
        assert!(d.nodes_to_add.is_empty());
        assert!(d.nodes_to_remove.is_empty());
        assert_eq!(d.nodes_to_update.len(), 1);
        assert_eq!(d.nodes_to_update[0].new_label, "New");
    }

    #[test]
    fn test_edges_compared_by_pair() {
        let snap = snapshot(&[("a", "A"), ("b", "B"), ("c", "C")], &[("a", "b"), ("b", "c")]);
        let d = diff(&snap, "flowchart TD\n  a -->|now labelled| b\n  a --> c\n  a --> c\n");
        assert_eq!(
            d.edges_to_add,
            vec![EdgeRef {
                from: "a".into(),
                to: "c".into()
            }]
        );
        assert_eq!(
            d.edges_to_remove,
            vec![EdgeRef {
                from: "b".into(),
                to: "c".into()
            }]
        );
    }

    #[test]
    fn test_identical_document_is_empty_diff() {
        let snap = snapshot(&[("a", "A"), ("b", "B")], &[("a", "b")]);
        let d = diff(&snap, "flowchart TD\n  a[\"A\"]\n  b[\"B\"]\n  a --> b\n");
        assert!(d.is_empty());
    }

    #[test]
    fn test_render_merged_order() {
        let snap = snapshot(&[("n1", "One"), ("n2", "Two")], &[("n1", "n2")]);
        let merged = render_merged(
            &snap,
            "flowchart LR\n  n3[\"Three\"]\n  n2[\"Second\"]\n  n2 --> n3\n",
        );
        assert_eq!(
            merged,
            "flowchart LR\n    n2[\"Second\"]\n    n3[\"Three\"]\n    n2 --> n3\n"
        );
    }

    #[test]
    fn test_render_merged_keeps_surviving_edges_and_default_direction() {
        let snap = snapshot(&[("a", "A"), ("b", "B")], &[("a", "b")]);
        let merged = render_merged(&snap, "a --> b\nb --> c\n");
        let lines: Vec<_> = merged.lines().map(str::trim).collect();
        assert_eq!(
            lines,
            vec!["flowchart TD", "a[\"A\"]", "b[\"B\"]", "c[\"c\"]", "a --> b", "b --> c"]
        );
    }

    #[test]
    fn test_snapshot_from_scene() {
        use crate::ElementId;
        let mut scene = Scene::new(800.0, 600.0);
        scene.add_element(
            Element::new(ElementKind::Diamond)
                .with_id("ok")
                .with_transform(Transform::new(0.0, 0.0, 100.0, 80.0)),
        );
        scene.add_element(Element::bound_text("Ok?", &ElementId::new("ok")));
        scene.add_element(
            Element::new(ElementKind::Rectangle)
                .with_id("done")
                .with_transform(Transform::new(0.0, 200.0, 100.0, 50.0)),
        );
        scene.add_element(
            Element::new(ElementKind::Arrow {
                start_binding: Some(ElementId::new("ok")),
                end_binding: Some(ElementId::new("done")),
                dashed: true,
            })
            .with_id("ok_done"),
        );
        let snap = StructuralSnapshot::from_scene(&scene);
        assert_eq!(snap.nodes.len(), 2);
        assert_eq!(snap.nodes[0].shape, Shape::Decision);
        assert_eq!(snap.nodes[0].label, "Ok?");
        assert_eq!(snap.edges.len(), 1);
        assert!(snap.edges[0].dashed);
        assert_eq!(snap.direction, Direction::TD);
        assert!(snap.groups.is_empty());
    }

    #[test]
    fn test_snapshot_reads_direction_and_groups() {
        use crate::ElementId;
        let mut scene = Scene::new(800.0, 600.0);
        scene.add_element(
            Element::new(ElementKind::Rectangle)
                .with_id("team")
                .with_transform(Transform::new(0.0, 0.0, 400.0, 300.0)),
        );
        scene.add_element(Element::bound_text("Team", &ElementId::new("team")));
        scene.add_element(
            Element::new(ElementKind::Rectangle)
                .with_id("lead")
                .with_transform(Transform::new(40.0, 40.0, 120.0, 60.0)),
        );
        scene.add_element(
            Element::new(ElementKind::Rectangle)
                .with_id("outside")
                .with_transform(Transform::new(600.0, 40.0, 120.0, 60.0)),
        );

        let snap = StructuralSnapshot::from_canvas(&scene, Some("flowchart LR
    lead
"));
        assert_eq!(snap.direction, Direction::LR);
        assert_eq!(
            snap.groups,
            vec![SnapshotGroup {
                id: "team".into(),
                label: "Team".into()
            }]
        );
        assert_eq!(snap.nodes[0].group.as_deref(), Some("team"));
        assert_eq!(snap.nodes[1].group, None);
    }

    #[test]
    fn test_render_merged_keeps_canvas_groups_and_direction() {
        let mut snap = snapshot(&[("a", "A"), ("b", "B")], &[("a", "b")]);
        snap.direction = Direction::LR;
        snap.nodes[0].group = Some("g".into());
        snap.groups.push(SnapshotGroup {
            id: "g".into(),
            label: "Group".into(),
        });

        let merged = render_merged(&snap, "a --> b
b --> c
");
        assert_eq!(
            merged,
            "flowchart LR\n    b[\"B\"]\n    c[\"c\"]\n    subgraph g[\"Group\"]\n        a[\"A\"]\n    end\n    a --> b\n    b --> c\n"
        );

        let regrouped = render_merged(&snap, "flowchart BT\n    subgraph h[\"Other\"]\n        a[\"A\"]\n    end\n");
        assert!(regrouped.starts_with("flowchart BT\n"));
        assert!(regrouped.contains("subgraph h[\"Other\"]"));
        assert!(!regrouped.contains("subgraph g"));
    }
}
