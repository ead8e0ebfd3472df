//! Structural skeletons and their conversion to canvas elements.
//!
//! A [`Skeleton`] is the id-only form of a parsed document: every node and
//! group is labelled with its own id so the ids can be recovered after
//! conversion. A [`ShapeConverter`] lays the skeleton out as positioned
//! elements with fresh random ids.

use std::collections::HashMap;

use crate::element::{BoundElement, BoundKind, Element, ElementId, ElementKind, Transform};
use crate::parse::ParsedDocument;
use crate::remap::{OriginalEdge, OriginalIds};
use crate::spec::{Direction, Shape};

/// A node in a skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeletonNode {
    /// Semantic id, also used as the node's text.
    pub id: String,
    /// Shape.
    pub shape: Shape,
    /// Enclosing group id.
    pub group: Option<String>,
}

/// An edge in a skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeletonEdge {
    /// Allocated edge id.
    pub id: String,
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Edge label.
    pub label: Option<String>,
    /// Dashed stroke.
    pub dashed: bool,
}

/// Id-only structure handed to a [`ShapeConverter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Skeleton {
    /// Layout direction.
    pub direction: Direction,
    /// Nodes in document order.
    pub nodes: Vec<SkeletonNode>,
    /// Edges in document order.
    pub edges: Vec<SkeletonEdge>,
    /// Group ids in declaration order.
    pub groups: Vec<String>,
}

impl Skeleton {
    /// Build a skeleton from a parsed document.
    ///
    /// `edge_ids` are zipped with the document's edges in order; edges
    /// without an id are dropped.
    #[must_use]
    pub fn from_document(doc: &ParsedDocument, edge_ids: Vec<String>) -> Self {
        Self {
            direction: doc.direction.unwrap_or_default(),
            nodes: doc
                .nodes
                .iter()
                .map(|n| SkeletonNode {
                    id: n.id.clone(),
                    shape: n.shape.normalized(),
                    group: n.group.clone(),
                })
                .collect(),
            edges: doc
                .edges
                .iter()
                .zip(edge_ids)
                .map(|(e, id)| SkeletonEdge {
                    id,
                    from: e.from.clone(),
                    to: e.to.clone(),
                    label: e.label.clone(),
                    dashed: e.dashed,
                })
                .collect(),
            groups: doc.groups.iter().map(|g| g.id.clone()).collect(),
        }
    }

    /// Ids the converted elements should be remapped to.
    #[must_use]
    pub fn original_ids(&self) -> OriginalIds {
        OriginalIds {
            shapes: self
                .nodes
                .iter()
                .map(|n| n.id.clone())
                .chain(self.groups.iter().cloned())
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| OriginalEdge {
                    id: e.id.clone(),
                    from: e.from.clone(),
                    to: e.to.clone(),
                })
                .collect(),
        }
    }
}

/// Turns a skeleton into positioned canvas elements.
pub trait ShapeConverter: Send + Sync {
    /// Convert `skeleton`. Returning no elements signals failure.
    fn convert(&self, skeleton: &Skeleton) -> Vec<Element>;
}

/// Smallest container side. A square of this size is classified as a
/// group container.
const GROUP_MIN_SIDE: f32 = 300.0;

/// Layout settings for [`LayeredConverter`].
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Node width in pixels.
    pub node_width: f32,
    /// Node height in pixels.
    pub node_height: f32,
    /// Gap between nodes in the same layer.
    pub node_gap: f32,
    /// Gap between layers.
    pub layer_gap: f32,
    /// Padding between a group container and its members.
    pub group_padding: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_width: 160.0,
            node_height: 60.0,
            node_gap: 60.0,
            layer_gap: 100.0,
            group_padding: 40.0,
        }
    }
}

/// Built-in converter using longest-path layering.
///
/// Nodes are placed in layers along the diagram direction, ordered within a
/// layer by group and then by document order. Group containers are sized to
/// their members and never smaller than the container classification
/// threshold, so they are recognized again after conversion.
#[derive(Debug, Clone, Default)]
pub struct LayeredConverter {
    config: LayoutConfig,
}

impl LayeredConverter {
    /// Create a converter with custom layout settings.
    #[must_use]
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    fn layers(skeleton: &Skeleton) -> Vec<usize> {
        let index: HashMap<&str, usize> = skeleton
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();
        let n = skeleton.nodes.len();
        let mut layer = vec![0usize; n];
        // Bounded relaxation; cycles stop growing at n - 1.
        for _ in 0..n {
            let mut changed = false;
            for edge in &skeleton.edges {
                let (Some(&from), Some(&to)) =
                    (index.get(edge.from.as_str()), index.get(edge.to.as_str()))
                else {
                    continue;
                };
                let next = layer[from] + 1;
                if from != to && layer[to] < next && next < n {
                    layer[to] = next;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        layer
    }

    fn place(&self, direction: Direction, layer: usize, slot: usize, max_layer: usize) -> (f32, f32) {
        let c = &self.config;
        let layer = if direction.is_reversed() {
            max_layer - layer
        } else {
            layer
        };
        #[allow(clippy::cast_precision_loss)]
        let (layer, slot) = (layer as f32, slot as f32);
        if direction.is_horizontal() {
            (
                layer * (c.node_width + c.layer_gap),
                slot * (c.node_height + c.node_gap),
            )
        } else {
            (
                slot * (c.node_width + c.node_gap),
                layer * (c.node_height + c.layer_gap),
            )
        }
    }
}

fn element_kind(shape: Shape) -> ElementKind {
    match shape {
        Shape::Decision => ElementKind::Diamond,
        Shape::Circle | Shape::Ellipse => ElementKind::Ellipse,
        Shape::Rectangle | Shape::Rounded | Shape::Stadium | Shape::Hexagon => {
            ElementKind::Rectangle
        }
    }
}

fn label_for(container: &mut Element, text: &str) -> Element {
    let label = Element::bound_text(text, &container.id).with_transform(container.transform);
    container.bound_elements.push(BoundElement {
        id: label.id.clone(),
        kind: BoundKind::Text,
    });
    label
}

impl ShapeConverter for LayeredConverter {
    fn convert(&self, skeleton: &Skeleton) -> Vec<Element> {
        let c = &self.config;
        let layers = Self::layers(skeleton);
        let max_layer = layers.iter().copied().max().unwrap_or(0);
        let group_rank: HashMap<&str, usize> = skeleton
            .groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.as_str(), i + 1))
            .collect();

        let mut order: Vec<usize> = (0..skeleton.nodes.len()).collect();
        order.sort_by_key(|&i| {
            let rank = skeleton.nodes[i]
                .group
                .as_deref()
                .and_then(|g| group_rank.get(g))
                .copied()
                .unwrap_or(0);
            (layers[i], rank, i)
        });

        let mut shapes: Vec<Element> = Vec::with_capacity(skeleton.nodes.len());
        let mut shape_of: HashMap<&str, usize> = HashMap::new();
        let mut shape_ids: Vec<&str> = Vec::with_capacity(skeleton.nodes.len());
        let mut slots: HashMap<usize, usize> = HashMap::new();
        for i in order {
            let node = &skeleton.nodes[i];
            let slot = slots.entry(layers[i]).or_insert(0);
            let (x, y) = self.place(skeleton.direction, layers[i], *slot, max_layer);
            *slot += 1;
            let mut shape = Element::new(element_kind(node.shape))
                .with_transform(Transform::new(x, y, c.node_width, c.node_height));
            if let Some(group) = &node.group {
                shape.group_ids.push(group.clone());
            }
            shape_of.insert(node.id.as_str(), shapes.len());
            shape_ids.push(node.id.as_str());
            shapes.push(shape);
        }

        let mut containers = Vec::new();
        for group in &skeleton.groups {
            let members: Vec<&Transform> = shapes
                .iter()
                .filter(|s| s.group_ids.iter().any(|g| g == group))
                .map(|s| &s.transform)
                .collect();
            let Some(first) = members.first() else {
                continue;
            };
            let (mut x0, mut y0) = (first.x, first.y);
            let (mut x1, mut y1) = (first.x + first.width, first.y + first.height);
            for t in &members {
                x0 = x0.min(t.x);
                y0 = y0.min(t.y);
                x1 = x1.max(t.x + t.width);
                y1 = y1.max(t.y + t.height);
            }
            let width = (x1 - x0 + 2.0 * c.group_padding).max(GROUP_MIN_SIDE);
            let height = (y1 - y0 + 2.0 * c.group_padding).max(GROUP_MIN_SIDE);
            let mut transform = Transform::new(x0 - c.group_padding, y0 - c.group_padding, width, height);
            transform.z_index = -1;
            let mut container = Element::new(ElementKind::Rectangle).with_transform(transform);
            let label = label_for(&mut container, group);
            containers.push(container);
            containers.push(label);
        }

        let mut arrows = Vec::new();
        for edge in &skeleton.edges {
            let (Some(&from), Some(&to)) = (
                shape_of.get(edge.from.as_str()),
                shape_of.get(edge.to.as_str()),
            ) else {
                tracing::debug!(edge = %edge.id, "skipping edge with unknown endpoint");
                continue;
            };
            let (sx, sy) = shapes[from].transform.center();
            let (ex, ey) = shapes[to].transform.center();
            let mut arrow = Element::new(ElementKind::Arrow {
                start_binding: Some(shapes[from].id.clone()),
                end_binding: Some(shapes[to].id.clone()),
                dashed: edge.dashed,
            })
            .with_transform(Transform::new(
                sx.min(ex),
                sy.min(ey),
                (ex - sx).abs(),
                (ey - sy).abs(),
            ));
            let arrow_id = arrow.id.clone();
            shapes[from].bound_elements.push(bound_arrow(&arrow_id));
            if to != from {
                shapes[to].bound_elements.push(bound_arrow(&arrow_id));
            }
            let label = edge.label.as_deref().map(|l| label_for(&mut arrow, l));
            arrows.push(arrow);
            arrows.extend(label);
        }

        let labels: Vec<Element> = shapes
            .iter_mut()
            .zip(shape_ids)
            .map(|(shape, id)| label_for(shape, id))
            .collect();

        let mut elements = containers;
        for (shape, label) in shapes.into_iter().zip(labels) {
            elements.push(shape);
            elements.push(label);
        }
        elements.extend(arrows);
        elements
    }
}

fn bound_arrow(id: &ElementId) -> BoundElement {
    BoundElement {
        id: id.clone(),
        kind: BoundKind::Arrow,
    }
}
