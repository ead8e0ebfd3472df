//! Index-addressed canvas projections.
//!
//! [`CanvasContext`] is what the generator sees of the live canvas: nodes,
//! edges and groups addressed by position in a list, never by element id.
//! [`LiveIds`] is the opposite view, the raw ids the validator must avoid.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::remap::{classify, ShapeClass};
use crate::{Element, Scene};

/// Top-left corner of a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
}

/// Node dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
}

/// A node as exposed to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextNode {
    /// Position in [`CanvasContext::nodes`].
    pub index: usize,
    /// Shape type name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Bound label, empty when the shape has none.
    pub label: String,
    /// Top-left corner.
    pub position: Position,
    /// Dimensions.
    pub size: Size,
}

/// An edge between two context nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEdge {
    /// Index of the source node.
    pub source_index: usize,
    /// Index of the target node.
    pub target_index: usize,
    /// Edge label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A non-empty group of context nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextGroup {
    /// Group label.
    pub label: String,
    /// Indices of the nodes inside the group.
    pub node_indices: Vec<usize>,
}

/// Read-only projection of the canvas for a generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasContext {
    /// Regular nodes in scene order.
    pub nodes: Vec<ContextNode>,
    /// Arrows whose endpoints are both listed nodes.
    pub edges: Vec<ContextEdge>,
    /// Containers enclosing at least one node.
    pub groups: Vec<ContextGroup>,
}

impl CanvasContext {
    /// Build the context from a scene.
    #[must_use]
    pub fn from_scene(scene: &Scene) -> Self {
        let mut nodes = Vec::new();
        let mut index_of: HashMap<&str, usize> = HashMap::new();
        let mut node_elements: Vec<&Element> = Vec::new();
        let mut containers: Vec<&Element> = Vec::new();

        for element in scene.elements() {
            match classify(element) {
                Some(ShapeClass::RegularNode) => {
                    let index = nodes.len();
                    index_of.insert(element.id.as_str(), index);
                    node_elements.push(element);
                    let t = element.transform;
                    nodes.push(ContextNode {
                        index,
                        kind: element.kind.type_name().to_string(),
                        label: scene
                            .bound_text(element.id.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        position: Position { x: t.x, y: t.y },
                        size: Size {
                            width: t.width,
                            height: t.height,
                        },
                    });
                }
                Some(ShapeClass::GroupContainer) => containers.push(element),
                None => {}
            }
        }

        let edges = scene
            .elements()
            .iter()
            .filter_map(|element| {
                let (start, end) = element.bindings()?;
                let source_index = *index_of.get(start?.as_str())?;
                let target_index = *index_of.get(end?.as_str())?;
                Some(ContextEdge {
                    source_index,
                    target_index,
                    label: scene.bound_text(element.id.as_str()).map(ToString::to_string),
                })
            })
            .collect();

        let groups = containers
            .into_iter()
            .filter_map(|container| {
                let node_indices: Vec<usize> = node_elements
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| container.transform.encloses(&n.transform))
                    .map(|(i, _)| i)
                    .collect();
                (!node_indices.is_empty()).then(|| ContextGroup {
                    label: scene
                        .bound_text(container.id.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    node_indices,
                })
            })
            .collect();

        Self {
            nodes,
            edges,
            groups,
        }
    }

    /// Whether the canvas has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Ids already on the canvas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveIds {
    /// Ids of nodes and group containers.
    pub used_node_ids: HashSet<String>,
    /// Ids of arrows.
    pub used_edge_ids: HashSet<String>,
    /// Bound label of each node, mapped to the node id.
    pub label_to_id: HashMap<String, String>,
}

impl LiveIds {
    /// Collect the live ids of a scene.
    #[must_use]
    pub fn from_scene(scene: &Scene) -> Self {
        let mut ids = Self::default();
        for element in scene.elements() {
            if element.is_shape() {
                ids.used_node_ids.insert(element.id.to_string());
                if let Some(label) = scene.bound_text(element.id.as_str()) {
                    ids.label_to_id
                        .entry(label.to_string())
                        .or_insert_with(|| element.id.to_string());
                }
            } else if element.is_arrow() {
                ids.used_edge_ids.insert(element.id.to_string());
            }
        }
        ids
    }
}
