//! Semantic id recovery after shape conversion.
//!
//! A converter lays out a structural skeleton and assigns random ids to the
//! elements it produces. [`remap_elements`] restores the semantic ids from
//! the text the skeleton carried, and [`recentre`] moves the result into
//! view.
//!
//! The mapping is best-effort. Containers are recognized by a geometric
//! heuristic ([`classify`]) which can mistake a very large regular node for
//! a group container.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementId, ElementKind, Transform};
use crate::scene::Scene;
use crate::spec::is_semantic_id;

/// Rectangles at least this large (px²) are group containers.
pub const CONTAINER_MIN_AREA: f32 = 80_000.0;

/// Minimum longest side (px) for the aspect-ratio rule.
pub const CONTAINER_MIN_SIDE: f32 = 300.0;

/// Minimum aspect ratio for the aspect-ratio rule.
pub const CONTAINER_MIN_ASPECT: f32 = 3.0;

/// Role of a converted shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShapeClass {
    /// Rectangle enclosing a group of nodes.
    GroupContainer,
    /// A diagram node.
    RegularNode,
}

/// Classify a shape element.
///
/// Only rectangles can be containers: very large ones, or long strongly
/// non-square ones. Diamonds and ellipses are always regular nodes.
/// Returns `None` for text and arrows.
#[must_use]
pub fn classify(element: &Element) -> Option<ShapeClass> {
    match element.kind {
        ElementKind::Rectangle => {
            let Transform { width, height, .. } = element.transform;
            let (w, h) = (width.abs(), height.abs());
            let long = w.max(h);
            let short = w.min(h);
            let aspect = if short > 0.0 { long / short } else { f32::INFINITY };
            let container = w * h >= CONTAINER_MIN_AREA
                || (long >= CONTAINER_MIN_SIDE && aspect >= CONTAINER_MIN_ASPECT);
            Some(if container {
                ShapeClass::GroupContainer
            } else {
                ShapeClass::RegularNode
            })
        }
        ElementKind::Diamond | ElementKind::Ellipse => Some(ShapeClass::RegularNode),
        ElementKind::Text { .. } | ElementKind::Arrow { .. } => None,
    }
}

/// An edge of the original skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalEdge {
    /// Semantic edge id.
    pub id: String,
    /// Semantic source id.
    pub from: String,
    /// Semantic target id.
    pub to: String,
}

/// Structural ids the converted elements should carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginalIds {
    /// Node and group ids.
    pub shapes: HashSet<String>,
    /// Edges with their endpoints.
    pub edges: Vec<OriginalEdge>,
}

/// Remapped elements and the mapping that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapResult {
    /// Elements with semantic ids restored where possible.
    pub elements: Vec<Element>,
    /// Generated id to semantic id.
    pub mapping: HashMap<String, String>,
}

/// Hands out ids unique across the whole element list, including ids
/// that stay as generated.
struct Allocator {
    used: HashSet<String>,
}

impl Allocator {
    fn seeded(elements: &[Element]) -> Self {
        Self {
            used: elements.iter().map(|e| e.id.to_string()).collect(),
        }
    }

    /// Release `current` and claim a unique id based on `wanted`.
    fn rename(&mut self, current: &str, wanted: &str) -> String {
        self.used.remove(current);
        self.unique(wanted)
    }

    fn unique(&mut self, id: &str) -> String {
        let mut candidate = id.to_string();
        let mut n = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{id}_{n}");
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

/// Restore semantic ids on converted elements.
///
/// Elements that cannot be matched keep their generated ids.
#[must_use]
pub fn remap_elements(elements: Vec<Element>, original: &OriginalIds) -> RemapResult {
    let mut texts: HashMap<&str, Vec<&str>> = HashMap::new();
    for element in &elements {
        if let (Some(container), Some(text)) = (element.container_id(), element.text()) {
            texts.entry(container.as_str()).or_default().push(text.trim());
        }
    }

    let mut mapping: HashMap<String, String> = HashMap::new();
    let mut alloc = Allocator::seeded(&elements);

    let classified: Vec<(&Element, ShapeClass)> = elements
        .iter()
        .filter_map(|e| classify(e).map(|class| (e, class)))
        .collect();

    let containers = classified
        .iter()
        .filter(|(_, c)| *c == ShapeClass::GroupContainer);
    for (element, _) in containers {
        let mut bound = texts.get(element.id.as_str()).into_iter().flatten();
        if let Some(text) = bound.find(|t| original.shapes.contains(**t)) {
            mapping.insert(element.id.to_string(), alloc.rename(element.id.as_str(), text));
        }
    }

    let nodes = classified
        .iter()
        .filter(|(_, c)| *c == ShapeClass::RegularNode);
    for (element, _) in nodes {
        let bound: Vec<&str> = texts
            .get(element.id.as_str())
            .cloned()
            .unwrap_or_default();
        let chosen = bound
            .iter()
            .find(|t| original.shapes.contains(**t))
            .or_else(|| bound.iter().find(|t| is_semantic_id(t)));
        if let Some(text) = chosen {
            mapping.insert(element.id.to_string(), alloc.rename(element.id.as_str(), text));
        }
    }

    let resolve = |id: Option<&ElementId>| -> Option<String> {
        id.map(|i| {
            mapping
                .get(i.as_str())
                .cloned()
                .unwrap_or_else(|| i.to_string())
        })
    };
    let mut consumed = vec![false; original.edges.len()];
    let mut arrow_ids = Vec::new();
    for element in &elements {
        let Some((start, end)) = element.bindings() else {
            continue;
        };
        let (Some(from), Some(to)) = (resolve(start), resolve(end)) else {
            continue;
        };
        let matched = original
            .edges
            .iter()
            .enumerate()
            .find(|(i, e)| !consumed[*i] && e.from == from && e.to == to);
        if let Some((i, edge)) = matched {
            consumed[i] = true;
            arrow_ids.push((element.id.to_string(), edge.id.clone()));
        }
    }
    for (generated, edge_id) in arrow_ids {
        let id = alloc.rename(&generated, &edge_id);
        mapping.insert(generated, id);
    }

    let mut text_ids = Vec::new();
    for element in &elements {
        let Some(container) = element.container_id() else {
            continue;
        };
        if let Some(semantic) = mapping.get(container.as_str()) {
            text_ids.push((element.id.to_string(), format!("text_{semantic}")));
        }
    }
    for (generated, text_id) in text_ids {
        let id = alloc.rename(&generated, &text_id);
        mapping.insert(generated, id);
    }

    tracing::debug!(
        elements = elements.len(),
        mapped = mapping.len(),
        "remapped converted elements"
    );
    let elements = elements
        .into_iter()
        .map(|e| apply_mapping(e, &mapping))
        .collect();
    RemapResult { elements, mapping }
}

fn apply_mapping(mut element: Element, mapping: &HashMap<String, String>) -> Element {
    let remap = |id: &mut ElementId| {
        if let Some(semantic) = mapping.get(id.as_str()) {
            *id = ElementId::new(semantic.clone());
        }
    };
    remap(&mut element.id);
    match &mut element.kind {
        ElementKind::Text {
            container_id: Some(container),
            ..
        } => remap(container),
        ElementKind::Arrow {
            start_binding,
            end_binding,
            ..
        } => {
            start_binding.iter_mut().for_each(remap);
            end_binding.iter_mut().for_each(remap);
        }
        _ => {}
    }
    for bound in &mut element.bound_elements {
        remap(&mut bound.id);
    }
    element
}

/// Bounding box of every element, or `None` when empty.
#[must_use]
pub fn bounding_box(elements: &[Element]) -> Option<Transform> {
    let mut iter = elements.iter().map(|e| e.transform);
    let first = iter.next()?;
    let (mut x0, mut y0) = (first.x, first.y);
    let (mut x1, mut y1) = (first.x + first.width, first.y + first.height);
    for t in iter {
        x0 = x0.min(t.x);
        y0 = y0.min(t.y);
        x1 = x1.max(t.x + t.width);
        y1 = y1.max(t.y + t.height);
    }
    Some(Transform::new(x0, y0, x1 - x0, y1 - y0))
}

/// Translate `elements` so their bounding-box centre is the viewport centre.
pub fn recentre(elements: &mut [Element], scene: &Scene) {
    let Some(bounds) = bounding_box(elements) else {
        return;
    };
    let (cx, cy) = bounds.center();
    let (vx, vy) = scene.viewport_center();
    let (dx, dy) = (vx - cx, vy - cy);
    for element in elements.iter_mut() {
        element.transform.x += dx;
        element.transform.y += dy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::BoundKind;

    fn rect(id: &str, w: f32, h: f32) -> Element {
        Element::new(ElementKind::Rectangle)
            .with_id(id)
            .with_transform(Transform::new(0.0, 0.0, w, h))
    }

    fn label(id: &str, text: &str, container: &str) -> Element {
        Element::bound_text(text, &ElementId::new(container)).with_id(id)
    }

    fn arrow(id: &str, from: &str, to: &str) -> Element {
        Element::new(ElementKind::Arrow {
            start_binding: Some(ElementId::new(from)),
            end_binding: Some(ElementId::new(to)),
            dashed: false,
        })
        .with_id(id)
    }

    fn original(shapes: &[&str], edges: &[(&str, &str, &str)]) -> OriginalIds {
        OriginalIds {
            shapes: shapes.iter().map(ToString::to_string).collect(),
            edges: edges
                .iter()
                .map(|(id, from, to)| OriginalEdge {
                    id: (*id).into(),
                    from: (*from).into(),
                    to: (*to).into(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(classify(&rect("n", 150.0, 60.0)), Some(ShapeClass::RegularNode));
        assert_eq!(classify(&rect("g", 400.0, 200.0)), Some(ShapeClass::GroupContainer));
        assert_eq!(classify(&rect("bar", 320.0, 100.0)), Some(ShapeClass::GroupContainer));
        assert_eq!(classify(&rect("wide", 290.0, 50.0)), Some(ShapeClass::RegularNode));
        let diamond = Element::new(ElementKind::Diamond)
            .with_transform(Transform::new(0.0, 0.0, 1000.0, 1000.0));
        assert_eq!(classify(&diamond), Some(ShapeClass::RegularNode));
        assert_eq!(classify(&label("t", "x", "n")), None);
    }

    #[test]
    fn test_remap_nodes_edges_and_texts() {
        let elements = vec![
            rect("r1", 150.0, 60.0).with_bound(&ElementId::new("t1"), BoundKind::Text),
            label("t1", "start", "r1"),
            rect("r2", 150.0, 60.0),
            label("t2", "a", "r2"),
            arrow("x1", "r1", "r2"),
        ];
        let result = remap_elements(
            elements,
            &original(&["start", "a"], &[("start_a", "start", "a")]),
        );
        let ids: Vec<_> = result.elements.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["start", "text_start", "a", "text_a", "start_a"]);
        assert_eq!(result.elements[0].bound_elements[0].id.as_str(), "text_start");
        assert_eq!(
            result.elements[1].container_id().map(ElementId::as_str),
            Some("start")
        );
        let (from, to) = result.elements[4].bindings().expect("arrow");
        assert_eq!(from.map(ElementId::as_str), Some("start"));
        assert_eq!(to.map(ElementId::as_str), Some("a"));
        assert_eq!(result.mapping.get("x1").map(String::as_str), Some("start_a"));
    }

    #[test]
    fn test_container_matched_by_exact_text() {
        let elements = vec![
            rect("big", 500.0, 400.0),
            label("tg", "checkout", "big"),
            rect("other", 500.0, 400.0),
            label("to", "Not An Id", "other"),
        ];
        let result = remap_elements(elements, &original(&["checkout"], &[]));
        assert_eq!(result.elements[0].id.as_str(), "checkout");
        assert_eq!(result.elements[2].id.as_str(), "other");
    }

    #[test]
    fn test_pattern_fallback_and_dedup() {
        let elements = vec![
            rect("r1", 100.0, 50.0),
            label("t1", "dup", "r1"),
            rect("r2", 100.0, 50.0),
            label("t2", "dup", "r2"),
            rect("r3", 100.0, 50.0),
            label("t3", "has space", "r3"),
        ];
        let result = remap_elements(elements, &original(&[], &[]));
        let ids: Vec<_> = result.elements.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["dup", "text_dup", "dup_2", "text_dup_2", "r3", "t3"]);
    }

    #[test]
    fn test_dedup_avoids_kept_generated_ids() {
        let elements = vec![
            rect("dup_2", 100.0, 50.0),
            label("t0", "has space", "dup_2"),
            rect("r1", 100.0, 50.0),
            label("t1", "dup", "r1"),
            rect("r2", 100.0, 50.0),
            label("t2", "dup", "r2"),
            rect("a", 100.0, 50.0),
            label("ta", "a", "a"),
        ];
        let result = remap_elements(elements, &original(&["a"], &[]));
        let ids: Vec<_> = result.elements.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["dup_2", "t0", "dup", "text_dup", "dup_3", "text_dup_3", "a", "text_a"]
        );
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_arrow_needs_both_endpoints() {
        let elements = vec![
            rect("r1", 100.0, 50.0),
            label("t1", "a", "r1"),
            rect("r2", 100.0, 50.0),
            arrow("x1", "r1", "r2"),
            arrow("x2", "r1", "r1"),
        ];
        let result = remap_elements(elements, &original(&["a", "b"], &[("a_b", "a", "b")]));
        assert_eq!(result.elements[3].id.as_str(), "x1");
        assert_eq!(result.elements[4].id.as_str(), "x2");
    }

    #[test]
    fn test_parallel_arrows_consume_edges_in_order() {
        let elements = vec![
            rect("r1", 100.0, 50.0),
            label("t1", "a", "r1"),
            rect("r2", 100.0, 50.0),
            label("t2", "b", "r2"),
            arrow("x1", "r1", "r2"),
            arrow("x2", "r1", "r2"),
            arrow("x3", "r1", "r2"),
        ];
        let result = remap_elements(
            elements,
            &original(&["a", "b"], &[("a_b", "a", "b"), ("a_b_2", "a", "b")]),
        );
        let ids: Vec<_> = result.elements[4..].iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a_b", "a_b_2", "x3"]);
    }

    #[test]
    fn test_recentre_moves_bbox_to_viewport_centre() {
        let mut elements = vec![
            Element::new(ElementKind::Rectangle).with_transform(Transform::new(0.0, 0.0, 100.0, 100.0)),
            Element::new(ElementKind::Rectangle).with_transform(Transform::new(300.0, 100.0, 100.0, 100.0)),
        ];
        let scene = Scene::new(1000.0, 800.0);
        recentre(&mut elements, &scene);
        let bounds = bounding_box(&elements).expect("bounds");
        assert_eq!(bounds.center(), (500.0, 400.0));
        assert!((bounds.width - 400.0).abs() < f32::EPSILON);

        let mut empty: Vec<Element> = Vec::new();
        recentre(&mut empty, &scene);
        assert!(empty.is_empty());
    }
}
