//! Structured diagram description produced by the generator.
//!
//! A [`DiagramSpec`] is the pre-text form of a diagram. It is validated
//! against its schema invariants and then rendered to diagram text by
//! [`crate::render::render_spec`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pattern every semantic node id must match.
pub const DEFAULT_ID_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_]*$";

/// Hard upper bound on label length accepted by the schema.
pub const MAX_LABEL_LEN: usize = 200;

/// Check an id against [`DEFAULT_ID_PATTERN`] without compiling a regex.
#[must_use]
pub fn is_semantic_id(id: &str) -> bool {
    let mut chars = id.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Flow direction of a diagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Top to bottom.
    #[default]
    TD,
    /// Left to right.
    LR,
    /// Bottom to top.
    BT,
    /// Right to left.
    RL,
}

impl Direction {
    /// All accepted directions.
    pub const ALL: [Direction; 4] = [Self::TD, Self::LR, Self::BT, Self::RL];

    /// Header token for this direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TD => "TD",
            Self::LR => "LR",
            Self::BT => "BT",
            Self::RL => "RL",
        }
    }

    /// Whether layers advance along the horizontal axis.
    #[must_use]
    pub fn is_horizontal(self) -> bool {
        matches!(self, Self::LR | Self::RL)
    }

    /// Whether layers advance towards decreasing coordinates.
    #[must_use]
    pub fn is_reversed(self) -> bool {
        matches!(self, Self::BT | Self::RL)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a direction token is not one of the four accepted values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported direction `{0}` (expected TD, LR, BT or RL)")]
pub struct ParseDirectionError(pub String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| ParseDirectionError(s.to_string()))
    }
}

/// Node shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    /// `["label"]`
    #[default]
    Rectangle,
    /// `("label")`
    Rounded,
    /// `(["label"])`
    Stadium,
    /// `{"label"}`
    Decision,
    /// `(("label"))`
    Circle,
    /// Accepted on input, always rendered as [`Shape::Circle`].
    Ellipse,
    /// `{{"label"}}`
    Hexagon,
}

impl Shape {
    /// The six shapes that have their own bracket pair.
    pub const BRACKETED: [Shape; 6] = [
        Self::Rectangle,
        Self::Rounded,
        Self::Stadium,
        Self::Decision,
        Self::Circle,
        Self::Hexagon,
    ];

    /// Collapse aliases onto their bracketed shape.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Ellipse => Self::Circle,
            other => other,
        }
    }

    /// Opening and closing bracket for this shape.
    #[must_use]
    pub fn brackets(self) -> (&'static str, &'static str) {
        match self.normalized() {
            Self::Rounded => ("(", ")"),
            Self::Stadium => ("([", "])"),
            Self::Decision => ("{", "}"),
            Self::Circle | Self::Ellipse => ("((", "))"),
            Self::Hexagon => ("{{", "}}"),
            Self::Rectangle => ("[", "]"),
        }
    }
}

/// A node in a [`DiagramSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecNode {
    /// Semantic node id.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Shape, rectangle when omitted.
    #[serde(default)]
    pub shape: Shape,
    /// Group this node belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// A group (named block) in a [`DiagramSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecGroup {
    /// Group id.
    pub id: String,
    /// Display label.
    pub label: String,
}

/// An edge in a [`DiagramSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecEdge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Optional edge label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Dashed arrow style.
    #[serde(default)]
    pub dashed: bool,
}

/// Structured, pre-text representation of a diagram.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagramSpec {
    /// Flow direction.
    #[serde(default)]
    pub direction: Direction,
    /// Nodes in declaration order.
    pub nodes: Vec<SpecNode>,
    /// Groups in declaration order.
    #[serde(default)]
    pub groups: Vec<SpecGroup>,
    /// Edges in declaration order.
    #[serde(default)]
    pub edges: Vec<SpecEdge>,
}

/// A schema rule broken by a [`DiagramSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    /// The diagram spec declares no nodes.
    #[error("diagram declares no nodes")]
    EmptyDiagram,
    /// A node id does not match the identifier pattern.
    #[error("node id `{0}` must match {DEFAULT_ID_PATTERN}")]
    InvalidNodeId(String),
    /// A node id is declared more than once.
    #[error("node id `{0}` is declared more than once")]
    DuplicateNodeId(String),
    /// A node, group or edge label exceeds [`MAX_LABEL_LEN`].
    #[error("label of `{owner}` is {len} characters (max {MAX_LABEL_LEN})")]
    LabelTooLong {
        /// Id of the element carrying the label.
        owner: String,
        /// Label length in characters.
        len: usize,
    },
    /// An edge endpoint is neither in the diagram spec nor on the live canvas.
    #[error("edge {from} -> {to} references unknown node `{missing}`")]
    UnknownEdgeEndpoint {
        /// Edge source.
        from: String,
        /// Edge target.
        to: String,
        /// The endpoint that could not be resolved.
        missing: String,
    },
}

impl DiagramSpec {
    /// Parse a spec from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not match the diagram spec schema.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Check every schema invariant, returning all violations found.
    ///
    /// `live_ids` are node ids already on the canvas; edges may point at them.
    ///
    /// # Errors
    ///
    /// Returns the list of violations when any invariant is broken.
    pub fn validate(&self, live_ids: &HashSet<String>) -> Result<(), Vec<SchemaViolation>> {
        let mut violations = Vec::new();
        if self.nodes.is_empty() {
            violations.push(SchemaViolation::EmptyDiagram);
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !is_semantic_id(&node.id) {
                violations.push(SchemaViolation::InvalidNodeId(node.id.clone()));
            }
            if !seen.insert(node.id.as_str()) {
                violations.push(SchemaViolation::DuplicateNodeId(node.id.clone()));
            }
            check_label(&node.id, &node.label, &mut violations);
        }
        for group in &self.groups {
            check_label(&group.id, &group.label, &mut violations);
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !seen.contains(endpoint.as_str()) && !live_ids.contains(endpoint) {
                    violations.push(SchemaViolation::UnknownEdgeEndpoint {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
            if let Some(label) = &edge.label {
                check_label(&format!("{}->{}", edge.from, edge.to), label, &mut violations);
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

fn check_label(owner: &str, label: &str, violations: &mut Vec<SchemaViolation>) {
    let len = label.chars().count();
    if len > MAX_LABEL_LEN {
        violations.push(SchemaViolation::LabelTooLong {
            owner: owner.to_string(),
            len,
        });
    }
}
