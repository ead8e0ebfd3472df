//! Canvas elements - the building blocks of scenes.
//!
//! Elements are canvas-native: positioned shapes, free or bound text, and
//! arrows bound to shapes. Identifiers are plain strings so that semantic
//! ids (`start`, `checkout_flow`) and converter-assigned UUIDs share one
//! identifier space.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Create an element ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random (non-semantic) element ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ElementId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The type of content an element contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ElementKind {
    /// A rectangle (regular node or group container).
    Rectangle,

    /// A diamond (decision node).
    Diamond,

    /// An ellipse (circle node).
    Ellipse,

    /// A text label, optionally bound to a container.
    Text {
        /// Text content.
        text: String,
        /// Element this text is bound to, if any.
        container_id: Option<ElementId>,
        /// Font size in pixels.
        font_size: f32,
    },

    /// An arrow connecting two shapes.
    Arrow {
        /// Element the arrow starts at.
        start_binding: Option<ElementId>,
        /// Element the arrow ends at.
        end_binding: Option<ElementId>,
        /// Whether the stroke is dashed.
        dashed: bool,
    },
}

impl ElementKind {
    /// Short type name as exposed to the generator.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Rectangle => "rectangle",
            Self::Diamond => "diamond",
            Self::Ellipse => "ellipse",
            Self::Text { .. } => "text",
            Self::Arrow { .. } => "arrow",
        }
    }
}

/// Kind of an element listed in another element's bound elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundKind {
    /// A bound text label.
    Text,
    /// An arrow attached to this element.
    Arrow,
}

/// Reference from a shape to an element bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundElement {
    /// Bound element ID.
    pub id: ElementId,
    /// Bound element kind.
    #[serde(rename = "type")]
    pub kind: BoundKind,
}

/// Transform for positioning and sizing elements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// X position (pixels from left).
    pub x: f32,
    /// Y position (pixels from top).
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
    /// Z-index for layering.
    pub z_index: i32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            z_index: 0,
        }
    }
}

impl Transform {
    /// Create a transform at the given position and size.
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            z_index: 0,
        }
    }

    /// Center point of the transform.
    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Check whether `other` lies entirely within this transform.
    #[must_use]
    pub fn encloses(&self, other: &Transform) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }
}

/// A canvas element with content and transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Identifier.
    pub id: ElementId,
    /// Element content type.
    pub kind: ElementKind,
    /// Position and size.
    pub transform: Transform,
    /// Elements bound to this one (labels, attached arrows).
    #[serde(default)]
    pub bound_elements: Vec<BoundElement>,
    /// Visual groups this element belongs to.
    #[serde(default)]
    pub group_ids: Vec<String>,
}

impl Element {
    /// Create a new element with the given kind and a generated ID.
    #[must_use]
    pub fn new(kind: ElementKind) -> Self {
        Self {
            id: ElementId::generate(),
            kind,
            transform: Transform::default(),
            bound_elements: Vec::new(),
            group_ids: Vec::new(),
        }
    }

    /// Create a text element bound to `container`.
    #[must_use]
    pub fn bound_text(text: impl Into<String>, container: &ElementId) -> Self {
        Self::new(ElementKind::Text {
            text: text.into(),
            container_id: Some(container.clone()),
            font_size: 16.0,
        })
    }

    /// Set the ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<ElementId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the transform.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Record an element bound to this one.
    #[must_use]
    pub fn with_bound(mut self, id: &ElementId, kind: BoundKind) -> Self {
        self.bound_elements.push(BoundElement {
            id: id.clone(),
            kind,
        });
        self
    }

    /// Whether this element is a node shape (rectangle, diamond, ellipse).
    #[must_use]
    pub fn is_shape(&self) -> bool {
        matches!(
            self.kind,
            ElementKind::Rectangle | ElementKind::Diamond | ElementKind::Ellipse
        )
    }

    /// Whether this element is an arrow.
    #[must_use]
    pub fn is_arrow(&self) -> bool {
        matches!(self.kind, ElementKind::Arrow { .. })
    }

    /// Text content, if this is a text element.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Container this text is bound to, if any.
    #[must_use]
    pub fn container_id(&self) -> Option<&ElementId> {
        match &self.kind {
            ElementKind::Text { container_id, .. } => container_id.as_ref(),
            _ => None,
        }
    }

    /// Start and end bindings, if this is an arrow.
    #[must_use]
    pub fn bindings(&self) -> Option<(Option<&ElementId>, Option<&ElementId>)> {
        match &self.kind {
            ElementKind::Arrow {
                start_binding,
                end_binding,
                ..
            } => Some((start_binding.as_ref(), end_binding.as_ref())),
            _ => None,
        }
    }
}
