//! Scene graph for managing canvas elements.

use serde::{Deserialize, Serialize};

use crate::{CanvasError, CanvasResult, Element};

/// A scene containing all canvas elements in paint order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// All elements in the scene, in paint order.
    elements: Vec<Element>,
    /// Viewport width in pixels.
    pub viewport_width: f32,
    /// Viewport height in pixels.
    pub viewport_height: f32,
    /// Current zoom level (1.0 = 100%).
    pub zoom: f32,
    /// Pan offset X.
    pub pan_x: f32,
    /// Pan offset Y.
    pub pan_y: f32,
}

impl Scene {
    /// Create a new empty scene with the given viewport size.
    #[must_use]
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            elements: Vec::new(),
            viewport_width: width,
            viewport_height: height,
            zoom: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
        }
    }

    /// Add an element to the scene.
    pub fn add_element(&mut self, element: Element) {
        self.elements.push(element);
    }

    /// Remove an element from the scene.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not found.
    pub fn remove_element(&mut self, id: &str) -> CanvasResult<Element> {
        let index = self
            .elements
            .iter()
            .position(|e| e.id.as_str() == id)
            .ok_or_else(|| CanvasError::ElementNotFound(id.to_string()))?;
        Ok(self.elements.remove(index))
    }

    /// Get an element by ID.
    #[must_use]
    pub fn get_element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id.as_str() == id)
    }

    /// Get a mutable reference to an element by ID.
    pub fn get_element_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.id.as_str() == id)
    }

    /// All elements in paint order.
    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Replace every element, keeping the viewport.
    pub fn set_elements(&mut self, elements: Vec<Element>) {
        self.elements = elements;
    }

    /// Text of the first text element bound to `container_id`.
    #[must_use]
    pub fn bound_text(&self, container_id: &str) -> Option<&str> {
        self.elements
            .iter()
            .filter(|e| e.container_id().is_some_and(|c| c.as_str() == container_id))
            .find_map(Element::text)
    }

    /// Set the viewport dimensions.
    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport_width = width;
        self.viewport_height = height;
    }

    /// Center of the visible viewport in canvas coordinates.
    #[must_use]
    pub fn viewport_center(&self) -> (f32, f32) {
        let zoom = if self.zoom > 0.0 { self.zoom } else { 1.0 };
        (
            (self.viewport_width / 2.0 - self.pan_x) / zoom,
            (self.viewport_height / 2.0 - self.pan_y) / zoom,
        )
    }

    /// Remove all elements.
    pub fn clear(&mut self) {
        self.elements.clear();
    }

    /// Get the number of elements in the scene.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Check if the scene is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Serialize the scene to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> CanvasResult<String> {
        serde_json::to_string(self).map_err(CanvasError::Serialization)
    }

    /// Deserialize a scene from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> CanvasResult<Self> {
        serde_json::from_str(json).map_err(CanvasError::Serialization)
    }
}
