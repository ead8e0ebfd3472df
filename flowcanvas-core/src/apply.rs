//! Atomic application of accepted diagram text to the canvas.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::convert::{ShapeConverter, Skeleton};
use crate::diff::{diff, render_merged, DiagramDiff, StructuralSnapshot};
use crate::ids::allocate_edge_ids;
use crate::parse::{parse_document, ParsedDocument};
use crate::record::{CanvasRecord, RecordStore};
use crate::remap::{recentre, remap_elements};
use crate::store::CanvasStore;
use crate::{CanvasError, CanvasResult, Element, ElementKind};

/// How accepted text is applied to a canvas that already has content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyMode {
    /// Replace every element with the new diagram.
    #[default]
    ReplaceCanvas,
    /// Merge the new text into the existing diagram first.
    Incremental,
}

impl fmt::Display for ApplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReplaceCanvas => "replace",
            Self::Incremental => "incremental",
        })
    }
}

impl FromStr for ApplyMode {
    type Err = CanvasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" | "replace_canvas" => Ok(Self::ReplaceCanvas),
            "incremental" | "merge" => Ok(Self::Incremental),
            other => Err(CanvasError::InvalidOperation(format!(
                "unknown apply mode `{other}`"
            ))),
        }
    }
}

/// Summary of a successful apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// Text that was applied (the merged document in incremental mode).
    pub diagram_text: String,
    /// Number of elements now on the canvas.
    pub element_count: usize,
    /// Generated id to semantic id.
    pub mapping: HashMap<String, String>,
    /// Changes relative to the previous canvas, in incremental mode.
    pub diff: Option<DiagramDiff>,
}

/// Converts accepted text into elements and commits them with rollback.
#[derive(Clone)]
pub struct DiagramApplier {
    converter: Arc<dyn ShapeConverter>,
    records: Arc<dyn RecordStore>,
    record_key: String,
    mode: ApplyMode,
}

impl fmt::Debug for DiagramApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagramApplier")
            .field("record_key", &self.record_key)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl DiagramApplier {
    /// Create an applier writing records under `record_key`.
    pub fn new(
        converter: Arc<dyn ShapeConverter>,
        records: Arc<dyn RecordStore>,
        record_key: impl Into<String>,
    ) -> Self {
        Self {
            converter,
            records,
            record_key: record_key.into(),
            mode: ApplyMode::default(),
        }
    }

    /// Set the apply mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ApplyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Current apply mode.
    #[must_use]
    pub fn mode(&self) -> ApplyMode {
        self.mode
    }

    /// Apply `text` to `store`.
    ///
    /// The record is persisted before the canvas is published; on any
    /// failure the live canvas is never touched and subscribers see nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ConversionFailure`] if the converter produces
    /// no elements, or [`CanvasError::Store`] if the record cannot be
    /// persisted.
    pub fn apply(&self, store: &CanvasStore, text: &str) -> CanvasResult<ApplyOutcome> {
        store.transaction(|tx| {
            let scene = tx.get();
            let (text, changes) = match self.mode {
                ApplyMode::Incremental if !scene.is_empty() => {
                    let snapshot = StructuralSnapshot::from_canvas(&scene, tx.diagram_text());
                    let changes = diff(&snapshot, text);
                    tracing::debug!(
                        added = changes.nodes_to_add.len(),
                        removed = changes.nodes_to_remove.len(),
                        relabelled = changes.nodes_to_update.len(),
                        "merging into existing diagram"
                    );
                    (render_merged(&snapshot, text), Some(changes))
                }
                _ => (text.to_string(), None),
            };

            let doc = parse_document(&text);
            let edge_ids = allocate_edge_ids(
                doc.edges.iter().map(|e| (e.from.as_str(), e.to.as_str())),
                &HashSet::new(),
            )
            .map_err(|e| CanvasError::InvalidOperation(e.message))?;
            let skeleton = Skeleton::from_document(&doc, edge_ids);

            let converted = self.converter.convert(&skeleton);
            if converted.is_empty() {
                return Err(CanvasError::ConversionFailure {
                    nodes: skeleton.nodes.len(),
                });
            }

            let remapped = remap_elements(converted, &skeleton.original_ids());
            let mut elements = remapped.elements;
            relabel(&mut elements, &labels(&doc));
            recentre(&mut elements, &scene);

            let element_count = elements.len();
            self.records.write(
                &self.record_key,
                &CanvasRecord::new(elements.clone(), text.clone()),
            )?;
            tx.commit(elements, text.clone());

            tracing::info!(
                elements = element_count,
                mode = %self.mode,
                key = %self.record_key,
                "applied diagram to canvas"
            );
            Ok(ApplyOutcome {
                diagram_text: text,
                element_count,
                mapping: remapped.mapping,
                diff: changes,
            })
        })
    }
}

/// Real labels by semantic id, for nodes and groups.
fn labels(doc: &ParsedDocument) -> HashMap<String, String> {
    doc.nodes
        .iter()
        .map(|n| (n.id.clone(), n.label.clone().unwrap_or_else(|| n.id.clone())))
        .chain(doc.groups.iter().map(|g| (g.id.clone(), g.label.clone())))
        .collect()
}

/// Replace the id text of `text_<id>` elements with the real label.
fn relabel(elements: &mut [Element], labels: &HashMap<String, String>) {
    for element in elements.iter_mut() {
        let Some(id) = element.id.as_str().strip_prefix("text_") else {
            continue;
        };
        let Some(label) = labels.get(id) else {
            continue;
        };
        if let ElementKind::Text { text, .. } = &mut element.kind {
            text.clone_from(label);
        }
    }
}
