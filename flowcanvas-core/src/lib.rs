//! # FlowCanvas Core
//!
//! Synchronous diagram logic for voice-driven canvas editing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               flowcanvas-core               │
//! ├─────────────────────────────────────────────┤
//! │  Diagram Text    │  Canvas                  │
//! │  - Spec render   │  - Elements & scene      │
//! │  - Lint rules    │  - Store & records       │
//! │  - Id allocation │  - Context projection    │
//! ├─────────────────────────────────────────────┤
//! │  Apply Path                                 │
//! │  - Skeleton conversion  - Id remapping      │
//! │  - Diff / merge         - Atomic commit     │
//! └─────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod apply;
pub mod context;
pub mod convert;
pub mod diff;
pub mod element;
pub mod error;
pub mod ids;
pub mod lint;
pub mod parse;
pub mod record;
pub mod remap;
pub mod render;
pub mod scene;
pub mod spec;
pub mod store;

pub use apply::{ApplyMode, ApplyOutcome, DiagramApplier};
pub use context::{CanvasContext, LiveIds};
pub use convert::{LayeredConverter, ShapeConverter, Skeleton};
pub use diff::{diff, render_merged, DiagramDiff, SnapshotGroup, StructuralSnapshot};
pub use element::{BoundElement, BoundKind, Element, ElementId, ElementKind, Transform};
pub use error::{CanvasError, CanvasResult};
pub use ids::{
    allocate_edge_ids, validate_ids, IdError, IdErrorCode, IdValidationOptions,
    IdValidationReport,
};
pub use lint::{lint, LintCode, LintOptions, LintReport, LintViolation, Severity};
pub use parse::{check_syntax, parse_document, StrictSyntax, SyntaxChecker, SyntaxError};
pub use record::{CanvasRecord, FileRecordStore, MemoryRecordStore, RecordStore};
pub use remap::{classify, recentre, remap_elements, RemapResult, ShapeClass};
pub use render::render_spec;
pub use scene::Scene;
pub use spec::{DiagramSpec, Direction, SchemaViolation, Shape};
pub use store::{CanvasStore, CanvasTransaction, StoreError};

/// FlowCanvas core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
