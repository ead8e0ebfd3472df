//! Identifier validation and allocation across repeated edits.
//!
//! Ids in a candidate document are checked against their format, each
//! other, the reserved grammar keywords, and the ids already on the live
//! canvas. Suggested renames and synthesized edge ids are advisory only;
//! nothing here rewrites the document.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Write as _};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parse::{parse_document, ParsedDocument};
use crate::spec::{is_semantic_id, DEFAULT_ID_PATTERN};

/// Grammar keywords that cannot be used as node ids.
pub const DEFAULT_RESERVED_IDS: &[&str] = &[
    "end",
    "subgraph",
    "graph",
    "flowchart",
    "direction",
    "style",
    "classDef",
    "class",
    "click",
    "linkStyle",
    "default",
];

/// Suffixed variants tried before an edge id is declared unresolvable.
pub const MAX_EDGE_ID_PROBES: usize = 100;

/// Id error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdErrorCode {
    /// Id does not match the identifier pattern.
    InvalidIdFormat,
    /// Id declared more than once in the document.
    IdDuplicateLocal,
    /// Id declared in the document is already on the canvas.
    IdCollisionExisting,
    /// Id is a grammar keyword.
    ReservedId,
    /// Label was previously mapped to a different id.
    AmbiguousLabelMapping,
    /// Edge endpoint is neither declared nor on the canvas.
    MissingNodeForEdge,
    /// No free edge id could be synthesized.
    UnresolvableId,
}

impl IdErrorCode {
    /// Wire name of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidIdFormat => "INVALID_ID_FORMAT",
            Self::IdDuplicateLocal => "ID_DUPLICATE_LOCAL",
            Self::IdCollisionExisting => "ID_COLLISION_EXISTING",
            Self::ReservedId => "RESERVED_ID",
            Self::AmbiguousLabelMapping => "AMBIGUOUS_LABEL_MAPPING",
            Self::MissingNodeForEdge => "MISSING_NODE_FOR_EDGE",
            Self::UnresolvableId => "UNRESOLVABLE_ID",
        }
    }
}

impl fmt::Display for IdErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single id problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdError {
    /// Error code.
    pub code: IdErrorCode,
    /// Human-readable description.
    pub message: String,
    /// The offending id.
    pub id: String,
    /// 1-based line, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl IdError {
    fn new(code: IdErrorCode, id: &str, line: Option<usize>, message: String) -> Self {
        Self {
            code,
            message,
            id: id.to_string(),
            line,
        }
    }
}

/// Inputs to [`validate_ids`].
#[derive(Debug, Clone)]
pub struct IdValidationOptions {
    /// Node ids already on the live canvas.
    pub used_node_ids: HashSet<String>,
    /// Edge ids already on the live canvas.
    pub used_edge_ids: HashSet<String>,
    /// Remembered label to id assignments from earlier edits.
    pub label_to_id: HashMap<String, String>,
    /// Ids that collide with grammar keywords.
    pub reserved_ids: HashSet<String>,
    /// Pattern every id must match.
    pub id_pattern: String,
    /// Whether to synthesize edge ids.
    pub synthesize_edge_ids: bool,
    /// Whether declared ids are checked against `used_node_ids`.
    pub check_existing: bool,
}

impl Default for IdValidationOptions {
    fn default() -> Self {
        Self {
            used_node_ids: HashSet::new(),
            used_edge_ids: HashSet::new(),
            label_to_id: HashMap::new(),
            reserved_ids: DEFAULT_RESERVED_IDS.iter().map(ToString::to_string).collect(),
            id_pattern: DEFAULT_ID_PATTERN.to_string(),
            synthesize_edge_ids: false,
            check_existing: true,
        }
    }
}

/// Advisory fixes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdSuggestions {
    /// Colliding id to suggested replacement.
    pub node_id_renames: BTreeMap<String, String>,
    /// Synthesized edge ids, in edge order.
    pub edge_ids: Vec<String>,
}

/// Result of [`validate_ids`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdValidationReport {
    /// True iff `errors` is empty.
    pub ok: bool,
    /// Every problem found.
    pub errors: Vec<IdError>,
    /// Renames and edge ids, when any were produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<IdSuggestions>,
}

impl IdValidationReport {
    /// Errors carrying `code`.
    pub fn with_code(&self, code: IdErrorCode) -> impl Iterator<Item = &IdError> {
        self.errors.iter().filter(move |e| e.code == code)
    }

    /// Whether the document collides with ids on the canvas.
    #[must_use]
    pub fn needs_collision_avoidance(&self) -> bool {
        self.with_code(IdErrorCode::IdCollisionExisting).next().is_some()
    }

    /// Summary of the errors, phrased for the generator.
    #[must_use]
    pub fn feedback(&self) -> String {
        let mut out = String::from("The diagram ids have these problems:\n");
        for e in &self.errors {
            let _ = write!(out, "- [{}]", e.code);
            if let Some(line) = e.line {
                let _ = write!(out, " line {line}");
            }
            let _ = writeln!(out, ": {}", e.message);
        }
        if self.needs_collision_avoidance() {
            out.push_str("Collision avoidance is needed: these ids already exist on the canvas.\n");
            let renames = self.suggestions.as_ref().map(|s| &s.node_id_renames);
            for (from, to) in renames.into_iter().flatten() {
                let _ = writeln!(out, "- rename `{from}` to `{to}`");
            }
        } else {
            out.push_str("No collision avoidance is needed.\n");
        }
        out
    }
}

/// Hands out unique edge ids of the form `source_target`.
#[derive(Debug, Clone)]
pub struct EdgeIdAllocator<'a> {
    used: &'a HashSet<String>,
    issued: HashSet<String>,
    pairs: HashMap<(String, String), usize>,
}

impl<'a> EdgeIdAllocator<'a> {
    /// Create an allocator avoiding `used`.
    #[must_use]
    pub fn new(used: &'a HashSet<String>) -> Self {
        Self {
            used,
            issued: HashSet::new(),
            pairs: HashMap::new(),
        }
    }

    fn is_free(&self, id: &str) -> bool {
        !self.used.contains(id) && !self.issued.contains(id)
    }

    /// Next id for an edge from `from` to `to`.
    ///
    /// Parallel edges get `_2`, `_3`, … on the base id. Returns `None`
    /// when the candidate and all [`MAX_EDGE_ID_PROBES`] suffixed variants
    /// are taken.
    pub fn allocate(&mut self, from: &str, to: &str) -> Option<String> {
        let count = self
            .pairs
            .entry((from.to_string(), to.to_string()))
            .and_modify(|n| *n += 1)
            .or_insert(1);
        let base = format!("{from}_{to}");
        let candidate = if *count == 1 {
            base
        } else {
            format!("{base}_{count}")
        };

        let id = if self.is_free(&candidate) {
            Some(candidate)
        } else {
            (1..=MAX_EDGE_ID_PROBES)
                .map(|k| format!("{candidate}_{k}"))
                .find(|suffixed| self.is_free(suffixed))
        }?;
        self.issued.insert(id.clone());
        Some(id)
    }
}

/// Allocate ids for `edges` given as `(from, to)` pairs.
///
/// # Errors
///
/// Returns an [`IdErrorCode::UnresolvableId`] error for the first edge
/// with no free id.
pub fn allocate_edge_ids<'e, I>(edges: I, used: &HashSet<String>) -> Result<Vec<String>, IdError>
where
    I: IntoIterator<Item = (&'e str, &'e str)>,
{
    let mut allocator = EdgeIdAllocator::new(used);
    edges
        .into_iter()
        .map(|(from, to)| {
            allocator
                .allocate(from, to)
                .ok_or_else(|| unresolvable(from, to, None))
        })
        .collect()
}

fn unresolvable(from: &str, to: &str, line: Option<usize>) -> IdError {
    IdError::new(
        IdErrorCode::UnresolvableId,
        &format!("{from}_{to}"),
        line,
        format!("no free id for edge {from} -> {to} after {MAX_EDGE_ID_PROBES} attempts"),
    )
}

enum IdFormat {
    Pattern(Regex),
    Semantic,
}

impl IdFormat {
    fn compile(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => Self::Pattern(re),
            Err(e) => {
                tracing::warn!(pattern, "invalid id pattern, using default: {e}");
                Self::Semantic
            }
        }
    }

    fn matches(&self, id: &str) -> bool {
        match self {
            Self::Pattern(re) => re.is_match(id),
            Self::Semantic => is_semantic_id(id),
        }
    }
}

/// Validate every id in diagram text.
#[must_use]
pub fn validate_ids(text: &str, options: &IdValidationOptions) -> IdValidationReport {
    let doc = parse_document(text);
    let mut errors = Vec::new();
    let mut suggestions = IdSuggestions::default();

    check_nodes(&doc, options, &mut errors, &mut suggestions);
    check_edges(&doc, options, &mut errors);
    if options.synthesize_edge_ids {
        let mut allocator = EdgeIdAllocator::new(&options.used_edge_ids);
        for edge in &doc.edges {
            match allocator.allocate(&edge.from, &edge.to) {
                Some(id) => suggestions.edge_ids.push(id),
                None => errors.push(unresolvable(&edge.from, &edge.to, Some(edge.line))),
            }
        }
    }

    let has_suggestions =
        !suggestions.node_id_renames.is_empty() || !suggestions.edge_ids.is_empty();
    let report = IdValidationReport {
        ok: errors.is_empty(),
        errors,
        suggestions: has_suggestions.then_some(suggestions),
    };
    tracing::debug!(ok = report.ok, errors = report.errors.len(), "id validation complete");
    report
}

fn check_nodes(
    doc: &ParsedDocument,
    options: &IdValidationOptions,
    errors: &mut Vec<IdError>,
    suggestions: &mut IdSuggestions,
) {
    let format = IdFormat::compile(&options.id_pattern);
    let reserved: HashSet<String> = options
        .reserved_ids
        .iter()
        .map(|r| r.to_ascii_lowercase())
        .collect();
    let local: HashSet<&str> = doc.node_ids().collect();

    for node in &doc.nodes {
        let line = Some(node.line);
        if !format.matches(&node.id) {
            errors.push(IdError::new(
                IdErrorCode::InvalidIdFormat,
                &node.id,
                line,
                format!("id `{}` must match {}", node.id, options.id_pattern),
            ));
        }
        if reserved.contains(&node.id.to_ascii_lowercase()) {
            errors.push(IdError::new(
                IdErrorCode::ReservedId,
                &node.id,
                line,
                format!("id `{}` is a reserved keyword", node.id),
            ));
        }
        if options.check_existing && node.declared && options.used_node_ids.contains(&node.id) {
            let rename = suggest_rename(&node.id, options, &local, suggestions);
            errors.push(IdError::new(
                IdErrorCode::IdCollisionExisting,
                &node.id,
                line,
                format!(
                    "id `{}` already exists on the canvas; use `{rename}` for a new node or reference `{}` without redeclaring it",
                    node.id, node.id
                ),
            ));
            suggestions.node_id_renames.insert(node.id.clone(), rename);
        }
    }

    let mut seen = HashSet::new();
    for decl in &doc.declarations {
        if !seen.insert(decl.id.as_str()) {
            errors.push(IdError::new(
                IdErrorCode::IdDuplicateLocal,
                &decl.id,
                Some(decl.line),
                format!("id `{}` is declared more than once", decl.id),
            ));
        }
    }

    let mut checked_labels = HashSet::new();
    for decl in &doc.declarations {
        let Some(remembered) = options.label_to_id.get(&decl.label) else {
            continue;
        };
        if remembered == &decl.id || !checked_labels.insert((decl.label.as_str(), decl.id.as_str())) {
            continue;
        }
        let message = if options.used_node_ids.contains(remembered) {
            format!(
                "label \"{}\" belongs to existing node `{remembered}`; reference `{remembered}` instead of declaring `{}`",
                decl.label, decl.id
            )
        } else {
            format!(
                "label \"{}\" was previously `{remembered}`, which is no longer on the canvas; reuse `{remembered}` or change the label of `{}`",
                decl.label, decl.id
            )
        };
        errors.push(IdError::new(
            IdErrorCode::AmbiguousLabelMapping,
            &decl.id,
            Some(decl.line),
            message,
        ));
    }
}

fn suggest_rename(
    id: &str,
    options: &IdValidationOptions,
    local: &HashSet<&str>,
    suggestions: &IdSuggestions,
) -> String {
    let taken = |candidate: &str| {
        options.used_node_ids.contains(candidate)
            || local.contains(candidate)
            || suggestions.node_id_renames.values().any(|s| s == candidate)
    };
    (2usize..)
        .map(|n| format!("{id}_{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| format!("{id}_new"))
}

/// Endpoints resolve to any extracted node, synthesized ones included, or
/// to a node already on the canvas.
fn check_edges(doc: &ParsedDocument, options: &IdValidationOptions, errors: &mut Vec<IdError>) {
    let resolves = |id: &str| doc.node(id).is_some() || options.used_node_ids.contains(id);
    for edge in &doc.edges {
        if !resolves(&edge.from) {
            errors.push(IdError::new(
                IdErrorCode::MissingNodeForEdge,
                &edge.from,
                Some(edge.line),
                format!(
                    "edge {} -> {}: source `{}` is not a node in this diagram or on the canvas",
                    edge.from, edge.to, edge.from
                ),
            ));
        }
        if !resolves(&edge.to) {
            errors.push(IdError::new(
                IdErrorCode::MissingNodeForEdge,
                &edge.to,
                Some(edge.line),
                format!(
                    "edge {} -> {}: target `{}` is not a node in this diagram or on the canvas",
                    edge.from, edge.to, edge.to
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn used(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_clean_document() {
        let report = validate_ids(
            "flowchart TD\n  a[\"A\"]\n  b[\"B\"]\n  a --> b\n",
            &IdValidationOptions::default(),
        );
        assert!(report.ok, "{:?}", report.errors);
        assert!(report.suggestions.is_none());
    }

    #[test]
    fn test_collision_suggests_rename() {
        let options = IdValidationOptions {
            used_node_ids: used(&["a", "b"]),
            ..IdValidationOptions::default()
        };
        let report = validate_ids("flowchart TD\n  a[\"A\"]\n", &options);
        assert!(!report.ok);
        assert_eq!(report.with_code(IdErrorCode::IdCollisionExisting).count(), 1);
        let renames = report.suggestions.map(|s| s.node_id_renames).unwrap_or_default();
        assert_eq!(renames.get("a").map(String::as_str), Some("a_2"));
    }

    #[test]
    fn test_rename_skips_taken_candidates() {
        let options = IdValidationOptions {
            used_node_ids: used(&["a", "a_2", "b"]),
            ..IdValidationOptions::default()
        };
        let report = validate_ids("flowchart TD\n  a[\"A\"]\n  a_3[\"C\"]\n", &options);
        let renames = report.suggestions.map(|s| s.node_id_renames).unwrap_or_default();
        assert_eq!(renames.get("a").map(String::as_str), Some("a_4"));
    }

    #[test]
    fn test_replace_mode_skips_collisions() {
        let options = IdValidationOptions {
            used_node_ids: used(&["a"]),
            check_existing: false,
            ..IdValidationOptions::default()
        };
        assert!(validate_ids("flowchart TD\n  a[\"A\"]\n", &options).ok);
    }

    #[test]
    fn test_referencing_existing_node_is_fine() {
        let options = IdValidationOptions {
            used_node_ids: used(&["a"]),
            ..IdValidationOptions::default()
        };
        let report = validate_ids("flowchart TD\n  c[\"C\"]\n  a --> c\n", &options);
        assert!(report.ok, "{:?}", report.errors);
    }

    #[test]
    fn test_invalid_format_and_reserved() {
        let report = validate_ids(
            "flowchart TD\n  1a[\"One\"]\n  end_node[\"E\"]\n  x --> default\n",
            &IdValidationOptions::default(),
        );
        assert_eq!(report.with_code(IdErrorCode::InvalidIdFormat).count(), 1);
        assert_eq!(report.with_code(IdErrorCode::ReservedId).count(), 1);
    }

    #[test]
    fn test_duplicate_local() {
        let report = validate_ids(
            "flowchart TD\n  a[\"One\"]\n  a[\"Two\"]\n  a[\"Three\"]\n",
            &IdValidationOptions::default(),
        );
        let dups: Vec<_> = report.with_code(IdErrorCode::IdDuplicateLocal).collect();
        assert_eq!(dups.len(), 2);
        assert_eq!(dups[0].line, Some(3));
    }

    #[test]
    fn test_undeclared_endpoints_resolve_to_synthesized_nodes() {
        let report = validate_ids("flowchart TD\n  a --> b\n", &IdValidationOptions::default());
        assert!(report.ok, "{:?}", report.errors);

        let report = validate_ids(
            "flowchart TD\n  a[\"A\"]\n  a --> ghost\n  phantom --> a\n",
            &IdValidationOptions::default(),
        );
        assert_eq!(report.with_code(IdErrorCode::MissingNodeForEdge).count(), 0);
    }

    #[test]
    fn test_missing_endpoints() {
        let mut doc = parse_document("flowchart TD\n  a[\"A\"]\n  a --> ghost\n  phantom --> a\n");
        doc.nodes.retain(|n| n.declared);
        let options = IdValidationOptions {
            used_node_ids: used(&["live"]),
            ..IdValidationOptions::default()
        };

        let mut errors = Vec::new();
        check_edges(&doc, &options, &mut errors);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.code == IdErrorCode::MissingNodeForEdge));
        assert!(errors[0].message.contains("target `ghost`"));
        assert!(errors[1].message.contains("source `phantom`"));

        doc.edges[0].to = "live".into();
        let mut errors = Vec::new();
        check_edges(&doc, &options, &mut errors);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_ambiguous_label_mapping_messages() {
        let mut label_to_id = HashMap::new();
        label_to_id.insert("Pay".to_string(), "pay".to_string());
        label_to_id.insert("Ship".to_string(), "ship".to_string());
        let options = IdValidationOptions {
            used_node_ids: used(&["pay"]),
            label_to_id,
            ..IdValidationOptions::default()
        };
        let report = validate_ids(
            "flowchart TD\n  payment[\"Pay\"]\n  shipping[\"Ship\"]\n  pay --> payment\n",
            &options,
        );
        let ambiguous: Vec<_> = report.with_code(IdErrorCode::AmbiguousLabelMapping).collect();
        assert_eq!(ambiguous.len(), 2);
        assert!(ambiguous[0].message.contains("belongs to existing node `pay`"));
        assert!(ambiguous[1].message.contains("no longer on the canvas"));
    }

    #[test]
    fn test_edge_id_synthesis() {
        let options = IdValidationOptions {
            used_edge_ids: used(&["a_c"]),
            synthesize_edge_ids: true,
            ..IdValidationOptions::default()
        };
        let report = validate_ids(
            "flowchart TD\n  a[\"A\"]\n  b[\"B\"]\n  c[\"C\"]\n  a --> b\n  a --> b\n  a --> c\n",
            &options,
        );
        assert!(report.ok);
        let edge_ids = report.suggestions.map(|s| s.edge_ids).unwrap_or_default();
        assert_eq!(edge_ids, vec!["a_b", "a_b_2", "a_c_1"]);
    }

    #[test]
    fn test_edge_id_exhaustion() {
        let mut taken = used(&["x_y"]);
        taken.extend((1..=MAX_EDGE_ID_PROBES).map(|k| format!("x_y_{k}")));
        let err = allocate_edge_ids([("x", "y")], &taken).expect_err("exhausted");
        assert_eq!(err.code, IdErrorCode::UnresolvableId);

        let ids = allocate_edge_ids([("x", "z"), ("x", "z")], &taken).expect("free");
        assert_eq!(ids, vec!["x_z", "x_z_2"]);
    }

    #[test]
    fn test_feedback_mentions_collision_avoidance() {
        let options = IdValidationOptions {
            used_node_ids: used(&["a"]),
            ..IdValidationOptions::default()
        };
        let report = validate_ids("flowchart TD\n  a[\"A\"]\n", &options);
        let feedback = report.feedback();
        assert!(feedback.contains("Collision avoidance is needed"));
        assert!(feedback.contains("rename `a` to `a_2`"));

        let ok = validate_ids("flowchart TD\n  1x[\"X\"]\n", &IdValidationOptions::default());
        assert!(ok.feedback().contains("No collision avoidance"));
    }
}
