//! Rule linter enforcing the safe flowchart subset.
//!
//! Every check runs independently and accumulates violations; nothing
//! short-circuits. A report is `ok` when no violation has
//! [`Severity::Error`]. Warnings are informational and never block
//! acceptance.

use std::fmt::{self, Write as _};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parse::{
    classify_line, parse_document, parse_statement, split_fences, Body, LineKind,
    StatementErrorKind,
};
use crate::render::header_line;
use crate::spec::Direction;

/// Longest label that passes without a warning.
pub const MAX_LINT_LABEL_LEN: usize = 60;

/// Default forbidden feature keywords.
pub const DEFAULT_FORBIDDEN: &[&str] = &[
    // Non-flowchart diagram kinds
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram",
    "stateDiagram-v2",
    "erDiagram",
    "gantt",
    "pie",
    "journey",
    "gitGraph",
    "mindmap",
    "timeline",
    "quadrantChart",
    "requirementDiagram",
    "C4Context",
    // Styling
    "classDef",
    "class",
    "style",
    "linkStyle",
    ":::",
    // Interactivity
    "click",
    "callback",
    "href",
    // Accessibility
    "accTitle",
    "accDescr",
];

/// Keywords that additionally raise [`LintCode::ErOrGantt`].
const ER_OR_GANTT: &[&str] = &["erDiagram", "gantt"];

/// Violation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LintCode {
    /// No header line.
    MissingHeader,
    /// Header names an unsupported diagram kind.
    NonFlowchart,
    /// Direction token missing or invalid.
    BadDirection,
    /// A denylisted keyword was found.
    ForbiddenFeature,
    /// An entity-relationship or gantt keyword was found.
    ErOrGantt,
    /// A node uses an unsupported or unclosed bracket pair.
    BadShape,
    /// An unquoted label contains the pipe delimiter.
    UnescapedPipe,
    /// A label contains backticks or is too long.
    BadLabel,
    /// Unbalanced or nameless group block.
    SubgraphBlock,
    /// Multi-target shorthand with irregular spacing.
    InlineLinkSyntax,
    /// Node or edge count over the configured limit.
    SizeCap,
    /// Fences or prose outside a single wrapping block.
    ExtraText,
}

impl LintCode {
    /// Wire name of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingHeader => "MISSING_HEADER",
            Self::NonFlowchart => "NON_FLOWCHART",
            Self::BadDirection => "BAD_DIRECTION",
            Self::ForbiddenFeature => "FORBIDDEN_FEATURE",
            Self::ErOrGantt => "ER_OR_GANTT",
            Self::BadShape => "BAD_SHAPE",
            Self::UnescapedPipe => "UNESCAPED_PIPE",
            Self::BadLabel => "BAD_LABEL",
            Self::SubgraphBlock => "SUBGRAPH_BLOCK",
            Self::InlineLinkSyntax => "INLINE_LINK_SYNTAX",
            Self::SizeCap => "SIZE_CAP",
            Self::ExtraText => "EXTRA_TEXT",
        }
    }
}

impl fmt::Display for LintCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Violation severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks acceptance.
    Error,
    /// Reported alongside an accepted result.
    Warn,
}

/// Position of a violation in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// 1-based line.
    pub line: usize,
    /// 1-based column, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

/// A structured report of a rule breach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintViolation {
    /// Violation code.
    pub code: LintCode,
    /// Human-readable description.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// Where the violation was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// How to fix it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl LintViolation {
    fn error(code: LintCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
            location: None,
            hint: None,
        }
    }

    fn warn(code: LintCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warn,
            ..Self::error(code, message)
        }
    }

    fn at(mut self, line: usize, column: Option<usize>) -> Self {
        self.location = Some(Location { line, column });
        self
    }

    fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Whether this violation blocks acceptance.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Node and edge count limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LintLimits {
    /// Maximum distinct nodes.
    pub max_nodes: usize,
    /// Maximum edges.
    pub max_edges: usize,
}

/// Linter configuration.
#[derive(Debug, Clone)]
pub struct LintOptions {
    /// Forbidden feature keywords.
    pub forbidden: Vec<String>,
    /// Optional size caps.
    pub limits: Option<LintLimits>,
    /// Direction suggested in header hints.
    pub default_direction: Direction,
}

impl Default for LintOptions {
    fn default() -> Self {
        Self {
            forbidden: DEFAULT_FORBIDDEN.iter().map(ToString::to_string).collect(),
            limits: None,
            default_direction: Direction::TD,
        }
    }
}

/// Result of a lint pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintReport {
    /// True iff no violation has error severity.
    pub ok: bool,
    /// All violations, in check order.
    pub violations: Vec<LintViolation>,
}

impl LintReport {
    fn from_violations(violations: Vec<LintViolation>) -> Self {
        Self {
            ok: !violations.iter().any(LintViolation::is_error),
            violations,
        }
    }

    /// Whether any violation carries `code`.
    #[must_use]
    pub fn has(&self, code: LintCode) -> bool {
        self.violations.iter().any(|v| v.code == code)
    }

    /// Error-severity violations.
    pub fn errors(&self) -> impl Iterator<Item = &LintViolation> {
        self.violations.iter().filter(|v| v.is_error())
    }

    /// Warn-severity violations.
    pub fn warnings(&self) -> impl Iterator<Item = &LintViolation> {
        self.violations.iter().filter(|v| !v.is_error())
    }

    /// Summary of the violations, phrased for the generator.
    #[must_use]
    pub fn feedback(&self) -> String {
        let mut out = String::from("The diagram text broke these rules:\n");
        for v in &self.violations {
            let _ = write!(out, "- [{}]", v.code);
            if let Some(loc) = v.location {
                let _ = write!(out, " line {}", loc.line);
            }
            let _ = write!(out, ": {}", v.message);
            if let Some(hint) = &v.hint {
                let _ = write!(out, " (fix: {hint})");
            }
            out.push('\n');
        }
        out
    }
}

struct ForbiddenPattern {
    keyword: String,
    regex: Regex,
}

fn compile_forbidden(keywords: &[String]) -> Vec<ForbiddenPattern> {
    keywords
        .iter()
        .filter(|k| !k.is_empty())
        .filter_map(|keyword| {
            // Word keywords match on word boundaries anywhere in a line, so
            // `class` hits `a --> b; class a x` and labels but not `classDef`.
            let boundary = |c: Option<char>| {
                if c.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                    r"\b"
                } else {
                    ""
                }
            };
            let pattern = format!(
                "{}{}{}",
                boundary(keyword.chars().next()),
                regex::escape(keyword),
                boundary(keyword.chars().last()),
            );
            match Regex::new(&pattern) {
                Ok(regex) => Some(ForbiddenPattern {
                    keyword: keyword.clone(),
                    regex,
                }),
                Err(e) => {
                    tracing::warn!(keyword = %keyword, "ignoring forbidden keyword: {e}");
                    None
                }
            }
        })
        .collect()
}

/// Lint diagram text.
#[must_use]
pub fn lint(text: &str, options: &LintOptions) -> LintReport {
    let body = split_fences(text);
    let mut violations = Vec::new();

    check_header(&body, options, &mut violations);
    check_forbidden(text, options, &mut violations);
    check_statements(&body, &mut violations);
    check_groups(&body, &mut violations);
    if let Some(limits) = options.limits {
        check_size(text, limits, &mut violations);
    }
    check_extra_text(&body, &mut violations);

    let report = LintReport::from_violations(violations);
    tracing::debug!(
        ok = report.ok,
        violations = report.violations.len(),
        "lint pass complete"
    );
    report
}

fn check_header(body: &Body<'_>, options: &LintOptions, out: &mut Vec<LintViolation>) {
    let expected = header_line(options.default_direction);
    let Some((line_no, raw)) = body.lines.iter().find(|(_, l)| !l.trim().is_empty()) else {
        out.push(
            LintViolation::error(LintCode::MissingHeader, "diagram text is empty")
                .hint(format!("start with `{expected}`")),
        );
        return;
    };
    match classify_line(raw) {
        LineKind::Header(header) if header.is_flowchart() => match header.direction {
            None => out.push(
                LintViolation::error(LintCode::BadDirection, "header has no direction")
                    .at(*line_no, None)
                    .hint(format!("use `{expected}`")),
            ),
            Some(token) if token.parse::<Direction>().is_err() => out.push(
                LintViolation::error(
                    LintCode::BadDirection,
                    format!("unsupported direction `{token}`"),
                )
                .at(*line_no, None)
                .hint("use one of TD, LR, BT, RL"),
            ),
            Some(_) => {}
        },
        LineKind::Header(header) if header.is_known_kind() => out.push(
            LintViolation::error(
                LintCode::NonFlowchart,
                format!("`{}` diagrams are not supported", header.keyword),
            )
            .at(*line_no, None)
            .hint(format!("rewrite as a flowchart starting with `{expected}`")),
        ),
        _ => out.push(
            LintViolation::error(LintCode::MissingHeader, "first line is not a diagram header")
                .at(*line_no, None)
                .hint(format!("start with `{expected}`")),
        ),
    }
}

/// Scans every line of the raw text, fences and prose included.
fn check_forbidden(text: &str, options: &LintOptions, out: &mut Vec<LintViolation>) {
    let patterns = compile_forbidden(&options.forbidden);
    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        for pattern in &patterns {
            let Some(hit) = pattern.regex.find(raw) else {
                continue;
            };
            let column = raw[..hit.start()].chars().count() + 1;
            out.push(
                LintViolation::error(
                    LintCode::ForbiddenFeature,
                    format!("`{}` is not allowed", pattern.keyword),
                )
                .at(line_no, Some(column))
                .hint("remove it; only plain nodes, edges and subgraphs are supported"),
            );
            if ER_OR_GANTT.contains(&pattern.keyword.as_str()) {
                out.push(
                    LintViolation::error(
                        LintCode::ErOrGantt,
                        format!("`{}` diagrams cannot be drawn here", pattern.keyword),
                    )
                    .at(line_no, Some(column))
                    .hint("model the entities or tasks as flowchart nodes"),
                );
            }
        }
    }
}

fn check_statements(body: &Body<'_>, out: &mut Vec<LintViolation>) {
    for (line_no, raw) in &body.lines {
        let LineKind::Statement(stmt) = classify_line(raw) else {
            continue;
        };
        // Columns are relative to the trimmed statement.
        let offset = raw.len() - raw.trim_start().len();
        let col = |c: usize| Some(c + raw[..offset].chars().count());

        let statement = match parse_statement(stmt) {
            Ok(statement) => statement,
            Err(e) => {
                match e.kind {
                    StatementErrorKind::BadShape(open) | StatementErrorKind::UnclosedShape(open) => {
                        out.push(
                            LintViolation::error(
                                LintCode::BadShape,
                                format!("unsupported or unclosed shape bracket `{open}`"),
                            )
                            .at(*line_no, col(e.column))
                            .hint("use [\"…\"], (\"…\"), ([\"…\"]), {\"…\"}, ((\"…\")) or {{\"…\"}}"),
                        );
                    }
                    StatementErrorKind::ExpectedNode if stmt.contains('&') => {
                        out.push(
                            LintViolation::error(
                                LintCode::InlineLinkSyntax,
                                "`&` must join two node ids",
                            )
                            .at(*line_no, col(e.column))
                            .hint("write `a & b --> c`"),
                        );
                    }
                    StatementErrorKind::ExpectedNode => {
                        out.push(
                            LintViolation::error(
                                LintCode::ExtraText,
                                format!("`{stmt}` is not a node or edge statement"),
                            )
                            .at(*line_no, col(e.column))
                            .hint("return only the diagram text"),
                        );
                    }
                    StatementErrorKind::Unexpected(rest) => {
                        out.push(
                            LintViolation::error(
                                LintCode::ExtraText,
                                format!("unexpected `{rest}` after a node"),
                            )
                            .at(*line_no, col(e.column))
                            .hint("write one statement per line using `-->` or `-.->`"),
                        );
                    }
                }
                continue;
            }
        };

        for node in statement.groups.iter().flatten() {
            let Some(span) = &node.shape else { continue };
            if !span.quoted && span.label.contains('|') {
                out.push(
                    LintViolation::error(
                        LintCode::UnescapedPipe,
                        format!("label of `{}` contains `|`", node.id),
                    )
                    .at(*line_no, col(node.column))
                    .hint("wrap the label in double quotes"),
                );
            }
            if span.label.contains('`') {
                out.push(
                    LintViolation::warn(
                        LintCode::BadLabel,
                        format!("label of `{}` contains backticks", node.id),
                    )
                    .at(*line_no, col(node.column)),
                );
            }
            let len = crate::parse::decode_label(&span.label).chars().count();
            if len > MAX_LINT_LABEL_LEN {
                out.push(
                    LintViolation::warn(
                        LintCode::BadLabel,
                        format!("label of `{}` is {len} characters", node.id),
                    )
                    .at(*line_no, col(node.column))
                    .hint(format!("keep labels under {MAX_LINT_LABEL_LEN} characters")),
                );
            }
        }

        if statement.links.is_empty() {
            continue;
        }
        for &at in &statement.ampersands {
            let before = &stmt[..at];
            let after = &stmt[at + 1..];
            let spaced_before = before
                .strip_suffix(' ')
                .is_some_and(|b| !b.ends_with(char::is_whitespace));
            let spaced_after = after
                .strip_prefix(' ')
                .is_some_and(|a| !a.starts_with(char::is_whitespace));
            if !spaced_before || !spaced_after {
                out.push(
                    LintViolation::error(
                        LintCode::InlineLinkSyntax,
                        "multi-target `&` must be written as ` & `",
                    )
                    .at(*line_no, col(stmt[..at].chars().count() + 1))
                    .hint("write `a & b --> c`"),
                );
            }
        }
    }
}

fn check_groups(body: &Body<'_>, out: &mut Vec<LintViolation>) {
    let mut open: Vec<usize> = Vec::new();
    for (line_no, raw) in &body.lines {
        match classify_line(raw) {
            LineKind::SubgraphOpen(name) => {
                if name.is_empty() {
                    out.push(
                        LintViolation::error(LintCode::SubgraphBlock, "subgraph has no name")
                            .at(*line_no, None)
                            .hint("write `subgraph id[\"Label\"]`"),
                    );
                }
                open.push(*line_no);
            }
            LineKind::End => {
                if open.pop().is_none() {
                    out.push(
                        LintViolation::error(LintCode::SubgraphBlock, "`end` without a subgraph")
                            .at(*line_no, None)
                            .hint("remove the stray `end`"),
                    );
                }
            }
            LineKind::Direction(token) if token.parse::<Direction>().is_err() => {
                out.push(
                    LintViolation::error(
                        LintCode::BadDirection,
                        format!("unsupported group direction `{token}`"),
                    )
                    .at(*line_no, None)
                    .hint("use one of TD, LR, BT, RL"),
                );
            }
            _ => {}
        }
    }
    for line_no in open {
        out.push(
            LintViolation::error(LintCode::SubgraphBlock, "subgraph is never closed")
                .at(line_no, None)
                .hint("add a matching `end`"),
        );
    }
}

fn check_size(text: &str, limits: LintLimits, out: &mut Vec<LintViolation>) {
    let doc = parse_document(text);
    if doc.nodes.len() > limits.max_nodes {
        out.push(LintViolation::warn(
            LintCode::SizeCap,
            format!("{} nodes exceeds the limit of {}", doc.nodes.len(), limits.max_nodes),
        ));
    }
    if doc.edges.len() > limits.max_edges {
        out.push(LintViolation::warn(
            LintCode::SizeCap,
            format!("{} edges exceeds the limit of {}", doc.edges.len(), limits.max_edges),
        ));
    }
}

fn check_extra_text(body: &Body<'_>, out: &mut Vec<LintViolation>) {
    for line_no in &body.stray_fences {
        out.push(
            LintViolation::error(LintCode::ExtraText, "stray code fence")
                .at(*line_no, None)
                .hint("return only the diagram text"),
        );
    }
    if let Some(first) = body.outside.first() {
        out.push(
            LintViolation::error(
                LintCode::ExtraText,
                format!("{} line(s) of text outside the diagram block", body.outside.len()),
            )
            .at(*first, None)
            .hint("return only the diagram text"),
        );
    }
}
