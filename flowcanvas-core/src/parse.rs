//! Structural mini-parser and strict syntax check for diagram text.
//!
//! The parser is lenient: it extracts nodes, edges and groups from whatever
//! it recognizes and skips the rest. [`check_syntax`] is the strict
//! counterpart used as the last gate before a diagram is accepted.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::render::{HEADER_KEYWORD, LINE_BREAK};
use crate::spec::{Direction, Shape};

/// Alternate header keyword accepted alongside [`HEADER_KEYWORD`].
pub const GRAPH_KEYWORD: &str = "graph";

/// Diagram kinds that are recognized but not supported.
pub const NON_FLOWCHART_KINDS: &[&str] = &[
    "sequenceDiagram",
    "classDiagram",
    "classDiagram-v2",
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
    "sankey-beta",
    "xychart-beta",
    "block-beta",
    "C4Context",
    "C4Container",
    "C4Component",
];

/// Statement keywords that are valid upstream but outside the safe subset.
const DIRECTIVE_KEYWORDS: &[&str] = &[
    "classDef", "class", "style", "linkStyle", "click", "callback", "accTitle", "accDescr",
];

static ARROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:--\s+(?P<text>[^-|>]+?)\s+-->|(?P<arrow>-\.+->|-{2,}>|={2,}>|-{3,}|-\.+-))")
        .expect("arrow pattern is valid")
});

static SUBGRAPH_LABELLED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_]+)\s*\[(.*)\]$").expect("subgraph pattern is valid")
});

/// A node found in diagram text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNode {
    /// Node id.
    pub id: String,
    /// Decoded label, if the node was declared with one.
    pub label: Option<String>,
    /// Shape (never [`Shape::Ellipse`]).
    pub shape: Shape,
    /// Innermost group enclosing the first declaration.
    pub group: Option<String>,
    /// False when the node only appears as an edge endpoint.
    pub declared: bool,
    /// 1-based line of the first occurrence.
    pub line: usize,
}

/// An edge found in diagram text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEdge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Edge label.
    pub label: Option<String>,
    /// Dashed arrow style.
    pub dashed: bool,
    /// 1-based line.
    pub line: usize,
}

/// A group (named block) found in diagram text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedGroup {
    /// Group id.
    pub id: String,
    /// Group label.
    pub label: String,
    /// 1-based line of the opening keyword.
    pub line: usize,
}

/// One explicit node declaration (identifier followed by a bracket pair).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDeclaration {
    /// Declared id.
    pub id: String,
    /// Decoded label.
    pub label: String,
    /// Declared shape.
    pub shape: Shape,
    /// 1-based line.
    pub line: usize,
}

/// Structure extracted from diagram text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    /// Direction from the header, if present and valid.
    pub direction: Option<Direction>,
    /// Unique nodes in first-appearance order, including synthesized endpoints.
    pub nodes: Vec<ParsedNode>,
    /// Edges in order, multi-target shorthand expanded.
    pub edges: Vec<ParsedEdge>,
    /// Groups in declaration order.
    pub groups: Vec<ParsedGroup>,
    /// Every explicit declaration, duplicates included.
    pub declarations: Vec<NodeDeclaration>,
}

impl ParsedDocument {
    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&ParsedNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of every node, in order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }
}

/// Classification of a single trimmed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineKind<'a> {
    Blank,
    Comment,
    Fence,
    Header(Header<'a>),
    SubgraphOpen(&'a str),
    End,
    Direction(&'a str),
    Directive(&'a str),
    Statement(&'a str),
}

/// A header-like first line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header<'a> {
    pub keyword: &'a str,
    pub direction: Option<&'a str>,
}

impl Header<'_> {
    pub(crate) fn is_flowchart(&self) -> bool {
        self.keyword == HEADER_KEYWORD || self.keyword == GRAPH_KEYWORD
    }

    pub(crate) fn is_known_kind(&self) -> bool {
        NON_FLOWCHART_KINDS.contains(&self.keyword)
    }
}

pub(crate) fn first_word(line: &str) -> &str {
    line.split(|c: char| c.is_whitespace() || c == ';')
        .next()
        .unwrap_or_default()
}

pub(crate) fn classify_line(line: &str) -> LineKind<'_> {
    let line = line.trim();
    if line.is_empty() {
        return LineKind::Blank;
    }
    if line.starts_with("%%") {
        return LineKind::Comment;
    }
    if line.starts_with("```") {
        return LineKind::Fence;
    }
    let word = first_word(line);
    let rest = line[word.len()..].trim().trim_end_matches(';').trim();
    match word {
        "end" if rest.is_empty() => LineKind::End,
        "subgraph" => LineKind::SubgraphOpen(rest),
        "direction" => LineKind::Direction(rest),
        w if w == HEADER_KEYWORD || w == GRAPH_KEYWORD || NON_FLOWCHART_KINDS.contains(&w) => {
            let direction = first_word(rest);
            LineKind::Header(Header {
                keyword: w,
                direction: (!direction.is_empty()).then_some(direction),
            })
        }
        w if DIRECTIVE_KEYWORDS.contains(&w) => LineKind::Directive(w),
        _ => LineKind::Statement(line.trim_end_matches(';')),
    }
}

/// Lines of a document after fence handling.
#[derive(Debug, Default)]
pub(crate) struct Body<'a> {
    /// 1-based line number and raw text of every body line.
    pub lines: Vec<(usize, &'a str)>,
    /// Fence lines that do not form a single wrapping block.
    pub stray_fences: Vec<usize>,
    /// Non-blank lines outside a wrapping block.
    pub outside: Vec<usize>,
}

/// Split off a single well-formed fenced block, if the document has one.
pub(crate) fn split_fences(text: &str) -> Body<'_> {
    let numbered: Vec<(usize, &str)> = text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
    let fences: Vec<usize> = numbered
        .iter()
        .filter(|(_, l)| l.trim_start().starts_with("```"))
        .map(|(n, _)| *n)
        .collect();

    if fences.is_empty() {
        return Body {
            lines: numbered,
            ..Body::default()
        };
    }
    if let [open, close] = fences[..] {
        let outside = numbered
            .iter()
            .filter(|(n, l)| (*n < open || *n > close) && !l.trim().is_empty())
            .map(|(n, _)| *n)
            .collect();
        return Body {
            lines: numbered
                .into_iter()
                .filter(|(n, _)| *n > open && *n < close)
                .collect(),
            stray_fences: Vec::new(),
            outside,
        };
    }
    Body {
        lines: numbered
            .into_iter()
            .filter(|(n, _)| !fences.contains(n))
            .collect(),
        stray_fences: fences,
        outside: Vec::new(),
    }
}

/// A node reference inside a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeRef {
    pub id: String,
    pub shape: Option<ShapeSpan>,
    /// 1-based column of the identifier.
    pub column: usize,
}

/// A parsed bracket pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ShapeSpan {
    pub shape: Shape,
    /// Raw label between the brackets, quotes removed.
    pub label: String,
    pub quoted: bool,
}

/// Arrow style between two node groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ArrowKind {
    Solid,
    Dashed,
    /// Recognized upstream but outside the two accepted styles.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Link {
    pub arrow: ArrowKind,
    pub label: Option<String>,
    /// 1-based column of the arrow.
    pub column: usize,
}

/// A statement line: node groups joined by links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Statement {
    pub groups: Vec<Vec<NodeRef>>,
    pub links: Vec<Link>,
    /// Byte offsets of every `&` separator.
    pub ampersands: Vec<usize>,
}

/// Why a statement could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StatementErrorKind {
    /// Opening bracket is not one of the six accepted pairs.
    BadShape(String),
    /// Bracket pair never closed.
    UnclosedShape(String),
    /// Expected a node identifier.
    ExpectedNode,
    /// Unexpected trailing content.
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatementError {
    pub column: usize,
    pub kind: StatementErrorKind,
}

/// Opening tokens that look like shapes but are not in the accepted set.
const FORBIDDEN_OPENERS: &[&str] = &["(((", "[[", "[(", "[/", "[\\", ">"];

/// Accepted openers, longest first.
const OPENERS: &[(&str, Shape)] = &[
    ("((", Shape::Circle),
    ("([", Shape::Stadium),
    ("{{", Shape::Hexagon),
    ("[", Shape::Rectangle),
    ("(", Shape::Rounded),
    ("{", Shape::Decision),
];

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn column(&self) -> usize {
        self.src[..self.pos].chars().count() + 1
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn identifier(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }
}

pub(crate) fn parse_statement(line: &str) -> Result<Statement, StatementError> {
    let mut cur = Cursor { src: line, pos: 0 };
    let mut statement = Statement::default();
    let mut group = Vec::new();

    loop {
        cur.skip_ws();
        let column = cur.column();
        let id = cur.identifier().ok_or(StatementError {
            column,
            kind: StatementErrorKind::ExpectedNode,
        })?;
        let shape = parse_shape(&mut cur)?;
        group.push(NodeRef {
            id: id.to_string(),
            shape,
            column,
        });

        cur.skip_ws();
        if cur.at_end() {
            break;
        }
        if cur.rest().starts_with('&') {
            statement.ampersands.push(cur.pos);
            cur.pos += 1;
            continue;
        }
        let link_column = cur.column();
        let Some(link) = parse_link(&mut cur, link_column) else {
            return Err(StatementError {
                column: link_column,
                kind: StatementErrorKind::Unexpected(cur.rest().to_string()),
            });
        };
        statement.links.push(link);
        statement.groups.push(std::mem::take(&mut group));
    }
    statement.groups.push(group);
    Ok(statement)
}

fn parse_shape(cur: &mut Cursor<'_>) -> Result<Option<ShapeSpan>, StatementError> {
    let column = cur.column();
    let rest = cur.rest();
    if let Some(bad) = FORBIDDEN_OPENERS.iter().find(|o| rest.starts_with(**o)) {
        return Err(StatementError {
            column,
            kind: StatementErrorKind::BadShape((*bad).to_string()),
        });
    }
    let Some((open, shape)) = OPENERS.iter().find(|(o, _)| rest.starts_with(*o)) else {
        return Ok(None);
    };
    cur.pos += open.len();
    let (_, close) = shape.brackets();
    let unclosed = || StatementError {
        column,
        kind: StatementErrorKind::UnclosedShape((*open).to_string()),
    };

    let body = cur.rest();
    if let Some(quoted) = body.strip_prefix('"') {
        let end = quoted.find('"').ok_or_else(unclosed)?;
        let after = &quoted[end + 1..];
        if !after.starts_with(close) {
            return Err(unclosed());
        }
        cur.pos += 1 + end + 1 + close.len();
        return Ok(Some(ShapeSpan {
            shape: *shape,
            label: quoted[..end].to_string(),
            quoted: true,
        }));
    }
    let end = body.find(close).ok_or_else(unclosed)?;
    cur.pos += end + close.len();
    Ok(Some(ShapeSpan {
        shape: *shape,
        label: body[..end].to_string(),
        quoted: false,
    }))
}

fn parse_link(cur: &mut Cursor<'_>, column: usize) -> Option<Link> {
    let caps = ARROW_RE.captures(cur.rest())?;
    let whole = caps.get(0)?.as_str();
    let (arrow, mut label) = if let Some(text) = caps.name("text") {
        (
            ArrowKind::Other(whole.to_string()),
            Some(text.as_str().trim().to_string()),
        )
    } else {
        let token = caps.name("arrow")?.as_str();
        let kind = match token {
            "-->" => ArrowKind::Solid,
            "-.->" => ArrowKind::Dashed,
            other => ArrowKind::Other(other.to_string()),
        };
        (kind, None)
    };
    cur.pos += whole.len();

    let before_label = cur.pos;
    cur.skip_ws();
    if cur.eat("|") {
        let rest = cur.rest();
        let end = rest.find('|')?;
        label = Some(rest[..end].trim().to_string());
        cur.pos += end + 1;
    } else {
        cur.pos = before_label;
    }
    Some(Link {
        arrow,
        label,
        column,
    })
}

/// Decode entities produced by the renderer.
#[must_use]
pub fn decode_label(raw: &str) -> String {
    raw.replace("#quot;", "\"")
        .replace(LINE_BREAK, "\n")
        .replace("<br>", "\n")
        .trim()
        .to_string()
}

fn parse_group_title(rest: &str) -> (String, String) {
    if let Some(caps) = SUBGRAPH_LABELLED_RE.captures(rest) {
        let id = caps[1].to_string();
        let label = decode_label(caps[2].trim().trim_matches('"'));
        return (id, label);
    }
    let title = decode_label(rest.trim_matches('"'));
    (title.clone(), title)
}

/// Extract nodes, edges and groups from diagram text.
///
/// Nodes referenced only as edge endpoints are synthesized as rectangles
/// with `declared = false`.
#[must_use]
pub fn parse_document(text: &str) -> ParsedDocument {
    let body = split_fences(text);
    let mut doc = ParsedDocument::default();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut stack: Vec<String> = Vec::new();
    let mut seen_header = false;

    for (line_no, raw) in &body.lines {
        let line_no = *line_no;
        match classify_line(raw) {
            LineKind::Blank | LineKind::Comment | LineKind::Fence | LineKind::Directive(_) => {}
            LineKind::Header(header) if !seen_header => {
                seen_header = true;
                doc.direction = header.direction.and_then(|d| d.parse().ok());
            }
            LineKind::Header(_) | LineKind::Direction(_) => {}
            LineKind::SubgraphOpen(rest) => {
                let (id, label) = parse_group_title(rest);
                stack.push(id.clone());
                doc.groups.push(ParsedGroup {
                    id,
                    label,
                    line: line_no,
                });
            }
            LineKind::End => {
                stack.pop();
            }
            LineKind::Statement(stmt) => {
                seen_header = true;
                let Ok(statement) = parse_statement(stmt) else {
                    tracing::debug!(line = line_no, "skipping unparsable statement");
                    continue;
                };
                let group = stack.last().cloned();
                for node in statement.groups.iter().flatten() {
                    record_node(&mut doc, &mut index, node, group.as_ref(), line_no);
                }
                for (i, link) in statement.links.iter().enumerate() {
                    let dashed = link.arrow == ArrowKind::Dashed;
                    for from in &statement.groups[i] {
                        for to in &statement.groups[i + 1] {
                            doc.edges.push(ParsedEdge {
                                from: from.id.clone(),
                                to: to.id.clone(),
                                label: link.label.as_deref().map(decode_label),
                                dashed,
                                line: line_no,
                            });
                        }
                    }
                }
            }
        }
    }
    doc
}

fn record_node(
    doc: &mut ParsedDocument,
    index: &mut HashMap<String, usize>,
    node: &NodeRef,
    group: Option<&String>,
    line: usize,
) {
    if let Some(span) = &node.shape {
        doc.declarations.push(NodeDeclaration {
            id: node.id.clone(),
            label: decode_label(&span.label),
            shape: span.shape,
            line,
        });
    }
    match index.get(&node.id) {
        Some(&i) => {
            let existing = &mut doc.nodes[i];
            if let (false, Some(span)) = (existing.declared, &node.shape) {
                existing.declared = true;
                existing.label = Some(decode_label(&span.label));
                existing.shape = span.shape;
                existing.group = group.cloned();
            }
        }
        None => {
            index.insert(node.id.clone(), doc.nodes.len());
            doc.nodes.push(ParsedNode {
                id: node.id.clone(),
                label: node.shape.as_ref().map(|s| decode_label(&s.label)),
                shape: node.shape.as_ref().map_or(Shape::Rectangle, |s| s.shape),
                group: node.shape.as_ref().and(group.cloned()),
                declared: node.shape.is_some(),
                line,
            });
        }
    }
}

/// A strict syntax failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    /// 1-based line number.
    pub line: usize,
    /// Description of the problem.
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Final full-syntax gate run before a diagram is accepted.
pub trait SyntaxChecker: Send + Sync {
    /// Check `text`, returning the first syntax error found.
    ///
    /// # Errors
    ///
    /// Returns a [`SyntaxError`] describing the first offending line.
    fn check(&self, text: &str) -> Result<(), SyntaxError>;
}

/// [`SyntaxChecker`] backed by [`check_syntax`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictSyntax;

impl SyntaxChecker for StrictSyntax {
    fn check(&self, text: &str) -> Result<(), SyntaxError> {
        check_syntax(text)
    }
}

/// Strictly check that every line belongs to the accepted grammar.
///
/// # Errors
///
/// Returns the first [`SyntaxError`] found.
pub fn check_syntax(text: &str) -> Result<(), SyntaxError> {
    let body = split_fences(text);
    if let Some(line) = body.stray_fences.first().or(body.outside.first()) {
        return Err(SyntaxError::new(*line, "content outside a single fenced block"));
    }

    let mut header_seen = false;
    let mut depth = 0usize;
    let mut last_line = 0;
    for (line_no, raw) in &body.lines {
        let line_no = *line_no;
        last_line = line_no;
        let kind = classify_line(raw);
        if kind == LineKind::Blank {
            continue;
        }
        if !header_seen {
            match kind {
                LineKind::Header(h) if h.is_flowchart() => {
                    let valid = h.direction.is_some_and(|d| d.parse::<Direction>().is_ok());
                    if !valid {
                        return Err(SyntaxError::new(line_no, "header needs a direction of TD, LR, BT or RL"));
                    }
                    header_seen = true;
                    continue;
                }
                _ => return Err(SyntaxError::new(line_no, "expected `flowchart <direction>` header")),
            }
        }
        match kind {
            LineKind::Blank | LineKind::Comment => {}
            LineKind::Fence => return Err(SyntaxError::new(line_no, "unexpected fence")),
            LineKind::Header(_) => return Err(SyntaxError::new(line_no, "duplicate header")),
            LineKind::Directive(word) => {
                return Err(SyntaxError::new(line_no, format!("`{word}` is not supported")));
            }
            LineKind::SubgraphOpen(rest) => {
                if rest.is_empty() {
                    return Err(SyntaxError::new(line_no, "subgraph needs a name"));
                }
                depth += 1;
            }
            LineKind::End => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SyntaxError::new(line_no, "`end` without open subgraph"))?;
            }
            LineKind::Direction(token) => {
                if depth == 0 || token.parse::<Direction>().is_err() {
                    return Err(SyntaxError::new(line_no, format!("invalid direction `{token}`")));
                }
            }
            LineKind::Statement(stmt) => check_statement(line_no, stmt)?,
        }
    }

    if !header_seen {
        return Err(SyntaxError::new(last_line.max(1), "missing header"));
    }
    if depth > 0 {
        return Err(SyntaxError::new(last_line, "unclosed subgraph"));
    }
    Ok(())
}

fn check_statement(line: usize, stmt: &str) -> Result<(), SyntaxError> {
    let statement = parse_statement(stmt).map_err(|e| {
        let detail = match e.kind {
            StatementErrorKind::BadShape(open) => format!("unsupported shape bracket `{open}`"),
            StatementErrorKind::UnclosedShape(open) => format!("unclosed shape `{open}`"),
            StatementErrorKind::ExpectedNode => "expected node identifier".to_string(),
            StatementErrorKind::Unexpected(rest) => format!("unexpected `{rest}`"),
        };
        SyntaxError::new(line, format!("column {}: {detail}", e.column))
    })?;
    if let Some(link) = statement
        .links
        .iter()
        .find(|l| matches!(l.arrow, ArrowKind::Other(_)))
    {
        return Err(SyntaxError::new(
            line,
            format!("column {}: only `-->` and `-.->` arrows are supported", link.column),
        ));
    }
    if let Some(span) = statement
        .groups
        .iter()
        .flatten()
        .filter_map(|n| n.shape.as_ref())
        .find(|s| !s.quoted && s.label.contains('|'))
    {
        return Err(SyntaxError::new(
            line,
            format!("unquoted label `{}` contains `|`", span.label),
        ));
    }
    Ok(())
}
