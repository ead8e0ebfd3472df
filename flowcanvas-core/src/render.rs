//! Deterministic [`DiagramSpec`] to diagram text renderer.
//!
//! ```text
//! flowchart TD
//!     start(("Begin"))
//!     subgraph checkout["Checkout"]
//!         pay["Pay"]
//!     end
//!     start --> pay
//!     pay -.->|retry| start
//! ```

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::spec::{DiagramSpec, Direction, Shape};

/// Diagram kind keyword emitted in the header line.
pub const HEADER_KEYWORD: &str = "flowchart";

const INDENT: &str = "    ";

/// Render a spec to diagram text.
///
/// The diagram spec does not need to be validated first; dangling group references
/// place the node at top level and empty groups are still emitted.
#[must_use]
pub fn render_spec(spec: &DiagramSpec) -> String {
    let group_ids: HashSet<&str> = spec.groups.iter().map(|g| g.id.as_str()).collect();
    let resolves = |group: Option<&String>| group.is_some_and(|g| group_ids.contains(g.as_str()));

    let mut out = header_line(spec.direction);
    out.push('\n');

    for node in spec.nodes.iter().filter(|n| !resolves(n.group_id.as_ref())) {
        push_line(&mut out, 1, &node_line(&node.id, &node.label, node.shape));
    }

    for group in &spec.groups {
        push_line(&mut out, 1, &group_open_line(&group.id, &group.label));
        for node in spec
            .nodes
            .iter()
            .filter(|n| n.group_id.as_deref() == Some(group.id.as_str()))
        {
            push_line(&mut out, 2, &node_line(&node.id, &node.label, node.shape));
        }
        push_line(&mut out, 1, "end");
    }

    for edge in &spec.edges {
        push_line(
            &mut out,
            1,
            &edge_line(&edge.from, &edge.to, edge.label.as_deref(), edge.dashed),
        );
    }

    out
}

/// `flowchart <DIR>`
#[must_use]
pub fn header_line(direction: Direction) -> String {
    format!("{HEADER_KEYWORD} {direction}")
}

/// A node definition such as `a["Do thing"]`.
#[must_use]
pub fn node_line(id: &str, label: &str, shape: Shape) -> String {
    let (open, close) = shape.brackets();
    format!("{id}{open}\"{}\"{close}", escape_label(label))
}

/// A group opening line such as `subgraph g1["Label"]`.
#[must_use]
pub fn group_open_line(id: &str, label: &str) -> String {
    format!("subgraph {id}[\"{}\"]", escape_label(label))
}

/// An edge line such as `a -->|yes| b` or `a -.-> b`.
#[must_use]
pub fn edge_line(from: &str, to: &str, label: Option<&str>, dashed: bool) -> String {
    let arrow = if dashed { "-.->" } else { "-->" };
    let mut line = format!("{from} {arrow}");
    if let Some(label) = label.map(sanitize_edge_label).filter(|l| !l.is_empty()) {
        let _ = write!(line, "|{label}|");
    }
    let _ = write!(line, " {to}");
    line
}

/// Line break entity; a raw newline would split the statement.
pub const LINE_BREAK: &str = "<br/>";

/// Escape quotes and line breaks inside a quoted label.
#[must_use]
pub fn escape_label(label: &str) -> String {
    escape_line_breaks(&label.replace('"', "#quot;"))
}

/// Remove the pipe delimiter from an edge label.
#[must_use]
pub fn sanitize_edge_label(label: &str) -> String {
    escape_line_breaks(label.replace('|', "").trim())
}

fn escape_line_breaks(label: &str) -> String {
    label
        .replace("\r\n", LINE_BREAK)
        .replace(['\n', '\r'], LINE_BREAK)
}

fn push_line(out: &mut String, depth: usize, line: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(line);
    out.push('\n');
}
