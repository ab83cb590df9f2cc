#![forbid(unsafe_code)]

//! DOM lookup and serialization helpers over `roxmltree`.
//!
//! All document mutation in this library happens by splicing byte ranges
//! of the original text, so the helpers here are careful to work in terms
//! of `Node::range()`.

use roxmltree::{Document, Node, NodeId, ParsingOptions};
use std::collections::HashMap;
use std::ops::Range;

/// Parsing options used across the library (DTDs allowed, as encrypted
/// documents in the wild occasionally carry a DOCTYPE).
pub fn parsing_options() -> ParsingOptions {
    ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    }
}

/// Build the ID value → node mapping for a parsed document.
///
/// The default attribute names `Id`, `ID` and `id` are always registered;
/// `extra_attrs` adds caller-registered names (e.g. `AssertionID`).
pub fn build_id_map(doc: &Document<'_>, extra_attrs: &[String]) -> HashMap<String, NodeId> {
    let default_attrs = ["Id", "ID", "id"];
    let mut map = HashMap::new();
    for node in doc.descendants() {
        if !node.is_element() {
            continue;
        }
        for attr_name in &default_attrs {
            if let Some(val) = node.attribute(*attr_name) {
                map.insert(val.to_owned(), node.id());
            }
        }
        for attr_name in extra_attrs {
            if let Some(val) = node.attribute(attr_name.as_str()) {
                map.insert(val.to_owned(), node.id());
            }
        }
    }
    map
}

/// Check whether a node is an element with the given namespace and local name.
pub fn is_element_named(node: Node<'_, '_>, ns_uri: &str, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node.tag_name().namespace().unwrap_or("") == ns_uri
}

/// Find the first descendant element with the given local name and namespace.
pub fn find_element<'a, 'input>(
    doc: &'a Document<'input>,
    ns_uri: &str,
    local_name: &str,
) -> Option<Node<'a, 'input>> {
    doc.descendants()
        .find(|n| is_element_named(*n, ns_uri, local_name))
}

/// Find the first element child with the given local name and namespace.
pub fn find_child_element<'a, 'input>(
    parent: Node<'a, 'input>,
    ns_uri: &str,
    local_name: &str,
) -> Option<Node<'a, 'input>> {
    parent
        .children()
        .find(|n| is_element_named(*n, ns_uri, local_name))
}

/// First element child of a node, skipping text/comment/PI nodes.
pub fn first_element_child<'a, 'input>(parent: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    parent.children().find(|n| n.is_element())
}

/// Next element sibling of a node, skipping text/comment/PI nodes.
pub fn next_element_sibling<'a, 'input>(node: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    let mut cur = node.next_sibling();
    while let Some(n) = cur {
        if n.is_element() {
            return Some(n);
        }
        cur = n.next_sibling();
    }
    None
}

/// Collect all text content from a node and its descendants.
pub fn collect_text(node: Node<'_, '_>) -> String {
    let mut text = String::new();
    for n in node.descendants() {
        if n.is_text() {
            text.push_str(n.text().unwrap_or(""));
        }
    }
    text
}

/// Serialize a node by slicing its byte range out of the source text.
pub fn serialize_node<'a>(xml: &'a str, node: Node<'_, '_>) -> &'a str {
    let range = node.range();
    &xml[range.start..range.end]
}

/// Byte range of an element's content (between the start and end tags).
///
/// Returns `None` for a self-closing element, which has no content range.
pub fn content_range(xml: &str, node: Node<'_, '_>) -> Option<Range<usize>> {
    let range = node.range();
    let slice = &xml[range.start..range.end];
    let tag_end = end_of_start_tag(slice)?;
    if slice[..tag_end].ends_with("/>") {
        return None;
    }
    let close = slice.rfind("</")?;
    Some(range.start + tag_end..range.start + close)
}

/// Offset one past the `>` that closes the start tag, quote-aware.
fn end_of_start_tag(slice: &str) -> Option<usize> {
    let bytes = slice.as_bytes();
    let mut in_dq = false;
    let mut in_sq = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' if !in_sq => in_dq = !in_dq,
            b'\'' if !in_dq => in_sq = !in_sq,
            b'>' if !in_dq && !in_sq => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// The qualified tag name as written in the source (`prefix:local` or
/// `local`), taken from the raw start tag.
pub fn qualified_name<'a>(xml: &'a str, node: Node<'_, '_>) -> &'a str {
    let slice = serialize_node(xml, node);
    let inner = slice.trim_start_matches('<');
    let end = inner
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(inner.len());
    &inner[..end]
}
