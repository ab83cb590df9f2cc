#![forbid(unsafe_code)]

//! Byte-range edits on the source document text.
//!
//! All DOM mutation in the engine happens here: CipherValue fills, key
//! name fills and element/content replacement are computed as
//! (range, replacement) pairs against the original text and applied in
//! one pass from the back of the document forward.

use roxmltree::Node;
use std::ops::Range;
use vaxholm_xml::{content_range, qualified_name, serialize_node};

/// A pending text edit.
pub type Edit = (Range<usize>, String);

/// Build an edit that replaces an element's text content, preserving the
/// start tag (qualified name, attributes) as written in the source.
/// Self-closing elements are expanded.
pub fn fill_element_text(xml: &str, node: Node<'_, '_>, text: &str) -> Edit {
    let range = node.range();
    let slice = serialize_node(xml, node);
    match content_range(xml, node) {
        Some(content) => {
            let head = &slice[..content.start - range.start];
            let tail = &slice[content.end - range.start..];
            (range, format!("{head}{text}{tail}"))
        }
        None => {
            // "<qname attrs/>" becomes "<qname attrs>text</qname>"
            let qname = qualified_name(xml, node);
            let open = slice
                .strip_suffix("/>")
                .map(str::trim_end)
                .unwrap_or(slice);
            (range, format!("{open}>{text}</{qname}>"))
        }
    }
}

/// Build an edit that replaces the whole element.
pub fn replace_element(node: Node<'_, '_>, replacement: &str) -> Edit {
    (node.range(), replacement.to_owned())
}

/// Apply a set of non-overlapping edits, back to front.
pub fn apply_edits(xml: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = xml.to_owned();
    for (range, replacement) in edits {
        out.replace_range(range, &replacement);
    }
    out
}

/// Strip an XML declaration and DOCTYPE from the front of a document, for
/// embedding a template into a host document.
pub fn strip_prolog(xml: &str) -> &str {
    let mut rest = xml.trim_start();
    if rest.starts_with("<?xml") {
        if let Some(end) = rest.find("?>") {
            rest = rest[end + 2..].trim_start();
        }
    }
    if rest.starts_with("<!DOCTYPE") {
        if let Some(end) = rest.find('>') {
            rest = rest[end + 1..].trim_start();
        }
    }
    rest.trim_end()
}
