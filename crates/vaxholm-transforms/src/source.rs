#![forbid(unsafe_code)]

//! Input source stage installed at the head of a chain by `set_uri`.
//!
//! Same-document references (empty URI, `#id`, `#xpointer(id('id'))`) are
//! resolved against the parsed document.  Anything else is delegated to a
//! [`UriResolver`] hook; without one, external URIs are rejected.

use crate::transform::{Stage, TransformState, TransformStatus, TransformUsage};
use roxmltree::{Document, NodeId};
use std::collections::HashMap;
use vaxholm_core::{Error, Result};
use vaxholm_xml::serialize_node;

/// Hook for fetching data identified by a non-local URI.
pub trait UriResolver: Send {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>>;
}

/// Resolve a URI to the octets it identifies.
pub fn resolve_source_data(
    uri: Option<&str>,
    xml: &str,
    doc: &Document<'_>,
    id_map: &HashMap<String, NodeId>,
    resolver: Option<&dyn UriResolver>,
) -> Result<Vec<u8>> {
    let uri = uri.unwrap_or("");
    if uri.is_empty() {
        // Same-document reference: the whole document.
        return Ok(xml.as_bytes().to_vec());
    }
    if let Some(fragment) = uri.strip_prefix('#') {
        let id = parse_xpointer_id(fragment).unwrap_or(fragment);
        let node_id = id_map
            .get(id)
            .copied()
            .ok_or_else(|| Error::InvalidUri(format!("cannot resolve #{id}")))?;
        let node = doc
            .get_node(node_id)
            .ok_or_else(|| Error::InvalidUri(format!("cannot resolve #{id}")))?;
        return Ok(serialize_node(xml, node).as_bytes().to_vec());
    }
    match resolver {
        Some(r) => r.fetch(uri),
        None => Err(Error::InvalidUri(format!(
            "external URI not allowed: {uri}"
        ))),
    }
}

/// Parse an `xpointer(id('...'))` expression and return the ID value.
fn parse_xpointer_id(expr: &str) -> Option<&str> {
    let inner = expr.strip_prefix("xpointer(id('")?;
    inner.strip_suffix("'))")
}

/// The source stage: holds pre-resolved input data and emits it when the
/// chain is driven.
pub struct BinarySource {
    data: Vec<u8>,
}

impl BinarySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl Stage for BinarySource {
    fn name(&self) -> &'static str {
        "input"
    }

    fn href(&self) -> &str {
        ""
    }

    fn usage(&self) -> TransformUsage {
        TransformUsage::ANY
    }

    fn execute(&mut self, state: &mut TransformState, last: bool) -> Result<()> {
        if state.status == TransformStatus::None {
            state.status = TransformStatus::Working;
        }
        match state.status {
            TransformStatus::Working if !last => Ok(()),
            TransformStatus::Working => {
                let data = std::mem::take(&mut self.data);
                state.out_buf.append(&data);
                state.status = TransformStatus::Finished;
                Ok(())
            }
            TransformStatus::Finished => Ok(()),
            status => Err(Error::invalid_status("input", format!("status={status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaxholm_xml::{build_id_map, parsing_options};

    #[test]
    fn test_resolve_whole_document() {
        let xml = r#"<root><a/></root>"#;
        let doc = Document::parse_with_options(xml, parsing_options()).unwrap();
        let id_map = build_id_map(&doc, &[]);
        let data = resolve_source_data(None, xml, &doc, &id_map, None).unwrap();
        assert_eq!(data, xml.as_bytes());
    }

    #[test]
    fn test_resolve_fragment() {
        let xml = r#"<root><a Id="target">payload</a></root>"#;
        let doc = Document::parse_with_options(xml, parsing_options()).unwrap();
        let id_map = build_id_map(&doc, &[]);
        let data = resolve_source_data(Some("#target"), xml, &doc, &id_map, None).unwrap();
        assert_eq!(data, br#"<a Id="target">payload</a>"#);
    }

    #[test]
    fn test_resolve_xpointer_fragment() {
        let xml = r#"<root><a Id="t">x</a></root>"#;
        let doc = Document::parse_with_options(xml, parsing_options()).unwrap();
        let id_map = build_id_map(&doc, &[]);
        let data =
            resolve_source_data(Some("#xpointer(id('t'))"), xml, &doc, &id_map, None).unwrap();
        assert_eq!(data, br#"<a Id="t">x</a>"#);
    }

    #[test]
    fn test_external_uri_rejected_without_resolver() {
        let xml = r#"<root/>"#;
        let doc = Document::parse_with_options(xml, parsing_options()).unwrap();
        let id_map = build_id_map(&doc, &[]);
        let err = resolve_source_data(Some("http://example.com/x"), xml, &doc, &id_map, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUri(_)));
    }

    #[test]
    fn test_unknown_fragment_is_invalid_uri() {
        let xml = r#"<root/>"#;
        let doc = Document::parse_with_options(xml, parsing_options()).unwrap();
        let id_map = build_id_map(&doc, &[]);
        let err = resolve_source_data(Some("#nope"), xml, &doc, &id_map, None).unwrap_err();
        assert!(matches!(err, Error::InvalidUri(_)));
    }
}
