#![forbid(unsafe_code)]

//! XSLT transform stage.
//!
//! XSLT is not a streaming transform: it needs the complete input
//! document.  The stage therefore buffers input while `last` is false and
//! performs the parse/apply/serialize step in one shot when the end of
//! input arrives.

use crate::stylesheet::Stylesheet;
use crate::transform::{Stage, TransformState, TransformStatus, TransformUsage};
use vaxholm_core::{algorithm, Error, Result};

/// Stylesheet-driven byte-to-byte transform stage.
pub struct XsltStage {
    stylesheet: Option<Stylesheet>,
}

impl XsltStage {
    pub fn new() -> Self {
        Self { stylesheet: None }
    }
}

impl Default for XsltStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for XsltStage {
    fn name(&self) -> &'static str {
        "xslt"
    }

    fn href(&self) -> &str {
        algorithm::XSLT
    }

    fn usage(&self) -> TransformUsage {
        TransformUsage::DSIG_TRANSFORM
    }

    /// Compile the stylesheet from the element children of the
    /// `Transform` node.
    fn read_node(&mut self, node: roxmltree::Node<'_, '_>) -> Result<()> {
        if self.stylesheet.is_some() {
            return Err(Error::EngineFailed("xslt stage already configured".into()));
        }
        let xml = node.document().input_text();
        let mut buf = String::new();
        for child in node.children() {
            if child.is_element() {
                let range = child.range();
                buf.push_str(&xml[range.start..range.end]);
            }
        }
        if buf.is_empty() {
            return Err(Error::InvalidNodeContent(
                node.tag_name().name().to_owned(),
            ));
        }
        self.stylesheet = Some(Stylesheet::compile(&buf)?);
        Ok(())
    }

    fn execute(&mut self, state: &mut TransformState, last: bool) -> Result<()> {
        if !state.gate_single_shot("xslt", last)? {
            return Ok(());
        }
        let stylesheet = self
            .stylesheet
            .as_ref()
            .ok_or_else(|| Error::EngineFailed("xslt stage has no stylesheet".into()))?;

        let input = std::str::from_utf8(state.in_buf.data())
            .map_err(|e| Error::XmlFailed(format!("XSLT input not UTF-8: {e}")))?;
        let output = stylesheet.apply(input)?;

        state.out_buf.append(&output);
        let consumed = state.in_buf.len();
        state.in_buf.remove_head(consumed);
        state.status = TransformStatus::Finished;
        Ok(())
    }
}
