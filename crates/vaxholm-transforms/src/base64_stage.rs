#![forbid(unsafe_code)]

//! Base64 codec stage.
//!
//! Direction follows the owning transform's `encode` flag.  When decoding,
//! XML markup in the input is stripped first: per W3C the base64 transform
//! "removes the tags and extracts the content".

use crate::transform::{Stage, TransformState, TransformStatus, TransformUsage};
use base64::Engine;
use vaxholm_core::{algorithm, Error, Result};
use vaxholm_xml::parsing_options;

pub struct Base64Stage;

impl Base64Stage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Base64Stage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for Base64Stage {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn href(&self) -> &str {
        algorithm::BASE64
    }

    fn usage(&self) -> TransformUsage {
        TransformUsage::DSIG_TRANSFORM
    }

    fn execute(&mut self, state: &mut TransformState, last: bool) -> Result<()> {
        if !state.gate_single_shot("base64", last)? {
            return Ok(());
        }

        let engine = base64::engine::general_purpose::STANDARD;
        let output = if state.encode {
            engine.encode(state.in_buf.data()).into_bytes()
        } else {
            let text = std::str::from_utf8(state.in_buf.data())
                .map_err(|e| Error::Base64(format!("input not UTF-8: {e}")))?;
            let text = if text.trim_start().starts_with('<') {
                extract_text_content(text)?
            } else {
                text.to_owned()
            };
            let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            engine
                .decode(&cleaned)
                .map_err(|e| Error::Base64(format!("decode error: {e}")))?
        };

        state.out_buf.append(&output);
        let consumed = state.in_buf.len();
        state.in_buf.remove_head(consumed);
        state.status = TransformStatus::Finished;
        Ok(())
    }
}

/// Extract all text content from XML markup.
fn extract_text_content(xml_text: &str) -> Result<String> {
    let doc = roxmltree::Document::parse_with_options(xml_text, parsing_options())
        .map_err(|e| Error::XmlFailed(format!("base64 input: {e}")))?;
    let mut text = String::new();
    for node in doc.descendants() {
        if node.is_text() {
            text.push_str(node.text().unwrap_or(""));
        }
    }
    Ok(text)
}
