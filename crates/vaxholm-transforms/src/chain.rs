#![forbid(unsafe_code)]

//! The transform chain: an ordered pipeline of transforms coupled by an
//! octet stream.
//!
//! Stages execute in insertion order from head to tail.  Data is either
//! pushed in from the outside (`binary_execute`, [`OutputSink`]) or pulled
//! through from an installed source transform (`execute`).

use crate::buffer::Buffer;
use crate::registry::TransformRegistry;
use crate::source::{resolve_source_data, BinarySource, UriResolver};
use crate::transform::{DataType, Transform, TransformStatus, TransformUsage};
use roxmltree::{Document, Node, NodeId};
use std::collections::HashMap;
use vaxholm_core::{ns, Error, Result};
use vaxholm_xml::is_element_named;

/// An ordered chain of transforms.
#[derive(Default)]
pub struct TransformChain {
    transforms: Vec<Transform>,
    result: Buffer,
    source_installed: bool,
    resolver: Option<Box<dyn UriResolver>>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
            result: Buffer::new(),
            source_installed: false,
            resolver: None,
        }
    }

    /// Install a resolver for non-local URIs.  Without one, `set_uri`
    /// rejects external URIs.
    pub fn set_resolver(&mut self, resolver: Box<dyn UriResolver>) {
        self.resolver = Some(resolver);
    }

    /// Append a transform; returns its position.
    pub fn append(&mut self, transform: Transform) -> usize {
        self.transforms.push(transform);
        self.transforms.len() - 1
    }

    /// Prepend a transform at the head of the chain.
    pub fn prepend(&mut self, transform: Transform) {
        self.transforms.insert(0, transform);
    }

    /// Instantiate a transform from the registry and append it.
    pub fn create_and_append(
        &mut self,
        registry: &TransformRegistry,
        href: &str,
    ) -> Result<usize> {
        let stage = registry.create(href, TransformUsage::ANY)?;
        Ok(self.append(Transform::new(stage)))
    }

    /// Instantiate a transform from the registry and prepend it.
    pub fn create_and_prepend(
        &mut self,
        registry: &TransformRegistry,
        href: &str,
    ) -> Result<()> {
        let stage = registry.create(href, TransformUsage::ANY)?;
        self.prepend(Transform::new(stage));
        Ok(())
    }

    /// Instantiate a transform from an `EncryptionMethod` or `Transform`
    /// element: look up its `Algorithm` attribute in the registry, enforce
    /// the usage mask, configure it from the node, and append it.
    pub fn node_read(
        &mut self,
        registry: &TransformRegistry,
        node: Node<'_, '_>,
        usage: TransformUsage,
    ) -> Result<usize> {
        let href = node.attribute(ns::attr::ALGORITHM).ok_or_else(|| {
            Error::InvalidNode {
                expected: format!("{} with Algorithm attribute", node.tag_name().name()),
                found: node.tag_name().name().to_owned(),
            }
        })?;
        let stage = registry.create(href, usage)?;
        let mut transform = Transform::new(stage);
        transform.read_node(node)?;
        tracing::debug!(transform = transform.name(), href, "transform instantiated");
        Ok(self.append(transform))
    }

    /// Read a sequence of `Transform` children from a `Transforms` element.
    pub fn nodes_list_read(
        &mut self,
        registry: &TransformRegistry,
        node: Node<'_, '_>,
        usage: TransformUsage,
    ) -> Result<()> {
        for child in node.children() {
            if !child.is_element() {
                continue;
            }
            if !is_element_named(child, ns::DSIG, ns::node::TRANSFORM)
                && !is_element_named(child, ns::ENC, ns::node::TRANSFORM)
            {
                return Err(Error::UnexpectedNode(child.tag_name().name().to_owned()));
            }
            self.node_read(registry, child, usage)?;
        }
        Ok(())
    }

    /// Classify a URI and install the matching source transform at the
    /// head of the chain.
    ///
    /// Empty URI → the whole document; `#fragment` (plain ID or
    /// `xpointer(id('…'))`) → the referenced subtree; anything else goes
    /// through the resolver hook and fails with an invalid-URI error when
    /// none is installed.
    pub fn set_uri(
        &mut self,
        uri: Option<&str>,
        xml: &str,
        doc: &Document<'_>,
        id_map: &HashMap<String, NodeId>,
    ) -> Result<()> {
        let data = resolve_source_data(uri, xml, doc, id_map, self.resolver.as_deref())?;
        tracing::debug!(uri = uri.unwrap_or(""), bytes = data.len(), "source installed");
        self.prepend(Transform::new(Box::new(BinarySource::new(data))));
        self.source_installed = true;
        Ok(())
    }

    /// Verify the chain is ready to run and the head accepts `data_type`.
    pub fn prepare(&mut self, data_type: DataType) -> Result<()> {
        let first = self
            .transforms
            .first()
            .ok_or_else(|| Error::InvalidData("transform chain is empty".into()))?;
        if first.data_type() != data_type {
            return Err(Error::InvalidData(format!(
                "transform {} does not accept this input",
                first.name()
            )));
        }
        Ok(())
    }

    /// Push bytes into the transform at `idx` and propagate its output
    /// down the chain.  `last` signals end of input and is propagated even
    /// when a stage produces no bytes.
    pub fn push_bin(&mut self, idx: usize, data: &[u8], last: bool) -> Result<()> {
        if idx >= self.transforms.len() {
            return Ok(());
        }
        let transform = &mut self.transforms[idx];
        transform.state.in_buf.append(data);
        transform.execute(last)?;
        if idx + 1 < self.transforms.len() {
            let chunk = self.transforms[idx].state.out_buf.take();
            self.push_bin(idx + 1, &chunk, last)?;
        }
        Ok(())
    }

    /// Pull bytes out of the transform at `idx`, drawing on upstream
    /// stages as needed.  Returns the produced bytes and whether the stage
    /// has finished.
    fn pop_bin(&mut self, idx: usize) -> Result<(Vec<u8>, bool)> {
        if idx == 0 {
            let transform = &mut self.transforms[0];
            if transform.status() != TransformStatus::Finished {
                transform.execute(true)?;
            }
            let out = transform.state.out_buf.take();
            return Ok((out, transform.status() == TransformStatus::Finished));
        }
        loop {
            let (upstream, upstream_done) = self.pop_bin(idx - 1)?;
            let transform = &mut self.transforms[idx];
            transform.state.in_buf.append(&upstream);
            transform.execute(upstream_done)?;
            let finished = transform.status() == TransformStatus::Finished;
            if finished || !transform.state.out_buf.is_empty() {
                let out = transform.state.out_buf.take();
                return Ok((out, finished));
            }
            if upstream_done {
                return Err(Error::invalid_status(
                    transform.name(),
                    "no output after end of input",
                ));
            }
        }
    }

    /// Push `data` into the head of the chain in one shot and collect the
    /// result.
    pub fn binary_execute(&mut self, data: &[u8]) -> Result<()> {
        if self.transforms.is_empty() {
            return Err(Error::InvalidData("transform chain is empty".into()));
        }
        tracing::debug!(
            stages = self.transforms.len(),
            bytes = data.len(),
            "chain binary execute"
        );
        self.push_bin(0, data, true)?;
        self.collect_result();
        Ok(())
    }

    /// Drive the chain from its installed source to the tail.
    pub fn execute(&mut self) -> Result<()> {
        if !self.source_installed {
            return Err(Error::InvalidData(
                "transform chain has no input source".into(),
            ));
        }
        tracing::debug!(stages = self.transforms.len(), "chain execute");
        let tail = self.transforms.len() - 1;
        loop {
            let (bytes, done) = self.pop_bin(tail)?;
            self.result.append(&bytes);
            if done {
                return Ok(());
            }
        }
    }

    /// Open a write sink whose bytes are fed into the head of the chain.
    pub fn output_sink(&mut self) -> OutputSink<'_> {
        OutputSink { chain: self }
    }

    fn collect_result(&mut self) {
        if let Some(tail) = self.transforms.last_mut() {
            let out = tail.state.out_buf.take();
            self.result.append(&out);
        }
    }

    /// The chain's final output.
    pub fn result(&self) -> &Buffer {
        &self.result
    }

    /// Take the final output out of the chain.
    pub fn take_result(&mut self) -> Vec<u8> {
        self.result.take()
    }

    pub fn get(&self, idx: usize) -> Option<&Transform> {
        self.transforms.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Transform> {
        self.transforms.get_mut(idx)
    }

    pub fn last(&self) -> Option<&Transform> {
        self.transforms.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Transform> {
        self.transforms.last_mut()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Whether a source transform has been installed by `set_uri`.
    pub fn has_source(&self) -> bool {
        self.source_installed
    }
}

/// A write handle feeding the head of a chain; closing signals end of
/// input and collects the chain result.
pub struct OutputSink<'c> {
    chain: &'c mut TransformChain,
}

impl OutputSink<'_> {
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.chain.push_bin(0, data, false)
    }

    pub fn close(self) -> Result<()> {
        self.chain.push_bin(0, &[], true)?;
        self.chain.collect_result();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base64_stage::Base64Stage;
    use vaxholm_xml::{build_id_map, parsing_options};

    fn base64_transform(encode: bool) -> Transform {
        let mut t = Transform::new(Box::new(Base64Stage::new()));
        t.set_encode(encode);
        t
    }

    #[test]
    fn test_binary_execute_single_stage() {
        let mut chain = TransformChain::new();
        chain.append(base64_transform(true));
        chain.binary_execute(b"Hello, World!").unwrap();
        assert_eq!(chain.result().data(), b"SGVsbG8sIFdvcmxkIQ==");
    }

    #[test]
    fn test_push_propagates_through_two_stages() {
        // encode then decode: identity
        let mut chain = TransformChain::new();
        chain.append(base64_transform(true));
        chain.append(base64_transform(false));
        chain.binary_execute(b"round trip payload").unwrap();
        assert_eq!(chain.result().data(), b"round trip payload");
    }

    #[test]
    fn test_output_sink_chunked_writes() {
        let mut chain = TransformChain::new();
        chain.append(base64_transform(true));
        let mut sink = chain.output_sink();
        sink.write(b"Hello, ").unwrap();
        sink.write(b"World!").unwrap();
        sink.close().unwrap();
        assert_eq!(chain.result().data(), b"SGVsbG8sIFdvcmxkIQ==");
    }

    #[test]
    fn test_execute_pull_from_source() {
        let xml = r#"<doc><payload Id="p">SGVsbG8sIFdvcmxkIQ==</payload></doc>"#;
        let doc = Document::parse_with_options(xml, parsing_options()).unwrap();
        let id_map = build_id_map(&doc, &[]);

        let mut chain = TransformChain::new();
        chain.append(base64_transform(false));
        chain.set_uri(Some("#p"), xml, &doc, &id_map).unwrap();
        chain.execute().unwrap();
        // the source emits the subtree markup; the base64 decoder strips
        // the tags and decodes the text content
        assert_eq!(chain.result().data(), b"Hello, World!");
    }

    #[test]
    fn test_execute_without_source_fails() {
        let mut chain = TransformChain::new();
        chain.append(base64_transform(false));
        assert!(matches!(chain.execute(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_all_stages_finished_after_run() {
        let mut chain = TransformChain::new();
        chain.append(base64_transform(true));
        chain.append(base64_transform(false));
        chain.binary_execute(b"x").unwrap();
        for idx in 0..chain.len() {
            let t = chain.get(idx).unwrap();
            assert_eq!(t.status(), TransformStatus::Finished);
            assert!(t.state.in_buf.is_empty());
        }
    }

    #[test]
    fn test_nodes_list_read_rejects_foreign_child() {
        let xml = r#"<Transforms xmlns="http://www.w3.org/2000/09/xmldsig#">
            <NotATransform/>
        </Transforms>"#;
        let doc = Document::parse_with_options(xml, parsing_options()).unwrap();
        let registry = TransformRegistry::with_builtins();
        let mut chain = TransformChain::new();
        let err = chain
            .nodes_list_read(&registry, doc.root_element(), TransformUsage::DSIG_TRANSFORM)
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedNode(_)));
    }

    #[test]
    fn test_node_read_requires_algorithm_attribute() {
        let xml = r#"<Transform xmlns="http://www.w3.org/2000/09/xmldsig#"/>"#;
        let doc = Document::parse_with_options(xml, parsing_options()).unwrap();
        let registry = TransformRegistry::with_builtins();
        let mut chain = TransformChain::new();
        let err = chain
            .node_read(&registry, doc.root_element(), TransformUsage::DSIG_TRANSFORM)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidNode { .. }));
    }
}
