#![forbid(unsafe_code)]

//! The encryption context: template processing and the top-level
//! encrypt/decrypt operations.
//!
//! Processing order for an `EncryptedData`/`EncryptedKey` element:
//! 1. Read attributes, then children in strict order: optional
//!    `EncryptionMethod`, optional `ds:KeyInfo`, required `CipherData`,
//!    optional `EncryptionProperties` (ignored); for `EncryptedKey` also
//!    optional `ReferenceList` (ignored) and `CarriedKeyName`.
//! 2. Instantiate the encryption method (preset or from the template),
//!    point its direction at the operation, resolve a key against its
//!    requirements and install it.
//! 3. When encrypting into a `CipherValue`, append a base64 encoder;
//!    when decrypting from one, a base64 decoder was already prepended.
//! 4. Run the chain and write ciphertext plus key info back into the
//!    template (encrypt) or splice the plaintext over the element
//!    (decrypt).

use crate::{keyinfo, splice};
use roxmltree::{Document, Node, NodeId};
use std::collections::HashMap;
use vaxholm_core::{algorithm, ns, Error, Result};
use vaxholm_keys::{Key, KeyReq, KeysManager};
use vaxholm_transforms::{DataType, Stage, Transform, TransformChain, TransformRegistry, TransformUsage};
use vaxholm_xml::{
    build_id_map, collect_text, content_range, find_element, first_element_child,
    is_element_named, next_element_sibling, parsing_options, serialize_node,
};

/// Whether the context processes `EncryptedData` or `EncryptedKey`
/// elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncCtxMode {
    EncryptedData,
    EncryptedKey,
}

/// Provenance of the encryption method transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncMethodOrigin {
    FromTemplate,
    CallerSupplied,
}

/// Identifies the element to encrypt within a source document.
pub enum Target<'a> {
    /// By registered ID attribute value.
    Id(&'a str),
    /// First element with the given namespace and local name.
    Element { ns: &'a str, local: &'a str },
}

/// An XML encryption/decryption context.  Single-use: once an operation
/// has produced a result, further operations fail fast.
pub struct XmlEncCtx<'k> {
    mode: EncCtxMode,
    encrypt: bool,

    /// `Id` attribute of the processed element.
    pub id: Option<String>,
    /// `Type` attribute (`#Element`, `#Content`, or a MIME type URI).
    pub enc_type: Option<String>,
    /// `MimeType` attribute.
    pub mime_type: Option<String>,
    /// `Encoding` attribute.
    pub encoding: Option<String>,
    /// `Recipient` attribute (`EncryptedKey` mode only; read, not
    /// validated).
    pub recipient: Option<String>,
    /// `CarriedKeyName` text (`EncryptedKey` mode only, raw text).
    pub carried_key_name: Option<String>,

    enc_method_node: Option<NodeId>,
    key_info_node: Option<NodeId>,
    cipher_value_node: Option<NodeId>,

    preset_method: Option<Transform>,
    method_origin: Option<EncMethodOrigin>,
    method_idx: Option<usize>,

    enc_key: Option<Key>,
    key_req: KeyReq,

    registry: TransformRegistry,
    chain: TransformChain,
    enc_result: Option<Vec<u8>>,

    /// Whether the host document (or template) was modified.
    pub replaced: bool,
    /// Whether the chain result carries base64 text rather than raw
    /// octets.
    pub result_base64_encoded: bool,

    keys: &'k KeysManager,
    id_attrs: Vec<String>,
}

impl<'k> XmlEncCtx<'k> {
    /// Create a context for `EncryptedData` processing.
    pub fn new(keys: &'k KeysManager) -> Self {
        Self::new_with_mode(keys, EncCtxMode::EncryptedData)
    }

    /// Create a context with an explicit mode.
    pub fn new_with_mode(keys: &'k KeysManager, mode: EncCtxMode) -> Self {
        Self {
            mode,
            encrypt: false,
            id: None,
            enc_type: None,
            mime_type: None,
            encoding: None,
            recipient: None,
            carried_key_name: None,
            enc_method_node: None,
            key_info_node: None,
            cipher_value_node: None,
            preset_method: None,
            method_origin: None,
            method_idx: None,
            enc_key: None,
            key_req: KeyReq::default(),
            registry: crate::default_registry(),
            chain: TransformChain::new(),
            enc_result: None,
            replaced: false,
            result_base64_encoded: false,
            keys,
            id_attrs: Vec::new(),
        }
    }

    pub fn mode(&self) -> EncCtxMode {
        self.mode
    }

    /// Preset the key, bypassing key-info resolution.
    pub fn set_key(&mut self, key: Key) {
        self.enc_key = Some(key);
    }

    /// Preset the encryption method, overriding the template's
    /// `EncryptionMethod` element.
    pub fn set_enc_method(&mut self, stage: Box<dyn Stage>) {
        self.preset_method = Some(Transform::new(stage));
    }

    /// Register an additional ID attribute name for `#fragment`
    /// resolution.
    pub fn add_id_attr(&mut self, name: &str) {
        self.id_attrs.push(name.to_owned());
    }

    /// Access the registry, e.g. to plug in collaborator transforms
    /// (canonicalization, XPath, a URI fetcher).
    pub fn registry_mut(&mut self) -> &mut TransformRegistry {
        &mut self.registry
    }

    /// The transform chain (inspection).
    pub fn chain(&self) -> &TransformChain {
        &self.chain
    }

    /// The instantiated encryption method transform, once the template
    /// has been read.
    pub fn enc_method(&self) -> Option<&Transform> {
        self.method_idx.and_then(|idx| self.chain.get(idx))
    }

    /// Where the encryption method came from.
    pub fn enc_method_origin(&self) -> Option<EncMethodOrigin> {
        self.method_origin
    }

    /// The template's `EncryptionMethod` node, if one was present.
    pub fn enc_method_node(&self) -> Option<NodeId> {
        self.enc_method_node
    }

    /// The operation result, if one has been produced.
    pub fn result(&self) -> Option<&[u8]> {
        self.enc_result.as_deref()
    }

    // ── Top-level operations ─────────────────────────────────────────

    /// Encrypt raw octets into the template; returns the template with
    /// `CipherValue` (and key info) filled in.
    pub fn binary_encrypt(&mut self, template: &str, data: &[u8]) -> Result<String> {
        self.ensure_fresh()?;
        self.encrypt = true;
        tracing::debug!(mode = ?self.mode, bytes = data.len(), "binary encrypt");

        let doc = parse(template)?;
        let id_map = build_id_map(&doc, &self.id_attrs);
        let node = self.find_mode_node(&doc)?;

        self.enc_data_node_read(template, &doc, node, &id_map)?;
        self.chain.binary_execute(data)?;
        self.enc_result = Some(self.chain.take_result());

        self.cipher_data_node_write(template, &doc)
    }

    /// Encrypt an element (Type `#Element`) or its content (Type
    /// `#Content`) of `document`, replacing it with the populated
    /// template.  Returns the modified document.
    pub fn xml_encrypt(
        &mut self,
        template: &str,
        document: &str,
        target: Target<'_>,
    ) -> Result<String> {
        self.ensure_fresh()?;
        self.encrypt = true;

        let tmpl_doc = parse(template)?;
        let tmpl_id_map = build_id_map(&tmpl_doc, &self.id_attrs);
        let tmpl_node = self.find_mode_node(&tmpl_doc)?;
        self.enc_data_node_read(template, &tmpl_doc, tmpl_node, &tmpl_id_map)?;

        let doc = parse(document)?;
        let doc_id_map = build_id_map(&doc, &self.id_attrs);
        let target_node = resolve_target(&doc, &doc_id_map, &target)?;
        tracing::debug!(element = target_node.tag_name().name(), "xml encrypt");

        #[derive(Clone, Copy)]
        enum Shape {
            Element,
            Content,
        }
        let shape = match self.enc_type.as_deref() {
            Some(ns::ENC_TYPE_ELEMENT) => Shape::Element,
            Some(ns::ENC_TYPE_CONTENT) => Shape::Content,
            other => {
                return Err(Error::InvalidType(format!(
                    "cannot encrypt a node as \"{}\"",
                    other.unwrap_or("(none)")
                )))
            }
        };

        self.chain.prepare(DataType::Binary)?;
        let payload: &str = match shape {
            Shape::Element => serialize_node(document, target_node),
            Shape::Content => match content_range(document, target_node) {
                Some(range) => &document[range],
                None => "",
            },
        };
        let mut sink = self.chain.output_sink();
        sink.write(payload.as_bytes())?;
        sink.close()?;
        self.enc_result = Some(self.chain.take_result());

        let filled = self.cipher_data_node_write(template, &tmpl_doc)?;
        let embedded = splice::strip_prolog(&filled).to_owned();

        let edit = match shape {
            Shape::Element => splice::replace_element(target_node, &embedded),
            Shape::Content => splice::fill_element_text(document, target_node, &embedded),
        };
        let result = splice::apply_edits(document, vec![edit]);
        self.replaced = true;
        Ok(result)
    }

    /// Encrypt data identified by a URI; the template's `CipherValue` is
    /// filled with the result.
    pub fn uri_encrypt(&mut self, template: &str, uri: &str) -> Result<String> {
        self.ensure_fresh()?;
        self.encrypt = true;
        tracing::debug!(uri, "uri encrypt");

        let doc = parse(template)?;
        let id_map = build_id_map(&doc, &self.id_attrs);
        self.chain.set_uri(Some(uri), template, &doc, &id_map)?;

        let node = self.find_mode_node(&doc)?;
        self.enc_data_node_read(template, &doc, node, &id_map)?;
        self.chain.execute()?;
        self.enc_result = Some(self.chain.take_result());

        self.cipher_data_node_write(template, &doc)
    }

    /// Decrypt the first matching element of `document`, returning the
    /// plaintext octets.
    pub fn decrypt_to_buffer(&mut self, document: &str) -> Result<Vec<u8>> {
        self.ensure_fresh()?;
        self.encrypt = false;

        let doc = parse(document)?;
        let id_map = build_id_map(&doc, &self.id_attrs);
        let node = self.find_mode_node(&doc)?;
        self.decrypt_node(document, &doc, node, &id_map)
    }

    /// Decrypt the first matching element of `document`.  When its Type
    /// is `#Element` or `#Content` the decrypted XML replaces the
    /// element and the whole modified document is returned; otherwise the
    /// raw plaintext octets are returned.
    pub fn decrypt(&mut self, document: &str) -> Result<Vec<u8>> {
        self.ensure_fresh()?;
        self.encrypt = false;

        let doc = parse(document)?;
        let id_map = build_id_map(&doc, &self.id_attrs);
        let node = self.find_mode_node(&doc)?;
        let node_range = node.range();

        let plaintext = self.decrypt_node(document, &doc, node, &id_map)?;

        match self.enc_type.as_deref() {
            Some(ns::ENC_TYPE_ELEMENT) | Some(ns::ENC_TYPE_CONTENT) => {
                let text = String::from_utf8(plaintext).map_err(|e| {
                    Error::XmlFailed(format!("decrypted content is not UTF-8: {e}"))
                })?;
                let result = splice::apply_edits(document, vec![(node_range, text)]);
                self.replaced = true;
                Ok(result.into_bytes())
            }
            _ => Ok(plaintext),
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Decrypt a specific `EncryptedData`/`EncryptedKey` node.  Shared
    /// with the key-info reader for nested `EncryptedKey` unwrapping.
    pub(crate) fn decrypt_node(
        &mut self,
        xml: &str,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        id_map: &HashMap<String, NodeId>,
    ) -> Result<Vec<u8>> {
        tracing::debug!(mode = ?self.mode, "decrypt node");
        self.enc_data_node_read(xml, doc, node, id_map)?;

        if let Some(cv_id) = self.cipher_value_node {
            let cv = doc
                .get_node(cv_id)
                .ok_or_else(|| Error::EngineFailed("CipherValue node vanished".into()))?;
            let text = collect_text(cv);
            if text.trim().is_empty() {
                return Err(Error::InvalidNodeContent(ns::node::CIPHER_VALUE.into()));
            }
            self.chain.binary_execute(text.as_bytes())?;
        } else if self.chain.has_source() {
            self.chain.execute()?;
        } else {
            return Err(Error::InvalidData(
                "CipherData carries neither CipherValue nor CipherReference".into(),
            ));
        }

        let result = self.chain.take_result();
        self.enc_result = Some(result.clone());
        Ok(result)
    }

    /// Encrypt raw octets against a specific template node; used for
    /// wrapping session keys into `EncryptedKey` templates.  Returns the
    /// `CipherValue` node to fill and the base64 ciphertext text.
    pub(crate) fn encrypt_binary_node(
        &mut self,
        xml: &str,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        id_map: &HashMap<String, NodeId>,
        data: &[u8],
    ) -> Result<(NodeId, Vec<u8>)> {
        self.ensure_fresh()?;
        self.encrypt = true;

        self.enc_data_node_read(xml, doc, node, id_map)?;
        self.chain.binary_execute(data)?;
        let result = self.chain.take_result();
        self.enc_result = Some(result.clone());

        let cv = self.cipher_value_node.ok_or_else(|| {
            Error::InvalidData("EncryptedKey template has no CipherValue".into())
        })?;
        Ok((cv, result))
    }

    fn ensure_fresh(&self) -> Result<()> {
        if self.enc_result.is_some() {
            return Err(Error::invalid_status(
                "encryption context",
                "context already holds a result",
            ));
        }
        Ok(())
    }

    fn find_mode_node<'a, 'input>(&self, doc: &'a Document<'input>) -> Result<Node<'a, 'input>> {
        let name = match self.mode {
            EncCtxMode::EncryptedData => ns::node::ENCRYPTED_DATA,
            EncCtxMode::EncryptedKey => ns::node::ENCRYPTED_KEY,
        };
        find_element(doc, ns::ENC, name).ok_or_else(|| Error::invalid_node(name, None))
    }

    /// Parse an `EncryptedData`/`EncryptedKey` element and wire up the
    /// transform chain.
    fn enc_data_node_read(
        &mut self,
        xml: &str,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        id_map: &HashMap<String, NodeId>,
    ) -> Result<()> {
        self.id = node.attribute(ns::attr::ID).map(str::to_owned);
        self.enc_type = node.attribute(ns::attr::TYPE).map(str::to_owned);
        self.mime_type = node.attribute(ns::attr::MIME_TYPE).map(str::to_owned);
        self.encoding = node.attribute(ns::attr::ENCODING).map(str::to_owned);
        if self.mode == EncCtxMode::EncryptedKey {
            self.recipient = node.attribute(ns::attr::RECIPIENT).map(str::to_owned);
        }

        let mut cur = first_element_child(node);

        let mut enc_method_node = None;
        if let Some(n) = cur {
            if is_element_named(n, ns::ENC, ns::node::ENCRYPTION_METHOD) {
                enc_method_node = Some(n);
                self.enc_method_node = Some(n.id());
                cur = next_element_sibling(n);
            }
        }

        let mut key_info_node = None;
        if let Some(n) = cur {
            if is_element_named(n, ns::DSIG, ns::node::KEY_INFO) {
                key_info_node = Some(n);
                self.key_info_node = Some(n.id());
                cur = next_element_sibling(n);
            }
        }

        let cipher_data = match cur {
            Some(n) if is_element_named(n, ns::ENC, ns::node::CIPHER_DATA) => n,
            other => {
                return Err(Error::invalid_node(
                    ns::node::CIPHER_DATA,
                    other.map(|n| n.tag_name().name()),
                ))
            }
        };
        self.cipher_data_node_read(xml, doc, cipher_data, id_map)?;
        cur = next_element_sibling(cipher_data);

        if let Some(n) = cur {
            if is_element_named(n, ns::ENC, ns::node::ENCRYPTION_PROPERTIES) {
                cur = next_element_sibling(n);
            }
        }
        if self.mode == EncCtxMode::EncryptedKey {
            if let Some(n) = cur {
                if is_element_named(n, ns::ENC, ns::node::REFERENCE_LIST) {
                    cur = next_element_sibling(n);
                }
            }
            if let Some(n) = cur {
                if is_element_named(n, ns::ENC, ns::node::CARRIED_KEY_NAME) {
                    self.carried_key_name = Some(collect_text(n));
                    cur = next_element_sibling(n);
                }
            }
        }
        if let Some(n) = cur {
            return Err(Error::UnexpectedNode(n.tag_name().name().to_owned()));
        }

        // instantiate the encryption method
        let method_idx = if let Some(preset) = self.preset_method.take() {
            self.method_origin = Some(EncMethodOrigin::CallerSupplied);
            self.chain.append(preset)
        } else if let Some(method_node) = enc_method_node {
            self.method_origin = Some(EncMethodOrigin::FromTemplate);
            self.chain
                .node_read(&self.registry, method_node, TransformUsage::ENCRYPTION_METHOD)?
        } else {
            return Err(Error::InvalidData("encryption method not specified".into()));
        };
        self.method_idx = Some(method_idx);

        let encrypt = self.encrypt;
        let mut req = KeyReq::default();
        {
            let method = self
                .chain
                .get_mut(method_idx)
                .ok_or_else(|| Error::EngineFailed("encryption method vanished".into()))?;
            method.set_encode(encrypt);
            method.set_key_req(&mut req)?;
        }
        self.key_req = req;

        // resolve the key
        if self.enc_key.is_none() {
            if let Some(ki) = key_info_node {
                self.enc_key = keyinfo::read_key(
                    xml,
                    doc,
                    ki,
                    id_map,
                    &self.key_req,
                    self.encrypt,
                    self.keys,
                    &self.id_attrs,
                )?;
            }
        }
        let key = match &self.enc_key {
            Some(k) if self.key_req.matches(k) => k.clone(),
            _ => {
                return Err(Error::KeyNotFound(
                    "no key satisfies the encryption method requirements".into(),
                ))
            }
        };
        if let Some(method) = self.chain.get_mut(method_idx) {
            method.set_key(&key)?;
        }

        // a CipherValue sink needs base64 text, not raw octets
        if self.encrypt && self.cipher_value_node.is_some() {
            let idx = self
                .chain
                .create_and_append(&self.registry, algorithm::BASE64)?;
            if let Some(encoder) = self.chain.get_mut(idx) {
                encoder.set_encode(true);
            }
            self.result_base64_encoded = true;
        }
        Ok(())
    }

    /// Examine the child of `CipherData`: an inline `CipherValue` or a
    /// `CipherReference`.
    fn cipher_data_node_read(
        &mut self,
        xml: &str,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        id_map: &HashMap<String, NodeId>,
    ) -> Result<()> {
        let mut cur = first_element_child(node);

        if let Some(n) = cur {
            if is_element_named(n, ns::ENC, ns::node::CIPHER_VALUE) {
                if !self.encrypt {
                    // ciphertext arrives as base64 text
                    self.chain
                        .create_and_prepend(&self.registry, algorithm::BASE64)?;
                }
                self.cipher_value_node = Some(n.id());
                cur = next_element_sibling(n);
            } else if is_element_named(n, ns::ENC, ns::node::CIPHER_REFERENCE) {
                if self.encrypt {
                    return Err(Error::InvalidData(
                        "CipherReference is not a valid encryption sink".into(),
                    ));
                }
                self.cipher_reference_node_read(xml, doc, n, id_map)?;
                cur = next_element_sibling(n);
            }
        }
        if let Some(n) = cur {
            return Err(Error::invalid_node(
                "CipherValue or CipherReference",
                Some(n.tag_name().name()),
            ));
        }
        Ok(())
    }

    /// Read a `CipherReference`: resolve its URI into a source transform
    /// and append its declared transforms.
    fn cipher_reference_node_read(
        &mut self,
        xml: &str,
        doc: &Document<'_>,
        node: Node<'_, '_>,
        id_map: &HashMap<String, NodeId>,
    ) -> Result<()> {
        if let Some(uri) = node.attribute(ns::attr::URI) {
            self.chain.set_uri(Some(uri), xml, doc, id_map)?;
        }

        let mut cur = first_element_child(node);
        if let Some(n) = cur {
            if is_element_named(n, ns::ENC, ns::node::TRANSFORMS)
                || is_element_named(n, ns::DSIG, ns::node::TRANSFORMS)
            {
                self.chain
                    .nodes_list_read(&self.registry, n, TransformUsage::DSIG_TRANSFORM)?;
                cur = next_element_sibling(n);
            }
        }
        if let Some(n) = cur {
            return Err(Error::UnexpectedNode(n.tag_name().name().to_owned()));
        }
        Ok(())
    }

    /// Write the ciphertext into `CipherValue` and the key material into
    /// `KeyInfo`, returning the updated template text.  The key-info
    /// write happens strictly after ciphertext generation.
    fn cipher_data_node_write(&mut self, template: &str, doc: &Document<'_>) -> Result<String> {
        let result = self
            .enc_result
            .as_ref()
            .ok_or_else(|| Error::EngineFailed("no encryption result".into()))?;
        let key = self
            .enc_key
            .as_ref()
            .ok_or_else(|| Error::EngineFailed("no encryption key".into()))?;

        let mut edits: Vec<splice::Edit> = Vec::new();
        if let Some(cv_id) = self.cipher_value_node {
            let cv = doc
                .get_node(cv_id)
                .ok_or_else(|| Error::EngineFailed("CipherValue node vanished".into()))?;
            let text = std::str::from_utf8(result)
                .map_err(|_| Error::EngineFailed("ciphertext is not base64 text".into()))?;
            edits.push(splice::fill_element_text(template, cv, text));
            self.replaced = true;
        }

        if let Some(ki_id) = self.key_info_node {
            let ki = doc
                .get_node(ki_id)
                .ok_or_else(|| Error::EngineFailed("KeyInfo node vanished".into()))?;
            keyinfo::write(template, doc, ki, key, self.keys, &self.id_attrs, &mut edits)?;
        }

        Ok(splice::apply_edits(template, edits))
    }
}

fn parse(xml: &str) -> Result<Document<'_>> {
    Document::parse_with_options(xml, parsing_options())
        .map_err(|e| Error::XmlFailed(e.to_string()))
}

fn resolve_target<'a, 'input>(
    doc: &'a Document<'input>,
    id_map: &HashMap<String, NodeId>,
    target: &Target<'_>,
) -> Result<Node<'a, 'input>> {
    match target {
        Target::Id(id) => id_map
            .get(*id)
            .and_then(|node_id| doc.get_node(*node_id))
            .ok_or_else(|| Error::InvalidUri(format!("cannot resolve #{id}"))),
        Target::Element { ns: ns_uri, local } => find_element(doc, ns_uri, local)
            .ok_or_else(|| Error::InvalidData(format!("encryption target {local} not found"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use vaxholm_keys::{KeyData, KeyUsage};

    const AES128_TEMPLATE: &str = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
  <CipherData><CipherValue/></CipherData>
</EncryptedData>"#;

    fn aes_key(bytes: &[u8]) -> Key {
        Key::new(KeyData::Aes(bytes.to_vec()), KeyUsage::Any)
    }

    fn cipher_value_text(xml: &str) -> String {
        let doc = parse(xml).unwrap();
        let cv = find_element(&doc, ns::ENC, ns::node::CIPHER_VALUE).unwrap();
        collect_text(cv)
    }

    // ── Binary encrypt / decrypt (AES-128-CBC) ───────────────────────

    #[test]
    fn test_binary_encrypt_roundtrip() {
        let keys = KeysManager::new();
        let key = aes_key(&[0u8; 16]);

        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(key.clone());
        let encrypted = ctx.binary_encrypt(AES128_TEMPLATE, b"Hello, World!").unwrap();

        let cv = cipher_value_text(&encrypted);
        assert!(!cv.trim().is_empty(), "CipherValue must be populated");
        // base64 of IV ∥ ciphertext: 16 + 16 bytes for a 13-byte message
        let raw = base64::engine::general_purpose::STANDARD
            .decode(cv.trim())
            .unwrap();
        assert_eq!(raw.len(), 32);
        assert!(ctx.replaced);
        assert!(ctx.result_base64_encoded);

        let mut dctx = XmlEncCtx::new(&keys);
        dctx.set_key(key);
        let plaintext = dctx.decrypt_to_buffer(&encrypted).unwrap();
        assert_eq!(plaintext, b"Hello, World!");
    }

    #[test]
    fn test_base64_encoder_appended_for_cipher_value_sink() {
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[0u8; 16]));
        ctx.binary_encrypt(AES128_TEMPLATE, b"payload").unwrap();

        let tail = ctx.chain().last().unwrap();
        assert_eq!(tail.href(), algorithm::BASE64);
        assert!(tail.encode());

        let method = ctx.enc_method().unwrap();
        assert_eq!(method.href(), algorithm::AES128_CBC);
        assert_eq!(ctx.enc_method_origin(), Some(EncMethodOrigin::FromTemplate));
    }

    #[test]
    fn test_preset_method_is_caller_supplied() {
        // template without an EncryptionMethod element; the caller
        // supplies the cipher directly
        let template = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <CipherData><CipherValue/></CipherData>
</EncryptedData>"#;
        let keys = KeysManager::new();
        let key = aes_key(&[6u8; 16]);

        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_enc_method(Box::new(
            vaxholm_crypto::CipherStage::from_uri(algorithm::AES128_CBC).unwrap(),
        ));
        ctx.set_key(key.clone());
        let encrypted = ctx.binary_encrypt(template, b"preset method").unwrap();
        assert_eq!(
            ctx.enc_method_origin(),
            Some(EncMethodOrigin::CallerSupplied)
        );

        let mut dctx = XmlEncCtx::new(&keys);
        dctx.set_enc_method(Box::new(
            vaxholm_crypto::CipherStage::from_uri(algorithm::AES128_CBC).unwrap(),
        ));
        dctx.set_key(key);
        let plaintext = dctx.decrypt_to_buffer(&encrypted).unwrap();
        assert_eq!(plaintext, b"preset method");
    }

    #[test]
    fn test_no_base64_encoder_without_cipher_value() {
        // empty CipherData: the result is returned as raw octets
        let template = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
  <CipherData/>
</EncryptedData>"#;
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[0u8; 16]));
        ctx.binary_encrypt(template, b"payload").unwrap();

        assert!(!ctx.result_base64_encoded);
        let tail = ctx.chain().last().unwrap();
        assert_ne!(tail.href(), algorithm::BASE64);
        // raw ciphertext: IV plus one padded block
        assert_eq!(ctx.result().unwrap().len(), 32);
    }

    #[test]
    fn test_single_use_context() {
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[0u8; 16]));
        ctx.binary_encrypt(AES128_TEMPLATE, b"one").unwrap();

        let err = ctx.binary_encrypt(AES128_TEMPLATE, b"two").unwrap_err();
        assert!(matches!(err, Error::InvalidStatus { .. }));
    }

    #[test]
    fn test_key_mismatch_is_key_not_found() {
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        // 3DES key against an AES cipher
        ctx.set_key(Key::new(KeyData::Des3(vec![0u8; 24]), KeyUsage::Any));
        let err = ctx.binary_encrypt(AES128_TEMPLATE, b"data").unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
        assert!(ctx.result().is_none(), "no bytes may reach the cipher");
    }

    #[test]
    fn test_missing_key_is_key_not_found() {
        // RSA-OAEP method, no preset key, key manager resolves nothing
        let template = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p"/>
  <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
    <ds:KeyName>unknown</ds:KeyName>
  </ds:KeyInfo>
  <CipherData><CipherValue/></CipherData>
</EncryptedData>"#;
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        let err = ctx.binary_encrypt(template, b"data").unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
        assert!(ctx.result().is_none());
    }

    #[test]
    fn test_missing_cipher_data_is_invalid_node() {
        let template = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
</EncryptedData>"#;
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[0u8; 16]));
        let err = ctx.binary_encrypt(template, b"data").unwrap_err();
        match err {
            Error::InvalidNode { expected, .. } => assert_eq!(expected, "CipherData"),
            other => panic!("expected InvalidNode, got {other:?}"),
        }
    }

    #[test]
    fn test_trailing_sibling_is_unexpected_node() {
        let template = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
  <CipherData><CipherValue/></CipherData>
  <Bogus/>
</EncryptedData>"#;
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[0u8; 16]));
        let err = ctx.binary_encrypt(template, b"data").unwrap_err();
        assert!(matches!(err, Error::UnexpectedNode(name) if name == "Bogus"));
    }

    #[test]
    fn test_missing_encryption_method_is_invalid_data() {
        let template = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <CipherData><CipherValue/></CipherData>
</EncryptedData>"#;
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[0u8; 16]));
        let err = ctx.binary_encrypt(template, b"data").unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    // ── XML element / content encryption ─────────────────────────────

    const SOURCE_DOC: &str = "<root><secret>42</secret></root>";

    fn element_template(cipher: &str) -> String {
        format!(
            r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#"
    Type="http://www.w3.org/2001/04/xmlenc#Element">
  <EncryptionMethod Algorithm="{cipher}"/>
  <CipherData><CipherValue/></CipherData>
</EncryptedData>"#
        )
    }

    #[test]
    fn test_element_encrypt_decrypt_roundtrip() {
        let keys = KeysManager::new();
        let key = aes_key(&[7u8; 32]);
        let template = element_template(algorithm::AES256_CBC);

        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(key.clone());
        let encrypted = ctx
            .xml_encrypt(
                &template,
                SOURCE_DOC,
                Target::Element {
                    ns: "",
                    local: "secret",
                },
            )
            .unwrap();
        assert!(ctx.replaced);
        assert!(encrypted.contains("<EncryptedData"));
        assert!(!encrypted.contains("<secret>"));
        assert!(encrypted.starts_with("<root>"));

        let mut dctx = XmlEncCtx::new(&keys);
        dctx.set_key(key);
        let restored = dctx.decrypt(&encrypted).unwrap();
        assert_eq!(String::from_utf8(restored).unwrap(), SOURCE_DOC);
        assert!(dctx.replaced);
    }

    #[test]
    fn test_content_encrypt_keeps_enclosing_tag() {
        let template = format!(
            r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#"
    Type="http://www.w3.org/2001/04/xmlenc#Content">
  <EncryptionMethod Algorithm="{}"/>
  <CipherData><CipherValue/></CipherData>
</EncryptedData>"#,
            algorithm::AES128_CBC
        );
        let keys = KeysManager::new();
        let key = aes_key(&[3u8; 16]);

        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(key.clone());
        let encrypted = ctx
            .xml_encrypt(
                &template,
                SOURCE_DOC,
                Target::Element {
                    ns: "",
                    local: "root",
                },
            )
            .unwrap();

        // <root> keeps its tag; its content is exactly one EncryptedData
        let doc = parse(&encrypted).unwrap();
        let root = doc.root_element();
        assert_eq!(root.tag_name().name(), "root");
        let children: Vec<_> = root.children().filter(|n| n.is_element()).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].tag_name().name(), "EncryptedData");

        let mut dctx = XmlEncCtx::new(&keys);
        dctx.set_key(key);
        let restored = dctx.decrypt(&encrypted).unwrap();
        assert_eq!(String::from_utf8(restored).unwrap(), SOURCE_DOC);
    }

    #[test]
    fn test_xml_encrypt_unknown_type_is_invalid_type() {
        let template = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#"
    Type="http://example.com/unknown">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
  <CipherData><CipherValue/></CipherData>
</EncryptedData>"#;
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[0u8; 16]));
        let err = ctx
            .xml_encrypt(
                template,
                SOURCE_DOC,
                Target::Element {
                    ns: "",
                    local: "secret",
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidType(_)));
    }

    #[test]
    fn test_xml_encrypt_by_id_target() {
        let doc_with_id = r#"<root><secret Id="s1">42</secret></root>"#;
        let keys = KeysManager::new();
        let key = aes_key(&[9u8; 32]);
        let template = element_template(algorithm::AES256_CBC);

        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(key.clone());
        let encrypted = ctx
            .xml_encrypt(&template, doc_with_id, Target::Id("s1"))
            .unwrap();

        let mut dctx = XmlEncCtx::new(&keys);
        dctx.set_key(key);
        let restored = dctx.decrypt(&encrypted).unwrap();
        assert_eq!(String::from_utf8(restored).unwrap(), doc_with_id);
    }

    // ── URI encryption ───────────────────────────────────────────────

    #[test]
    fn test_uri_encrypt_same_document_fragment() {
        let template = r#"<wrapper>
  <data Id="d">payload text</data>
  <EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
    <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
    <CipherData><CipherValue/></CipherData>
  </EncryptedData>
</wrapper>"#;
        let keys = KeysManager::new();
        let key = aes_key(&[5u8; 16]);

        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(key.clone());
        let encrypted = ctx.uri_encrypt(template, "#d").unwrap();
        assert!(!cipher_value_text(&encrypted).trim().is_empty());

        let mut dctx = XmlEncCtx::new(&keys);
        dctx.set_key(key);
        let plaintext = dctx.decrypt_to_buffer(&encrypted).unwrap();
        assert_eq!(plaintext, br#"<data Id="d">payload text</data>"#);
    }

    #[test]
    fn test_uri_encrypt_external_uri_rejected() {
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[5u8; 16]));
        let err = ctx
            .uri_encrypt(AES128_TEMPLATE, "http://example.com/doc.xml")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUri(_)));
    }

    // ── CipherReference ──────────────────────────────────────────────

    #[test]
    fn test_cipher_reference_decrypt_with_base64_transform() {
        let key_bytes = [0x21u8; 16];
        let cipher = vaxholm_crypto::cipher::from_uri(algorithm::AES128_CBC).unwrap();
        let ciphertext = cipher.encrypt(&key_bytes, b"referenced secret").unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(&ciphertext);

        let document = format!(
            r##"<root>
  <EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
    <EncryptionMethod Algorithm="{alg}"/>
    <CipherData>
      <CipherReference URI="#ct">
        <Transforms>
          <ds:Transform xmlns:ds="http://www.w3.org/2000/09/xmldsig#"
              Algorithm="http://www.w3.org/2000/09/xmldsig#base64"/>
        </Transforms>
      </CipherReference>
    </CipherData>
  </EncryptedData>
  <stored Id="ct">{b64}</stored>
</root>"##,
            alg = algorithm::AES128_CBC,
        );

        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&key_bytes));
        let plaintext = ctx.decrypt_to_buffer(&document).unwrap();
        assert_eq!(plaintext, b"referenced secret");
    }

    #[test]
    fn test_cipher_reference_on_encrypt_is_invalid_data() {
        let template = r##"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
  <CipherData><CipherReference URI="#x"/></CipherData>
</EncryptedData>"##;
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[0u8; 16]));
        let err = ctx.binary_encrypt(template, b"data").unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    // ── Key info ─────────────────────────────────────────────────────

    #[test]
    fn test_key_resolution_by_key_name() {
        let template = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
  <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
    <ds:KeyName>data-key</ds:KeyName>
  </ds:KeyInfo>
  <CipherData><CipherValue/></CipherData>
</EncryptedData>"#;
        let mut keys = KeysManager::new();
        keys.add_key(aes_key(&[0xAAu8; 16]).with_name("data-key"));

        let mut ctx = XmlEncCtx::new(&keys);
        let encrypted = ctx.binary_encrypt(template, b"named key data").unwrap();

        let mut dctx = XmlEncCtx::new(&keys);
        let plaintext = dctx.decrypt_to_buffer(&encrypted).unwrap();
        assert_eq!(plaintext, b"named key data");
    }

    #[test]
    fn test_key_name_written_on_encrypt() {
        let template = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
  <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
    <ds:KeyName/>
  </ds:KeyInfo>
  <CipherData><CipherValue/></CipherData>
</EncryptedData>"#;
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[1u8; 16]).with_name("written-key"));
        let encrypted = ctx.binary_encrypt(template, b"data").unwrap();
        assert!(encrypted.contains("<ds:KeyName>written-key</ds:KeyName>"));
    }

    #[test]
    fn test_encrypted_key_session_key_roundtrip() {
        // the data cipher runs on a generated session key, wrapped with
        // AES-KW into the EncryptedKey template
        let template = r#"<EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
  <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
    <EncryptedKey>
      <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#kw-aes128"/>
      <ds:KeyInfo><ds:KeyName>kek</ds:KeyName></ds:KeyInfo>
      <CipherData><CipherValue/></CipherData>
    </EncryptedKey>
  </ds:KeyInfo>
  <CipherData><CipherValue/></CipherData>
</EncryptedData>"#;
        let mut keys = KeysManager::new();
        keys.add_key(aes_key(&[0x42u8; 16]).with_name("kek"));

        let mut ctx = XmlEncCtx::new(&keys);
        let encrypted = ctx
            .binary_encrypt(template, b"session key protected data")
            .unwrap();

        // both CipherValues are filled
        let doc = parse(&encrypted).unwrap();
        let values: Vec<_> = doc
            .descendants()
            .filter(|n| is_element_named(*n, ns::ENC, ns::node::CIPHER_VALUE))
            .map(collect_text)
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values.iter().all(|v| !v.trim().is_empty()));

        // decryption unwraps the session key through the nested context
        let mut dctx = XmlEncCtx::new(&keys);
        let plaintext = dctx.decrypt_to_buffer(&encrypted).unwrap();
        assert_eq!(plaintext, b"session key protected data");
    }

    #[test]
    fn test_encrypted_key_mode_attributes() {
        let kek = [0x42u8; 16];
        let session = [0x17u8; 16];
        let kw = vaxholm_crypto::keywrap::from_uri(algorithm::KW_AES128).unwrap();
        let wrapped = kw.wrap(&kek, &session).unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(&wrapped);

        let document = format!(
            r#"<EncryptedKey xmlns="http://www.w3.org/2001/04/xmlenc#" Recipient="backup-service">
  <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#kw-aes128"/>
  <CipherData><CipherValue>{b64}</CipherValue></CipherData>
  <CarriedKeyName>payload key</CarriedKeyName>
</EncryptedKey>"#
        );

        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new_with_mode(&keys, EncCtxMode::EncryptedKey);
        ctx.set_key(aes_key(&kek));
        let unwrapped = ctx.decrypt_to_buffer(&document).unwrap();
        assert_eq!(unwrapped, session);
        assert_eq!(ctx.recipient.as_deref(), Some("backup-service"));
        assert_eq!(ctx.carried_key_name.as_deref(), Some("payload key"));
    }

    #[test]
    fn test_empty_cipher_value_on_decrypt() {
        let keys = KeysManager::new();
        let mut ctx = XmlEncCtx::new(&keys);
        ctx.set_key(aes_key(&[0u8; 16]));
        let err = ctx.decrypt_to_buffer(AES128_TEMPLATE).unwrap_err();
        assert!(matches!(err, Error::InvalidNodeContent(_)));
    }
}
