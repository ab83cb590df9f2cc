#![forbid(unsafe_code)]

//! Key-info read and write paths.
//!
//! Reading resolves the decryption/encryption key from a `ds:KeyInfo`
//! element: `KeyName` lookups against the key store and nested
//! `EncryptedKey` unwrapping through a subordinate context in
//! EncryptedKey mode.  Writing fills empty `KeyName` elements and wraps
//! the session key into empty `EncryptedKey` templates.

use crate::context::{EncCtxMode, XmlEncCtx};
use crate::splice::{self, Edit};
use roxmltree::{Document, Node, NodeId};
use std::collections::HashMap;
use vaxholm_core::{ns, Error, Result};
use vaxholm_keys::{Key, KeyData, KeyKind, KeyReq, KeyUsage, KeysManager};
use vaxholm_transforms::Stage;
use vaxholm_xml::{collect_text, find_child_element, is_element_named};

/// Resolve a key for the given requirement from a `KeyInfo` element.
///
/// Children are examined in document order: a `KeyName` is looked up in
/// the store; an `EncryptedKey` either triggers session-key generation
/// (encrypting) or is unwrapped with a nested context (decrypting).
/// Falls back to the first store key satisfying the requirement.
#[allow(clippy::too_many_arguments)]
pub(crate) fn read_key(
    xml: &str,
    doc: &Document<'_>,
    key_info: Node<'_, '_>,
    id_map: &HashMap<String, NodeId>,
    req: &KeyReq,
    encrypt: bool,
    keys: &KeysManager,
    id_attrs: &[String],
) -> Result<Option<Key>> {
    let mut last_err = None;
    for child in key_info.children().filter(|n| n.is_element()) {
        if is_element_named(child, ns::DSIG, ns::node::KEY_NAME) {
            let name = collect_text(child);
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if let Some(key) = keys.find_by_name_matching(name, req) {
                tracing::debug!(name, "key resolved by name");
                return Ok(Some(key.clone()));
            }
        } else if is_element_named(child, ns::ENC, ns::node::ENCRYPTED_KEY) {
            if encrypt {
                // a template EncryptedKey means the data cipher runs on a
                // fresh session key, wrapped into the template afterwards
                tracing::debug!("generating session key for EncryptedKey template");
                return generate_session_key(req).map(Some);
            }
            let mut nested = XmlEncCtx::new_with_mode(keys, EncCtxMode::EncryptedKey);
            for attr in id_attrs {
                nested.add_id_attr(attr);
            }
            match nested.decrypt_node(xml, doc, child, id_map) {
                Ok(bytes) => {
                    tracing::debug!(bytes = bytes.len(), "session key unwrapped");
                    return key_from_bytes(req, bytes).map(Some);
                }
                Err(e) => last_err = Some(e),
            }
        }
    }
    if let Some(e) = last_err {
        return Err(e);
    }
    Ok(keys.find_matching(req).cloned())
}

/// Generate a random session key satisfying the requirement.
fn generate_session_key(req: &KeyReq) -> Result<Key> {
    use rand::RngCore;
    let len = if req.bits > 0 { req.bits / 8 } else { 32 };
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    Ok(Key::new(wrap_key_data(req, bytes)?, KeyUsage::Any))
}

/// Turn raw unwrapped bytes into a key of the required kind.
fn key_from_bytes(req: &KeyReq, bytes: Vec<u8>) -> Result<Key> {
    Ok(Key::new(wrap_key_data(req, bytes)?, KeyUsage::Any))
}

/// Raw octets can only back a symmetric key.  An asymmetric requirement
/// here means the template asks for something that cannot exist (a
/// generated or unwrapped RSA keypair), so fail where the cause is
/// visible.
fn wrap_key_data(req: &KeyReq, bytes: Vec<u8>) -> Result<KeyData> {
    match req.kind {
        Some(KeyKind::Rsa) => Err(Error::EngineFailed(
            "cannot build an RSA key from raw session-key bytes".into(),
        )),
        Some(KeyKind::Des3) => Ok(KeyData::Des3(bytes)),
        Some(KeyKind::Hmac) => Ok(KeyData::Hmac(bytes)),
        _ => Ok(KeyData::Aes(bytes)),
    }
}

/// Write the resolved key back into a `KeyInfo` element: fill empty
/// `KeyName` children with the key's name and wrap the session key into
/// empty `EncryptedKey` templates.
pub(crate) fn write(
    xml: &str,
    doc: &Document<'_>,
    key_info: Node<'_, '_>,
    enc_key: &Key,
    keys: &KeysManager,
    id_attrs: &[String],
    edits: &mut Vec<Edit>,
) -> Result<()> {
    for child in key_info.children().filter(|n| n.is_element()) {
        if is_element_named(child, ns::DSIG, ns::node::KEY_NAME) {
            if collect_text(child).trim().is_empty() {
                if let Some(name) = &enc_key.name {
                    edits.push(splice::fill_element_text(xml, child, name));
                }
            }
        } else if is_element_named(child, ns::ENC, ns::node::ENCRYPTED_KEY) {
            write_encrypted_key(xml, doc, child, enc_key, keys, id_attrs, edits)?;
        }
    }
    Ok(())
}

/// Wrap the session key into an `EncryptedKey` template whose
/// `CipherValue` is still empty.
fn write_encrypted_key(
    xml: &str,
    doc: &Document<'_>,
    enc_key_node: Node<'_, '_>,
    session_key: &Key,
    keys: &KeysManager,
    id_attrs: &[String],
    edits: &mut Vec<Edit>,
) -> Result<()> {
    let Some(cipher_data) = find_child_element(enc_key_node, ns::ENC, ns::node::CIPHER_DATA)
    else {
        return Ok(());
    };
    let Some(cipher_value) = find_child_element(cipher_data, ns::ENC, ns::node::CIPHER_VALUE)
    else {
        return Ok(());
    };
    if !collect_text(cipher_value).trim().is_empty() {
        return Ok(()); // already filled
    }

    let session_bytes = session_key
        .symmetric_key_bytes()
        .ok_or_else(|| Error::InvalidData("session key is not symmetric".into()))?
        .to_vec();

    let method_node = find_child_element(enc_key_node, ns::ENC, ns::node::ENCRYPTION_METHOD)
        .ok_or_else(|| Error::invalid_node(ns::node::ENCRYPTION_METHOD, None))?;
    let href = method_node
        .attribute(ns::attr::ALGORITHM)
        .ok_or_else(|| Error::invalid_node("EncryptionMethod with Algorithm attribute", None))?;

    let kek = resolve_kek(enc_key_node, href, keys)?;

    let mut nested = XmlEncCtx::new_with_mode(keys, EncCtxMode::EncryptedKey);
    for attr in id_attrs {
        nested.add_id_attr(attr);
    }
    nested.set_key(kek);

    let id_map = vaxholm_xml::build_id_map(doc, id_attrs);
    let (cv_id, wrapped_b64) =
        nested.encrypt_binary_node(xml, doc, enc_key_node, &id_map, &session_bytes)?;
    let cv_node = doc
        .get_node(cv_id)
        .ok_or_else(|| Error::EngineFailed("CipherValue node vanished".into()))?;
    let text = String::from_utf8(wrapped_b64)
        .map_err(|_| Error::EngineFailed("wrapped key is not base64 text".into()))?;
    edits.push(splice::fill_element_text(xml, cv_node, &text));
    Ok(())
}

/// Resolve the key-encryption key for an `EncryptedKey` template.
///
/// Uses the same lookup chain as `read_key`: the method's declared key
/// requirement filters a `KeyInfo/KeyName` lookup first, then the first
/// store key satisfying the requirement.
fn resolve_kek(enc_key_node: Node<'_, '_>, href: &str, keys: &KeysManager) -> Result<Key> {
    let stage = vaxholm_crypto::CipherStage::from_uri(href)?;
    let mut req = KeyReq::default();
    stage.set_key_req(true, &mut req)?;

    if let Some(ki) = find_child_element(enc_key_node, ns::DSIG, ns::node::KEY_INFO) {
        if let Some(key_name) = find_child_element(ki, ns::DSIG, ns::node::KEY_NAME) {
            let name = collect_text(key_name);
            let name = name.trim();
            if !name.is_empty() {
                if let Some(key) = keys.find_by_name_matching(name, &req) {
                    return Ok(key.clone());
                }
            }
        }
    }
    keys.find_matching(&req)
        .cloned()
        .ok_or_else(|| Error::KeyNotFound(format!("no key-encryption key for {href}")))
}
