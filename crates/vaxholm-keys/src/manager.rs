#![forbid(unsafe_code)]

//! Key manager with named key store.

use crate::key::Key;
use crate::req::KeyReq;
use vaxholm_core::{Error, Result};

/// Manages a collection of keys for lookup during encryption processing.
///
/// This is the `getKey` hook of the engine: when no key is preset on an
/// encryption context, the context asks the manager to find one that
/// satisfies the cipher's requirements.
#[derive(Default)]
pub struct KeysManager {
    keys: Vec<Key>,
}

impl KeysManager {
    /// Create an empty keys manager.
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Add a key to the manager.
    pub fn add_key(&mut self, key: Key) {
        self.keys.push(key);
    }

    /// Find a key by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.name.as_deref() == Some(name))
    }

    /// Find a key by name that also satisfies the given requirement.
    pub fn find_by_name_matching(&self, name: &str, req: &KeyReq) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| k.name.as_deref() == Some(name) && req.matches(k))
    }

    /// Find the first key satisfying the given requirement.
    pub fn find_matching(&self, req: &KeyReq) -> Option<&Key> {
        self.keys.iter().find(|k| req.matches(k))
    }

    /// Find the first key that has an RSA key pair.
    pub fn find_rsa(&self) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| matches!(&k.data, crate::key::KeyData::Rsa { .. }))
    }

    /// Find an AES key with the specified byte length.
    pub fn find_aes_by_size(&self, size_bytes: usize) -> Option<&Key> {
        self.keys.iter().find(|k| {
            if let crate::key::KeyData::Aes(ref bytes) = k.data {
                bytes.len() == size_bytes
            } else {
                false
            }
        })
    }

    /// Find the first AES key.
    pub fn find_aes(&self) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| matches!(&k.data, crate::key::KeyData::Aes(_)))
    }

    /// Find the first 3DES key.
    pub fn find_des3(&self) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| matches!(&k.data, crate::key::KeyData::Des3(_)))
    }

    /// Get the first key available (for simple single-key scenarios).
    pub fn first_key(&self) -> Result<&Key> {
        self.keys
            .first()
            .ok_or_else(|| Error::KeyNotFound("no keys in manager".into()))
    }

    /// Iterator over all keys.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyData, KeyUsage};
    use crate::req::KeyKind;

    #[test]
    fn test_find_by_name() {
        let mut mgr = KeysManager::new();
        mgr.add_key(Key::new(KeyData::Aes(vec![0u8; 16]), KeyUsage::Any).with_name("alpha"));
        mgr.add_key(Key::new(KeyData::Aes(vec![1u8; 32]), KeyUsage::Any).with_name("beta"));

        assert!(mgr.find_by_name("alpha").is_some());
        assert!(mgr.find_by_name("gamma").is_none());
    }

    #[test]
    fn test_find_matching_respects_requirements() {
        let mut mgr = KeysManager::new();
        mgr.add_key(Key::new(KeyData::Des3(vec![0u8; 24]), KeyUsage::Any));
        mgr.add_key(Key::new(KeyData::Aes(vec![0u8; 32]), KeyUsage::Any));

        let req = KeyReq {
            kind: Some(KeyKind::Aes),
            bits: 256,
            usage: KeyUsage::Any,
        };
        let found = mgr.find_matching(&req).unwrap();
        assert!(matches!(found.data, KeyData::Aes(_)));
    }

    #[test]
    fn test_first_key_empty_manager() {
        let mgr = KeysManager::new();
        assert!(mgr.first_key().is_err());
    }
}
