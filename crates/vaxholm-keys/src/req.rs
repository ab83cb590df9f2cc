#![forbid(unsafe_code)]

//! Key requirements declared by encryption methods.
//!
//! Before a key is installed on a cipher transform, the transform declares
//! what it needs (kind, size, usage) and the resolved key is checked
//! against that requirement.

use crate::key::{Key, KeyData, KeyUsage};

/// The kind of key material an encryption method requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Aes,
    Des3,
    Hmac,
    Rsa,
}

/// Requirements a resolved key must satisfy.
#[derive(Debug, Clone)]
pub struct KeyReq {
    /// Required key kind, if any.
    pub kind: Option<KeyKind>,
    /// Minimum key size in bits (0 = no size requirement).
    pub bits: usize,
    /// Required usage.
    pub usage: KeyUsage,
}

impl Default for KeyReq {
    fn default() -> Self {
        Self {
            kind: None,
            bits: 0,
            usage: KeyUsage::Any,
        }
    }
}

impl KeyReq {
    /// Check whether a key satisfies this requirement.
    pub fn matches(&self, key: &Key) -> bool {
        if let Some(kind) = self.kind {
            let key_kind = match &key.data {
                KeyData::Aes(_) => KeyKind::Aes,
                KeyData::Des3(_) => KeyKind::Des3,
                KeyData::Hmac(_) => KeyKind::Hmac,
                KeyData::Rsa { .. } => KeyKind::Rsa,
            };
            if key_kind != kind {
                return false;
            }
        }
        if self.bits > 0 {
            if let Some(bytes) = key.symmetric_key_bytes() {
                if bytes.len() * 8 < self.bits {
                    return false;
                }
            }
        }
        match (self.usage, key.usage) {
            (_, KeyUsage::Any) | (KeyUsage::Any, _) => true,
            (a, b) => a == b,
        }
    }
}
