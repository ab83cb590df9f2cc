#![forbid(unsafe_code)]

//! The cipher stage: plugs a block cipher, key wrap or key transport
//! algorithm into a transform chain as an `EncryptionMethod`.
//!
//! Like the XSLT stage this is a single-shot transform: CBC padding and
//! RSA transport need the whole message, so input is buffered until the
//! end-of-input signal.

use crate::cipher::{self, CipherAlgorithm};
use crate::keytransport::{self, KeyTransportAlgorithm};
use crate::keywrap::{self, KeyWrapAlgorithm};
use vaxholm_core::{algorithm, Error, Result};
use vaxholm_keys::{Key, KeyKind, KeyReq, KeyUsage};
use vaxholm_transforms::{
    Stage, TransformRegistry, TransformState, TransformStatus, TransformUsage,
};

enum EncAlgorithm {
    Block(Box<dyn CipherAlgorithm>),
    KeyWrap(Box<dyn KeyWrapAlgorithm>),
    Transport(Box<dyn KeyTransportAlgorithm>),
}

enum StageKey {
    Symmetric(Vec<u8>),
    RsaPublic(rsa::RsaPublicKey),
    RsaPrivate(rsa::RsaPrivateKey),
}

/// A chain stage wrapping an encryption algorithm.
pub struct CipherStage {
    name: &'static str,
    method: EncAlgorithm,
    key: Option<StageKey>,
}

/// All encryption-method URIs this crate provides.
pub const ENCRYPTION_METHOD_URIS: &[&str] = &[
    algorithm::AES128_CBC,
    algorithm::AES192_CBC,
    algorithm::AES256_CBC,
    algorithm::AES128_GCM,
    algorithm::AES192_GCM,
    algorithm::AES256_GCM,
    algorithm::TRIPLEDES_CBC,
    algorithm::KW_AES128,
    algorithm::KW_AES192,
    algorithm::KW_AES256,
    algorithm::KW_TRIPLEDES,
    algorithm::RSA_PKCS1,
    algorithm::RSA_OAEP,
    algorithm::RSA_OAEP_ENC11,
];

impl CipherStage {
    /// Create a cipher stage from an algorithm URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let method = match uri {
            algorithm::AES128_CBC
            | algorithm::AES192_CBC
            | algorithm::AES256_CBC
            | algorithm::AES128_GCM
            | algorithm::AES192_GCM
            | algorithm::AES256_GCM
            | algorithm::TRIPLEDES_CBC => EncAlgorithm::Block(cipher::from_uri(uri)?),
            algorithm::KW_AES128
            | algorithm::KW_AES192
            | algorithm::KW_AES256
            | algorithm::KW_TRIPLEDES => EncAlgorithm::KeyWrap(keywrap::from_uri(uri)?),
            algorithm::RSA_PKCS1 | algorithm::RSA_OAEP | algorithm::RSA_OAEP_ENC11 => {
                EncAlgorithm::Transport(keytransport::from_uri(uri)?)
            }
            _ => {
                return Err(Error::UnsupportedAlgorithm(format!(
                    "encryption method: {uri}"
                )))
            }
        };
        let name = match method {
            EncAlgorithm::Block(_) => "cipher",
            EncAlgorithm::KeyWrap(_) => "key-wrap",
            EncAlgorithm::Transport(_) => "key-transport",
        };
        Ok(Self {
            name,
            method,
            key: None,
        })
    }

    fn symmetric_key_size(&self) -> usize {
        match &self.method {
            EncAlgorithm::Block(c) => c.key_size(),
            EncAlgorithm::KeyWrap(kw) => kw.kek_size(),
            EncAlgorithm::Transport(_) => 0,
        }
    }

    fn required_kind(&self) -> KeyKind {
        match &self.method {
            EncAlgorithm::Transport(_) => KeyKind::Rsa,
            EncAlgorithm::Block(c) if c.href() == algorithm::TRIPLEDES_CBC => KeyKind::Des3,
            EncAlgorithm::KeyWrap(kw) if kw.href() == algorithm::KW_TRIPLEDES => KeyKind::Des3,
            _ => KeyKind::Aes,
        }
    }
}

impl Stage for CipherStage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn href(&self) -> &str {
        match &self.method {
            EncAlgorithm::Block(c) => c.href(),
            EncAlgorithm::KeyWrap(kw) => kw.href(),
            EncAlgorithm::Transport(t) => t.href(),
        }
    }

    fn usage(&self) -> TransformUsage {
        TransformUsage::ENCRYPTION_METHOD
    }

    fn set_key_req(&self, encode: bool, req: &mut KeyReq) -> Result<()> {
        req.kind = Some(self.required_kind());
        req.bits = self.symmetric_key_size() * 8;
        req.usage = if encode {
            KeyUsage::Encrypt
        } else {
            KeyUsage::Decrypt
        };
        Ok(())
    }

    fn set_key(&mut self, key: &Key, encode: bool) -> Result<()> {
        match &self.method {
            EncAlgorithm::Transport(_) => {
                if encode {
                    let public = key.rsa_public_key().ok_or_else(|| {
                        Error::KeyNotFound("RSA public key required for key transport".into())
                    })?;
                    self.key = Some(StageKey::RsaPublic(public.clone()));
                } else {
                    let private = key.rsa_private_key().ok_or_else(|| {
                        Error::KeyNotFound("RSA private key required for key transport".into())
                    })?;
                    self.key = Some(StageKey::RsaPrivate(private.clone()));
                }
            }
            _ => {
                let bytes = key.symmetric_key_bytes().ok_or_else(|| {
                    Error::KeyNotFound(format!("symmetric key required for {}", self.href()))
                })?;
                let size = self.symmetric_key_size();
                if bytes.len() < size {
                    return Err(Error::KeyNotFound(format!(
                        "key too short for {}: {} bytes",
                        self.href(),
                        bytes.len()
                    )));
                }
                // a longer key than required is truncated
                self.key = Some(StageKey::Symmetric(bytes[..size].to_vec()));
            }
        }
        Ok(())
    }

    fn execute(&mut self, state: &mut TransformState, last: bool) -> Result<()> {
        if !state.gate_single_shot(self.name, last)? {
            return Ok(());
        }
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::EngineFailed(format!("{}: no key installed", self.name)))?;

        let input = state.in_buf.data();
        let output = match (&self.method, key, state.encode) {
            (EncAlgorithm::Block(c), StageKey::Symmetric(k), true) => c.encrypt(k, input)?,
            (EncAlgorithm::Block(c), StageKey::Symmetric(k), false) => c.decrypt(k, input)?,
            (EncAlgorithm::KeyWrap(kw), StageKey::Symmetric(k), true) => kw.wrap(k, input)?,
            (EncAlgorithm::KeyWrap(kw), StageKey::Symmetric(k), false) => kw.unwrap(k, input)?,
            (EncAlgorithm::Transport(t), StageKey::RsaPublic(pk), true) => {
                t.encrypt(pk, input)?
            }
            (EncAlgorithm::Transport(t), StageKey::RsaPrivate(sk), false) => {
                t.decrypt(sk, input)?
            }
            _ => {
                return Err(Error::EngineFailed(format!(
                    "{}: key does not match direction",
                    self.name
                )))
            }
        };

        state.out_buf.append(&output);
        let consumed = state.in_buf.len();
        state.in_buf.remove_head(consumed);
        state.status = TransformStatus::Finished;
        Ok(())
    }
}

/// Register all encryption methods of this crate in a transform registry.
pub fn register(registry: &mut TransformRegistry) {
    for &uri in ENCRYPTION_METHOD_URIS {
        registry.register(uri, TransformUsage::ENCRYPTION_METHOD, move || {
            CipherStage::from_uri(uri).map(|stage| Box::new(stage) as Box<dyn Stage>)
        });
    }
}
