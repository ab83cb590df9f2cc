#![forbid(unsafe_code)]

//! XML Encryption (XML-Enc) engine.
//!
//! Fills `EncryptedData`/`EncryptedKey` templates with ciphertext and
//! decrypts them back, per the W3C XML Encryption Recommendation.

pub mod context;
mod keyinfo;
mod splice;

pub use context::{EncCtxMode, EncMethodOrigin, Target, XmlEncCtx};

use vaxholm_transforms::TransformRegistry;

/// The registry used by encryption contexts: the transform-engine
/// builtins (base64, XSLT) plus every encryption method of the crypto
/// crate.
pub fn default_registry() -> TransformRegistry {
    let mut registry = TransformRegistry::with_builtins();
    vaxholm_crypto::register(&mut registry);
    registry
}
