#![forbid(unsafe_code)]

//! Cryptographic algorithms for the Vaxholm XML Encryption library.
//!
//! Block ciphers, key wrap and key transport live behind traits with
//! `from_uri` factories; [`stage::CipherStage`] plugs any of them into a
//! transform chain as an `EncryptionMethod`.

pub mod cipher;
pub mod keytransport;
pub mod keywrap;
pub mod stage;

pub use stage::{register, CipherStage};
