#![forbid(unsafe_code)]

//! Key types and key management for the Vaxholm XML Encryption library.

pub mod key;
pub mod manager;
pub mod req;

pub use key::{Key, KeyData, KeyUsage};
pub use manager::KeysManager;
pub use req::{KeyKind, KeyReq};
