#![forbid(unsafe_code)]

//! Core definitions for the Vaxholm XML Encryption library.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, Result};
