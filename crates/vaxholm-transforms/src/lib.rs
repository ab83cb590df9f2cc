#![forbid(unsafe_code)]

//! Transform chain engine for the Vaxholm XML Encryption library.
//!
//! A transform chain is an ordered pipeline of stages (source adapter,
//! cipher, base64 codec, XSLT, …) coupled by an octet stream.  Each stage
//! owns an input and an output buffer and steps through its own
//! None → Working → Finished state machine; the chain drives the byte
//! flow between them.

pub mod base64_stage;
pub mod buffer;
pub mod chain;
pub mod registry;
pub mod source;
pub mod stylesheet;
pub mod transform;
pub mod xslt;

pub use buffer::Buffer;
pub use chain::{OutputSink, TransformChain};
pub use registry::TransformRegistry;
pub use source::UriResolver;
pub use transform::{DataType, Stage, Transform, TransformState, TransformStatus, TransformUsage};
