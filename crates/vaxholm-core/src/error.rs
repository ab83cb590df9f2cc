#![forbid(unsafe_code)]

/// Errors produced by the Vaxholm XML Encryption library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlFailed(String),

    #[error("internal processing error: {0}")]
    EngineFailed(String),

    #[error("XSLT processing error: {0}")]
    XsltFailed(String),

    #[error("invalid node: expected {expected}, found {found}")]
    InvalidNode { expected: String, found: String },

    #[error("unexpected node: {0}")]
    UnexpectedNode(String),

    #[error("invalid content in node: {0}")]
    InvalidNodeContent(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid type: {0}")]
    InvalidType(String),

    #[error("invalid status in transform {transform}: {detail}")]
    InvalidStatus { transform: String, detail: String },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("invalid URI reference: {0}")]
    InvalidUri(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an [`Error::InvalidNode`] from the expected node name and
    /// whatever was actually found (`None` when the input ended early).
    pub fn invalid_node(expected: &str, found: Option<&str>) -> Self {
        Error::InvalidNode {
            expected: expected.to_owned(),
            found: found.unwrap_or("(none)").to_owned(),
        }
    }

    /// Build an [`Error::InvalidStatus`] naming the offending transform.
    pub fn invalid_status(transform: &str, detail: impl Into<String>) -> Self {
        Error::InvalidStatus {
            transform: transform.to_owned(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
