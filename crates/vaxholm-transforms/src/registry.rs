#![forbid(unsafe_code)]

//! Registry of transform variants, keyed by algorithm URI.
//!
//! The engine instantiates transforms from `EncryptionMethod` and
//! `Transform` elements by looking up the `Algorithm` attribute here.
//! Collaborators register additional stages (canonicalization, XPath, …)
//! with [`TransformRegistry::register`].

use crate::base64_stage::Base64Stage;
use crate::transform::{Stage, TransformUsage};
use crate::xslt::XsltStage;
use vaxholm_core::{algorithm, Error, Result};

type StageFactory = Box<dyn Fn() -> Result<Box<dyn Stage>> + Send + Sync>;

struct Entry {
    href: &'static str,
    usage: TransformUsage,
    factory: StageFactory,
}

/// Maps algorithm URIs to stage constructors, with usage enforcement.
pub struct TransformRegistry {
    entries: Vec<Entry>,
}

impl TransformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// A registry with this crate's own stages (base64, XSLT) registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(algorithm::BASE64, TransformUsage::DSIG_TRANSFORM, || {
            Ok(Box::new(Base64Stage::new()))
        });
        registry.register(algorithm::XSLT, TransformUsage::DSIG_TRANSFORM, || {
            Ok(Box::new(XsltStage::new()))
        });
        registry
    }

    /// Register a stage factory for an algorithm URI.
    pub fn register<F>(&mut self, href: &'static str, usage: TransformUsage, factory: F)
    where
        F: Fn() -> Result<Box<dyn Stage>> + Send + Sync + 'static,
    {
        self.entries.push(Entry {
            href,
            usage,
            factory: Box::new(factory),
        });
    }

    /// Check whether an algorithm URI is registered.
    pub fn contains(&self, href: &str) -> bool {
        self.entries.iter().any(|e| e.href == href)
    }

    /// Instantiate a stage for the given URI, enforcing the usage mask.
    pub fn create(&self, href: &str, requested: TransformUsage) -> Result<Box<dyn Stage>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.href == href)
            .ok_or_else(|| Error::UnsupportedAlgorithm(href.to_owned()))?;
        if !entry.usage.allows(requested) {
            return Err(Error::InvalidData(format!(
                "transform {href} is not allowed in this position"
            )));
        }
        (entry.factory)()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = TransformRegistry::with_builtins();
        assert!(registry.contains(algorithm::BASE64));
        assert!(registry.contains(algorithm::XSLT));
        let stage = registry
            .create(algorithm::BASE64, TransformUsage::DSIG_TRANSFORM)
            .unwrap();
        assert_eq!(stage.name(), "base64");
    }

    #[test]
    fn test_unknown_href() {
        let registry = TransformRegistry::with_builtins();
        let err = registry
            .create("http://example.com/nope", TransformUsage::ANY)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_usage_enforcement() {
        let registry = TransformRegistry::with_builtins();
        // base64 is a dsig transform, not an encryption method
        let err = registry
            .create(algorithm::BASE64, TransformUsage::ENCRYPTION_METHOD)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }
}
