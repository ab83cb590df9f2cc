#![forbid(unsafe_code)]

//! Key transport algorithms (RSA PKCS#1 v1.5, RSA-OAEP).
//!
//! One transport type covers all three URIs; the padding scheme is
//! chosen per call from the URI.  Both OAEP variants use SHA-1 for the
//! digest and mask generation, the interoperable default.

use vaxholm_core::{algorithm, Error, Result};

/// Trait for key transport algorithms.
pub trait KeyTransportAlgorithm: Send {
    fn href(&self) -> &'static str;
    fn encrypt(&self, public_key: &rsa::RsaPublicKey, key_data: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, private_key: &rsa::RsaPrivateKey, encrypted: &[u8]) -> Result<Vec<u8>>;
}

/// Create a key transport algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn KeyTransportAlgorithm>> {
    let uri = match uri {
        algorithm::RSA_PKCS1 => algorithm::RSA_PKCS1,
        algorithm::RSA_OAEP => algorithm::RSA_OAEP,
        algorithm::RSA_OAEP_ENC11 => algorithm::RSA_OAEP_ENC11,
        _ => return Err(Error::UnsupportedAlgorithm(format!("key transport: {uri}"))),
    };
    Ok(Box::new(RsaTransport { uri }))
}

struct RsaTransport {
    uri: &'static str,
}

impl RsaTransport {
    fn is_pkcs1(&self) -> bool {
        self.uri == algorithm::RSA_PKCS1
    }

    fn scheme(&self) -> &'static str {
        if self.is_pkcs1() {
            "RSA PKCS#1"
        } else {
            "RSA-OAEP"
        }
    }

    fn fail(&self, op: &str, e: rsa::Error) -> Error {
        Error::Crypto(format!("{} {op}: {e}", self.scheme()))
    }
}

impl KeyTransportAlgorithm for RsaTransport {
    fn href(&self) -> &'static str {
        self.uri
    }

    fn encrypt(&self, public_key: &rsa::RsaPublicKey, key_data: &[u8]) -> Result<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let wrapped = if self.is_pkcs1() {
            public_key.encrypt(&mut rng, rsa::Pkcs1v15Encrypt, key_data)
        } else {
            public_key.encrypt(&mut rng, rsa::Oaep::new::<sha1::Sha1>(), key_data)
        };
        wrapped.map_err(|e| self.fail("encrypt", e))
    }

    fn decrypt(&self, private_key: &rsa::RsaPrivateKey, encrypted: &[u8]) -> Result<Vec<u8>> {
        let unwrapped = if self.is_pkcs1() {
            private_key.decrypt(rsa::Pkcs1v15Encrypt, encrypted)
        } else {
            private_key.decrypt(rsa::Oaep::new::<sha1::Sha1>(), encrypted)
        };
        unwrapped.map_err(|e| self.fail("decrypt", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> rsa::RsaPrivateKey {
        let mut rng = rand::thread_rng();
        rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap()
    }

    #[test]
    fn test_all_transport_uris_roundtrip() {
        let private = test_key();
        let public = private.to_public_key();
        let session_key = [0x5au8; 32];

        for uri in [
            algorithm::RSA_PKCS1,
            algorithm::RSA_OAEP,
            algorithm::RSA_OAEP_ENC11,
        ] {
            let transport = from_uri(uri).unwrap();
            assert_eq!(transport.href(), uri);
            let wrapped = transport.encrypt(&public, &session_key).unwrap();
            let unwrapped = transport.decrypt(&private, &wrapped).unwrap();
            assert_eq!(unwrapped, session_key, "{uri}");
        }
    }

    #[test]
    fn test_oaep_and_pkcs1_are_not_interchangeable() {
        let private = test_key();
        let oaep = from_uri(algorithm::RSA_OAEP).unwrap();
        let pkcs1 = from_uri(algorithm::RSA_PKCS1).unwrap();

        let wrapped = oaep
            .encrypt(&private.to_public_key(), &[0x5au8; 16])
            .unwrap();
        assert!(pkcs1.decrypt(&private, &wrapped).is_err());
    }

    #[test]
    fn test_oaep_wrong_key_fails() {
        let private = test_key();
        let other = test_key();
        let transport = from_uri(algorithm::RSA_OAEP).unwrap();
        let wrapped = transport
            .encrypt(&private.to_public_key(), &[0x5au8; 16])
            .unwrap();
        assert!(transport.decrypt(&other, &wrapped).is_err());
    }

    #[test]
    fn test_unknown_transport_uri() {
        assert!(from_uri("http://example.com/fake").is_err());
    }
}
