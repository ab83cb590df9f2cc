#![forbid(unsafe_code)]

//! Key loading for the CLI: raw symmetric key files and PEM RSA keys.

use std::path::{Path, PathBuf};
use vaxholm_core::Error;
use vaxholm_keys::{Key, KeyData, KeyUsage, KeysManager};

/// Load keys from the CLI flags into the manager.
pub fn load_into(
    keys: &mut KeysManager,
    aes: &[PathBuf],
    des: &[PathBuf],
    rsa: &[PathBuf],
    named: &[String],
) -> Result<(), Error> {
    for path in aes {
        let bytes = std::fs::read(path)?;
        keys.add_key(Key::new(KeyData::Aes(bytes), KeyUsage::Any));
    }
    for path in des {
        let bytes = std::fs::read(path)?;
        keys.add_key(Key::new(KeyData::Des3(bytes), KeyUsage::Any));
    }
    for path in rsa {
        keys.add_key(load_rsa_pem(path)?);
    }
    for spec in named {
        let (name, path) = spec.split_once(':').ok_or_else(|| {
            Error::InvalidData(format!("--key-name expects NAME:FILE, got {spec}"))
        })?;
        let key = if path.ends_with(".pem") {
            load_rsa_pem(Path::new(path))?
        } else {
            let bytes = std::fs::read(path)?;
            Key::new(KeyData::Aes(bytes), KeyUsage::Any)
        };
        keys.add_key(key.with_name(name));
    }
    Ok(())
}

/// Load an RSA private key from a PEM file (PKCS#8 or PKCS#1).
fn load_rsa_pem(path: &Path) -> Result<Key, Error> {
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::pkcs8::DecodePrivateKey;

    let pem = std::fs::read_to_string(path)?;
    let private = rsa::RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| rsa::RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| Error::Crypto(format!("cannot parse RSA key {}: {e}", path.display())))?;
    let public = private.to_public_key();
    Ok(Key::new(
        KeyData::Rsa {
            private: Some(private),
            public,
        },
        KeyUsage::Any,
    ))
}
