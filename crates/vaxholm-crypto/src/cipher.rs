#![forbid(unsafe_code)]

//! Block cipher algorithm implementations (AES-CBC, AES-GCM, 3DES-CBC).
//!
//! CBC ciphertext is laid out as IV ∥ ciphertext with the padding scheme
//! from the XML Encryption spec; GCM output is nonce ∥ ciphertext+tag.

use vaxholm_core::{algorithm, Error, Result};

/// Trait for cipher algorithms.
pub trait CipherAlgorithm: Send {
    fn href(&self) -> &'static str;
    fn key_size(&self) -> usize;
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Create a cipher algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn CipherAlgorithm>> {
    match uri {
        algorithm::AES128_CBC | algorithm::AES192_CBC | algorithm::AES256_CBC => {
            Ok(Box::new(AesCbc { uri: aes_uri(uri) }))
        }
        algorithm::AES128_GCM | algorithm::AES192_GCM | algorithm::AES256_GCM => {
            Ok(Box::new(AesGcm { uri: aes_uri(uri) }))
        }
        algorithm::TRIPLEDES_CBC => Ok(Box::new(TripleDesCbc)),
        _ => Err(Error::UnsupportedAlgorithm(format!("cipher: {uri}"))),
    }
}

/// Map a dynamic URI onto the matching static constant.
fn aes_uri(uri: &str) -> &'static str {
    match uri {
        algorithm::AES128_CBC => algorithm::AES128_CBC,
        algorithm::AES192_CBC => algorithm::AES192_CBC,
        algorithm::AES256_CBC => algorithm::AES256_CBC,
        algorithm::AES128_GCM => algorithm::AES128_GCM,
        algorithm::AES192_GCM => algorithm::AES192_GCM,
        _ => algorithm::AES256_GCM,
    }
}

fn aes_key_size(uri: &str) -> usize {
    match uri {
        algorithm::AES128_CBC | algorithm::AES128_GCM => 16,
        algorithm::AES192_CBC | algorithm::AES192_GCM => 24,
        _ => 32,
    }
}

fn check_key_len(expected: usize, key: &[u8]) -> Result<()> {
    if key.len() != expected {
        return Err(Error::Crypto(format!(
            "expected {} byte key, got {}",
            expected,
            key.len()
        )));
    }
    Ok(())
}

// ── AES-CBC ──────────────────────────────────────────────────────────

struct AesCbc {
    uri: &'static str,
}

impl CipherAlgorithm for AesCbc {
    fn href(&self) -> &'static str {
        self.uri
    }

    fn key_size(&self) -> usize {
        aes_key_size(self.uri)
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        use cbc::cipher::{BlockEncryptMut, KeyIvInit};
        use rand::RngCore;

        check_key_len(self.key_size(), key)?;

        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut buf = pad(plaintext, 16);
        let buf_len = buf.len();

        macro_rules! run {
            ($aes:ty) => {{
                let enc = cbc::Encryptor::<$aes>::new_from_slices(key, &iv)
                    .map_err(|e| Error::Crypto(format!("AES-CBC init: {e}")))?;
                enc.encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buf, buf_len)
                    .map_err(|e| Error::Crypto(format!("AES-CBC encrypt: {e}")))?;
            }};
        }
        match self.key_size() {
            16 => run!(aes::Aes128),
            24 => run!(aes::Aes192),
            _ => run!(aes::Aes256),
        }

        let mut result = Vec::with_capacity(16 + buf.len());
        result.extend_from_slice(&iv);
        result.extend_from_slice(&buf);
        Ok(result)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        use cbc::cipher::{BlockDecryptMut, KeyIvInit};

        check_key_len(self.key_size(), key)?;
        if data.len() < 32 || data.len() % 16 != 0 {
            return Err(Error::Crypto("AES-CBC data has invalid length".into()));
        }

        let (iv, ciphertext) = data.split_at(16);
        let mut buf = ciphertext.to_vec();

        macro_rules! run {
            ($aes:ty) => {{
                let dec = cbc::Decryptor::<$aes>::new_from_slices(key, iv)
                    .map_err(|e| Error::Crypto(format!("AES-CBC init: {e}")))?;
                dec.decrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buf)
                    .map_err(|e| Error::Crypto(format!("AES-CBC decrypt: {e}")))?;
            }};
        }
        match self.key_size() {
            16 => run!(aes::Aes128),
            24 => run!(aes::Aes192),
            _ => run!(aes::Aes256),
        }

        unpad(&buf, 16)
    }
}

// ── AES-GCM ──────────────────────────────────────────────────────────

struct AesGcm {
    uri: &'static str,
}

impl CipherAlgorithm for AesGcm {
    fn href(&self) -> &'static str {
        self.uri
    }

    fn key_size(&self) -> usize {
        aes_key_size(self.uri)
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::{aead::Aead, KeyInit, Nonce};
        use rand::RngCore;

        check_key_len(self.key_size(), key)?;

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        macro_rules! run {
            ($cipher:ty) => {{
                let cipher = <$cipher>::new_from_slice(key)
                    .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?;
                cipher
                    .encrypt(nonce, plaintext)
                    .map_err(|e| Error::Crypto(format!("AES-GCM encrypt: {e}")))?
            }};
        }
        let ct = match self.key_size() {
            16 => run!(aes_gcm::Aes128Gcm),
            24 => {
                use aes_gcm::aead::consts::U12;
                run!(aes_gcm::AesGcm::<aes::Aes192, U12>)
            }
            _ => run!(aes_gcm::Aes256Gcm),
        };

        let mut result = Vec::with_capacity(12 + ct.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ct);
        Ok(result)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::{aead::Aead, KeyInit, Nonce};

        check_key_len(self.key_size(), key)?;
        if data.len() < 12 + 16 {
            return Err(Error::Crypto("AES-GCM data too short".into()));
        }

        let nonce = Nonce::from_slice(&data[..12]);
        let ct_and_tag = &data[12..];

        macro_rules! run {
            ($cipher:ty) => {{
                let cipher = <$cipher>::new_from_slice(key)
                    .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?;
                cipher
                    .decrypt(nonce, ct_and_tag)
                    .map_err(|e| Error::Crypto(format!("AES-GCM decrypt: {e}")))
            }};
        }
        match self.key_size() {
            16 => run!(aes_gcm::Aes128Gcm),
            24 => {
                use aes_gcm::aead::consts::U12;
                run!(aes_gcm::AesGcm::<aes::Aes192, U12>)
            }
            _ => run!(aes_gcm::Aes256Gcm),
        }
    }
}

// ── 3DES-CBC ─────────────────────────────────────────────────────────

struct TripleDesCbc;

impl CipherAlgorithm for TripleDesCbc {
    fn href(&self) -> &'static str {
        algorithm::TRIPLEDES_CBC
    }

    fn key_size(&self) -> usize {
        24
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        use cbc::cipher::{BlockEncryptMut, KeyIvInit};
        use rand::RngCore;

        check_key_len(24, key)?;

        let mut iv = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut buf = pad(plaintext, 8);
        let buf_len = buf.len();
        let enc = cbc::Encryptor::<des::TdesEde3>::new_from_slices(key, &iv)
            .map_err(|e| Error::Crypto(format!("3DES init: {e}")))?;
        enc.encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buf, buf_len)
            .map_err(|e| Error::Crypto(format!("3DES encrypt: {e}")))?;

        let mut result = Vec::with_capacity(8 + buf.len());
        result.extend_from_slice(&iv);
        result.extend_from_slice(&buf);
        Ok(result)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        use cbc::cipher::{BlockDecryptMut, KeyIvInit};

        check_key_len(24, key)?;
        if data.len() < 16 || data.len() % 8 != 0 {
            return Err(Error::Crypto("3DES data has invalid length".into()));
        }

        let (iv, ciphertext) = data.split_at(8);
        let mut buf = ciphertext.to_vec();
        let dec = cbc::Decryptor::<des::TdesEde3>::new_from_slices(key, iv)
            .map_err(|e| Error::Crypto(format!("3DES init: {e}")))?;
        dec.decrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buf)
            .map_err(|e| Error::Crypto(format!("3DES decrypt: {e}")))?;

        unpad(&buf, 8)
    }
}

// ── Padding ──────────────────────────────────────────────────────────

/// PKCS#7-style block padding.
fn pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let pad_len = block_size - (data.len() % block_size);
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    padded
}

/// Remove XML Encryption padding.
///
/// The padding length lives in the last byte.  PKCS#7 fills the padding
/// with the length value, ISO 10126 uses random filler; checking only the
/// last byte accepts both.
fn unpad(data: &[u8], block_size: usize) -> Result<Vec<u8>> {
    let pad_len = match data.last() {
        Some(&b) => b as usize,
        None => return Ok(Vec::new()),
    };
    if pad_len == 0 || pad_len > block_size || pad_len > data.len() {
        return Err(Error::Crypto("invalid padding".into()));
    }
    Ok(data[..data.len() - pad_len].to_vec())
}
