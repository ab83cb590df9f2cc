#![forbid(unsafe_code)]

//! Key wrap algorithms (AES-KW per RFC 3394, 3DES-KW per RFC 3217).

use aes_kw::Kek;
use vaxholm_core::{algorithm, Error, Result};

/// Trait for key wrap algorithms.
pub trait KeyWrapAlgorithm: Send {
    fn href(&self) -> &'static str;
    fn kek_size(&self) -> usize;
    fn wrap(&self, kek: &[u8], key_data: &[u8]) -> Result<Vec<u8>>;
    fn unwrap(&self, kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>>;
}

/// Create a key wrap algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn KeyWrapAlgorithm>> {
    match uri {
        algorithm::KW_AES128 => Ok(Box::new(AesKeyWrap {
            kek_size: 16,
            uri: algorithm::KW_AES128,
        })),
        algorithm::KW_AES192 => Ok(Box::new(AesKeyWrap {
            kek_size: 24,
            uri: algorithm::KW_AES192,
        })),
        algorithm::KW_AES256 => Ok(Box::new(AesKeyWrap {
            kek_size: 32,
            uri: algorithm::KW_AES256,
        })),
        algorithm::KW_TRIPLEDES => Ok(Box::new(TripleDesKeyWrap)),
        _ => Err(Error::UnsupportedAlgorithm(format!("key wrap: {uri}"))),
    }
}

struct AesKeyWrap {
    kek_size: usize,
    uri: &'static str,
}

impl AesKeyWrap {
    fn check_kek(&self, kek: &[u8]) -> Result<()> {
        if kek.len() != self.kek_size {
            return Err(Error::Crypto(format!(
                "expected {} byte KEK, got {}",
                self.kek_size,
                kek.len()
            )));
        }
        Ok(())
    }
}

impl KeyWrapAlgorithm for AesKeyWrap {
    fn href(&self) -> &'static str {
        self.uri
    }

    fn kek_size(&self) -> usize {
        self.kek_size
    }

    fn wrap(&self, kek_bytes: &[u8], key_data: &[u8]) -> Result<Vec<u8>> {
        self.check_kek(kek_bytes)?;
        let mut out = vec![0u8; key_data.len() + 8];
        macro_rules! run {
            ($aes:ty) => {{
                let kek = Kek::<$aes>::new(kek_bytes.into());
                kek.wrap(key_data, &mut out)
                    .map_err(|e| Error::Crypto(format!("AES-KW wrap: {e}")))?;
            }};
        }
        match self.kek_size {
            16 => run!(aes::Aes128),
            24 => run!(aes::Aes192),
            _ => run!(aes::Aes256),
        }
        Ok(out)
    }

    fn unwrap(&self, kek_bytes: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
        self.check_kek(kek_bytes)?;
        if wrapped.len() < 16 {
            return Err(Error::Crypto("wrapped key too short".into()));
        }
        let mut out = vec![0u8; wrapped.len() - 8];
        macro_rules! run {
            ($aes:ty) => {{
                let kek = Kek::<$aes>::new(kek_bytes.into());
                kek.unwrap(wrapped, &mut out)
                    .map_err(|e| Error::Crypto(format!("AES-KW unwrap: {e}")))?;
            }};
        }
        match self.kek_size {
            16 => run!(aes::Aes128),
            24 => run!(aes::Aes192),
            _ => run!(aes::Aes256),
        }
        Ok(out)
    }
}

/// CMS Triple-DES Key Wrap per RFC 3217.
struct TripleDesKeyWrap;

/// Fixed IV for the second 3DES-CBC pass (RFC 3217 section 3.2).
const TDES_KW_IV: [u8; 8] = [0x4a, 0xdd, 0xa2, 0x2c, 0x79, 0xe8, 0x21, 0x05];

impl KeyWrapAlgorithm for TripleDesKeyWrap {
    fn href(&self) -> &'static str {
        algorithm::KW_TRIPLEDES
    }

    fn kek_size(&self) -> usize {
        24
    }

    fn wrap(&self, kek: &[u8], key_data: &[u8]) -> Result<Vec<u8>> {
        if kek.len() != 24 {
            return Err(Error::Crypto(format!(
                "expected 24 byte 3DES KEK, got {}",
                kek.len()
            )));
        }

        // WKCKS = key data followed by the CMS key checksum (first 8
        // bytes of the SHA-1 hash)
        use sha1::Digest;
        let mut hasher = sha1::Sha1::new();
        hasher.update(key_data);
        let hash = hasher.finalize();

        let mut wkcks = Vec::with_capacity(key_data.len() + 8);
        wkcks.extend_from_slice(key_data);
        wkcks.extend_from_slice(&hash[..8]);

        use rand::RngCore;
        let mut iv = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut iv);

        // first pass with the random IV, then reverse and encrypt again
        // with the fixed IV
        let temp1 = tdes_cbc_encrypt(kek, &iv, &wkcks)?;
        let mut temp2 = Vec::with_capacity(8 + temp1.len());
        temp2.extend_from_slice(&iv);
        temp2.extend_from_slice(&temp1);
        temp2.reverse();

        tdes_cbc_encrypt(kek, &TDES_KW_IV, &temp2)
    }

    fn unwrap(&self, kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
        if kek.len() != 24 {
            return Err(Error::Crypto(format!(
                "expected 24 byte 3DES KEK, got {}",
                kek.len()
            )));
        }
        if wrapped.len() < 16 {
            return Err(Error::Crypto("3DES-KW wrapped data too short".into()));
        }

        let mut temp2 = tdes_cbc_decrypt(kek, &TDES_KW_IV, wrapped)?;
        temp2.reverse();

        if temp2.len() < 8 {
            return Err(Error::Crypto("3DES-KW unwrapped data too short".into()));
        }
        let iv: [u8; 8] = temp2[..8]
            .try_into()
            .map_err(|_| Error::Crypto("invalid IV length".into()))?;
        let wkcks = tdes_cbc_decrypt(kek, &iv, &temp2[8..])?;

        if wkcks.len() < 8 {
            return Err(Error::Crypto("3DES-KW data too short for checksum".into()));
        }
        let (key_data, checksum) = wkcks.split_at(wkcks.len() - 8);

        use sha1::Digest;
        let mut hasher = sha1::Sha1::new();
        hasher.update(key_data);
        let hash = hasher.finalize();
        if checksum != &hash[..8] {
            return Err(Error::Crypto("3DES-KW key checksum mismatch".into()));
        }

        Ok(key_data.to_vec())
    }
}

/// 3DES-CBC encrypt, no padding; input must be block-aligned.
fn tdes_cbc_encrypt(key: &[u8], iv: &[u8; 8], data: &[u8]) -> Result<Vec<u8>> {
    use cbc::cipher::{BlockEncryptMut, KeyIvInit};

    if data.len() % 8 != 0 {
        return Err(Error::Crypto("3DES-KW: data not block-aligned".into()));
    }
    let encryptor = cbc::Encryptor::<des::TdesEde3>::new(key.into(), iv.into());
    let mut buf = data.to_vec();
    encryptor
        .encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buf, data.len())
        .map_err(|e| Error::Crypto(format!("3DES-CBC encrypt: {e}")))?;
    Ok(buf)
}

/// 3DES-CBC decrypt, no padding; input must be block-aligned.
fn tdes_cbc_decrypt(key: &[u8], iv: &[u8; 8], data: &[u8]) -> Result<Vec<u8>> {
    use cbc::cipher::{BlockDecryptMut, KeyIvInit};

    let decryptor = cbc::Decryptor::<des::TdesEde3>::new(key.into(), iv.into());
    let mut buf = data.to_vec();
    let result = decryptor
        .decrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buf)
        .map_err(|e| Error::Crypto(format!("3DES-CBC decrypt: {e}")))?;
    Ok(result.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nist_aes128_kw_vector() {
        // RFC 3394 section 4.1
        let kek = hex::decode("000102030405060708090A0B0C0D0E0F").unwrap();
        let pt = hex::decode("00112233445566778899AABBCCDDEEFF").unwrap();
        let ct = hex::decode("1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5").unwrap();

        let kw = from_uri(algorithm::KW_AES128).unwrap();
        assert_eq!(kw.wrap(&kek, &pt).unwrap(), ct);
        assert_eq!(kw.unwrap(&kek, &ct).unwrap(), pt);
    }

    #[test]
    fn test_nist_aes256_kw_vector() {
        // RFC 3394 section 4.3
        let kek = hex::decode("000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F")
            .unwrap();
        let pt = hex::decode("00112233445566778899AABBCCDDEEFF").unwrap();
        let ct = hex::decode("64E8C3F9CE0F5BA263E9777905818A2A93C8191E7D6E8AE7").unwrap();

        let kw = from_uri(algorithm::KW_AES256).unwrap();
        assert_eq!(kw.wrap(&kek, &pt).unwrap(), ct);
        assert_eq!(kw.unwrap(&kek, &ct).unwrap(), pt);
    }

    #[test]
    fn test_aes_kw_integrity_check() {
        let kek = [0x11u8; 16];
        let kw = from_uri(algorithm::KW_AES128).unwrap();
        let mut wrapped = kw.wrap(&kek, &[0x22u8; 16]).unwrap();
        wrapped[0] ^= 0xFF;
        assert!(kw.unwrap(&kek, &wrapped).is_err());
    }

    #[test]
    fn test_aes_kw_wrong_kek_size() {
        let kw = from_uri(algorithm::KW_AES128).unwrap();
        assert!(kw.wrap(&[0u8; 15], &[0u8; 16]).is_err());
    }

    #[test]
    fn test_tdes_key_wrap_roundtrip() {
        let kek: Vec<u8> = (1..=24).collect();
        let key_data: Vec<u8> = (100..124).collect();

        let kw = from_uri(algorithm::KW_TRIPLEDES).unwrap();
        let wrapped = kw.wrap(&kek, &key_data).unwrap();
        assert_eq!(kw.unwrap(&kek, &wrapped).unwrap(), key_data);
    }

    #[test]
    fn test_tdes_key_wrap_corrupted_checksum() {
        let kek = [0x33u8; 24];
        let kw = from_uri(algorithm::KW_TRIPLEDES).unwrap();
        let mut wrapped = kw.wrap(&kek, &[0x44u8; 24]).unwrap();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x01;
        assert!(kw.unwrap(&kek, &wrapped).is_err());
    }
}
