//! AES-256-CBC + PKCS#7 令牌加密器
//!
//! 线格式: `iv(16) || ciphertext`，IV 为随机 16 字节与 IV 种子异或

use aes::Aes256;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::{CryptoError, TokenCipher};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const IV_SIZE: usize = 16;

pub struct AesCipher {
    key: [u8; 32],
    iv_seed: [u8; 16],
}

impl AesCipher {
    /// 从 hex 密钥与 IV 种子构造
    ///
    /// 密钥解码后不足/超过 32 字节时退化为 SHA256(raw)；IV 种子不足 16
    /// 字节时取 SHA256(seed) 的前 16 字节。
    pub fn new(hex_key: &str, iv_seed: &str) -> Result<Self, CryptoError> {
        let raw = hex::decode(hex_key)
            .map_err(|e| CryptoError::InvalidKey(format!("aes_key is not hex: {}", e)))?;

        let mut key = [0u8; 32];
        if raw.len() == 32 {
            key.copy_from_slice(&raw);
        } else {
            key.copy_from_slice(&Sha256::digest(&raw));
        }

        let mut seed = [0u8; 16];
        let seed_bytes = iv_seed.as_bytes();
        if seed_bytes.len() == 16 {
            seed.copy_from_slice(seed_bytes);
        } else {
            seed.copy_from_slice(&Sha256::digest(seed_bytes)[..16]);
        }

        Ok(Self { key, iv_seed: seed })
    }

    fn generate_iv(&self) -> [u8; 16] {
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);
        for (byte, seed) in iv.iter_mut().zip(self.iv_seed.iter()) {
            *byte ^= seed;
        }
        iv
    }
}

impl TokenCipher for AesCipher {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let iv = self.generate_iv();
        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(data);

        let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < IV_SIZE {
            return Err(CryptoError::Decrypt("encrypted data too short".into()));
        }
        let (iv, ciphertext) = data.split_at(IV_SIZE);
        if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
            return Err(CryptoError::Decrypt(
                "ciphertext is not a whole number of blocks".into(),
            ));
        }

        let cipher = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Decrypt("invalid padding".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> AesCipher {
        AesCipher::new(&"00".repeat(32), "1234567890abcdef").unwrap()
    }

    #[test]
    fn roundtrip() {
        let c = cipher();
        let plain = br#"{"id":"t1","api_key":"sk-X"}"#;
        let ct = c.encrypt(plain).unwrap();
        assert_ne!(&ct[IV_SIZE..], plain.as_slice());
        assert_eq!(c.decrypt(&ct).unwrap(), plain);
    }

    #[test]
    fn roundtrip_empty_plaintext() {
        let c = cipher();
        let ct = c.encrypt(b"").unwrap();
        // PKCS#7 always emits at least one full block
        assert_eq!(ct.len(), IV_SIZE + 16);
        assert_eq!(c.decrypt(&ct).unwrap(), b"");
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let c = cipher();
        let a = c.encrypt(b"same input").unwrap();
        let b = c.encrypt(b"same input").unwrap();
        assert_ne!(a[..IV_SIZE], b[..IV_SIZE]);
    }

    #[test]
    fn short_key_is_stretched() {
        // 8 hex chars decode to 4 bytes; the cipher must still work
        let c = AesCipher::new("deadbeef", "1234567890abcdef").unwrap();
        let ct = c.encrypt(b"data").unwrap();
        assert_eq!(c.decrypt(&ct).unwrap(), b"data");
    }

    #[test]
    fn short_iv_seed_is_stretched() {
        let c = AesCipher::new(&"11".repeat(32), "seed").unwrap();
        let ct = c.encrypt(b"data").unwrap();
        assert_eq!(c.decrypt(&ct).unwrap(), b"data");
    }

    #[test]
    fn rejects_non_hex_key() {
        assert!(AesCipher::new("zz", "1234567890abcdef").is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let c = cipher();
        assert!(matches!(
            c.decrypt(&[0u8; 8]),
            Err(CryptoError::Decrypt(_))
        ));
    }

    #[test]
    fn rejects_tampered_padding() {
        let c = cipher();
        let mut ct = c.encrypt(b"payload").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xff;
        assert!(c.decrypt(&ct).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let c = cipher();
        let other = AesCipher::new(&"ff".repeat(32), "1234567890abcdef").unwrap();
        let ct = c.encrypt(b"payload").unwrap();
        // 绝大多数情况下 padding 校验会失败；即便侥幸通过也不会还原明文
        match other.decrypt(&ct) {
            Ok(plain) => assert_ne!(plain, b"payload"),
            Err(_) => {}
        }
    }
}
