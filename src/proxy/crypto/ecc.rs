//! ECC (P-256) 令牌加密器
//!
//! 线格式: `r(32) || s(32) || session_key(32) || iv(16) || ciphertext`

use aes::Aes256;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

use super::{CryptoError, TokenCipher};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const SIGNATURE_SIZE: usize = 64;
const SESSION_KEY_SIZE: usize = 32;
const IV_SIZE: usize = 16;
const HEADER_SIZE: usize = SIGNATURE_SIZE + SESSION_KEY_SIZE + IV_SIZE;

pub struct EccCipher {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl EccCipher {
    /// 生成一对新的 P-256 密钥
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// 导出公钥 (SEC1 压缩格式) 供外部校验方使用
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.verifying_key
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }
}

impl TokenCipher for EccCipher {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut session_key = [0u8; SESSION_KEY_SIZE];
        OsRng.fill_bytes(&mut session_key);
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new_from_slices(&session_key, &iv)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(data);

        // 签名覆盖 session key (Signer 内部做 SHA-256)
        let signature: Signature = self.signing_key.sign(&session_key);

        let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        out.extend_from_slice(&signature.to_bytes());
        out.extend_from_slice(&session_key);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < HEADER_SIZE {
            return Err(CryptoError::Decrypt("encrypted data too short".into()));
        }
        let (sig_bytes, rest) = data.split_at(SIGNATURE_SIZE);
        let (session_key, rest) = rest.split_at(SESSION_KEY_SIZE);
        let (iv, ciphertext) = rest.split_at(IV_SIZE);

        let signature = Signature::from_slice(sig_bytes)
            .map_err(|_| CryptoError::Decrypt("malformed signature".into()))?;
        self.verifying_key
            .verify(session_key, &signature)
            .map_err(|_| CryptoError::BadSignature)?;

        if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
            return Err(CryptoError::Decrypt(
                "ciphertext is not a whole number of blocks".into(),
            ));
        }
        let cipher = Aes256CbcDec::new_from_slices(session_key, iv)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Decrypt("invalid padding".into()))
    }
}
