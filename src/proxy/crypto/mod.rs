//! 令牌编解码: AES / ECC 加密器与 URL 安全 base64 传输编码

pub mod aes;
pub mod ecc;

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use thiserror::Error;

use crate::proxy::client_config::{ClientConfig, CryptoSettings};

pub use aes::AesCipher;
pub use ecc::EccCipher;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unsupported encryption method: {0}")]
    UnsupportedMethod(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("signature verification failed")]
    BadSignature,
}

/// 对称/混合加密器统一接口
pub trait TokenCipher: Send + Sync {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// 根据客户端配置构造加密器
pub fn for_config(config: &ClientConfig) -> Result<Box<dyn TokenCipher>, CryptoError> {
    match &config.crypto {
        CryptoSettings::Aes {
            aes_key,
            aes_iv_seed,
        } => Ok(Box::new(AesCipher::new(aes_key, aes_iv_seed)?)),
        CryptoSettings::Ecc {} => Ok(Box::new(EccCipher::generate())),
    }
}

/// Encode ciphertext bytes for URL transport (base64url, no padding).
pub fn encode_transport(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode a URL-carried token value, tolerating stripped base64 padding.
pub fn decode_transport(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE.decode(restore_padding(value.trim()))
}

/// Re-append '=' until the length is a multiple of four.
fn restore_padding(value: &str) -> String {
    let mut owned = value.to_string();
    while owned.len() % 4 != 0 {
        owned.push('=');
    }
    owned
}
