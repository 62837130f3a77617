//! Encryption of provider API keys at rest.
//!
//! Keys are sealed with AES-256-GCM. The cipher key is the SHA-256 digest of the configured
//! `secret_key`, so any non-empty secret works. Stored values are base64(nonce || ciphertext).

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose};
use rand::Rng;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

fn cipher_for(secret_key: &str) -> Result<Aes256Gcm, anyhow::Error> {
    if secret_key.is_empty() {
        return Err(anyhow::anyhow!("secret_key is empty"));
    }
    let digest = Sha256::digest(secret_key.as_bytes());
    Aes256Gcm::new_from_slice(&digest).map_err(|e| anyhow::anyhow!("Failed to create cipher: {}", e))
}

/// Encrypt `plaintext`, returning base64(nonce || ciphertext).
pub fn encrypt_secret(secret_key: &str, plaintext: &str) -> Result<String, anyhow::Error> {
    let cipher = cipher_for(secret_key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(general_purpose::STANDARD.encode(sealed))
}

/// Reverse of [`encrypt_secret`].
pub fn decrypt_secret(secret_key: &str, sealed_b64: &str) -> Result<String, anyhow::Error> {
    let cipher = cipher_for(secret_key)?;

    let sealed = general_purpose::STANDARD
        .decode(sealed_b64)
        .map_err(|e| anyhow::anyhow!("Failed to decode encrypted data: {}", e))?;
    if sealed.len() <= NONCE_LEN {
        return Err(anyhow::anyhow!("Encrypted data too short"));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

    String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("Decrypted key is not UTF-8: {}", e))
}

/// Display form of a stored key: `...` plus the last four characters.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let sealed = encrypt_secret("server-secret", "sk-live-abcdef123456").unwrap();
        assert!(general_purpose::STANDARD.decode(&sealed).is_ok());
        assert!(!sealed.contains("abcdef"));
        assert_eq!(decrypt_secret("server-secret", &sealed).unwrap(), "sk-live-abcdef123456");
    }

    #[test]
    fn test_nonce_makes_ciphertexts_differ() {
        let a = encrypt_secret("server-secret", "same").unwrap();
        let b = encrypt_secret("server-secret", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let sealed = encrypt_secret("server-secret", "sk-test").unwrap();
        assert!(decrypt_secret("another-secret", &sealed).is_err());
    }

    #[test]
    fn test_truncated_data_fails() {
        let short = general_purpose::STANDARD.encode([0u8; 5]);
        let err = decrypt_secret("server-secret", &short).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(encrypt_secret("", "sk-test").is_err());
    }

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("sk-proj-1234abcd"), "...abcd");
        assert_eq!(mask_api_key("abcd"), "****");
        assert_eq!(mask_api_key(""), "****");
    }
}
