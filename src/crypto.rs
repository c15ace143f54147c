//! Encryption of secrets stored in the database (the coach's LLM API key).
//!
//! Stored form is `base64(nonce || ciphertext)` with a fresh 12-byte nonce
//! per value, sealed with ChaCha20-Poly1305 under a 32-byte key supplied as
//! base64.

use anyhow::{anyhow, ensure, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

const NONCE_LEN: usize = 12;

fn cipher(key_b64: &str) -> Result<ChaCha20Poly1305> {
    let key = general_purpose::STANDARD
        .decode(key_b64.trim())
        .context("encryption key is not valid base64")?;
    ensure!(key.len() == 32, "encryption key must be 32 bytes (base64)");
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
}

/// Generate a new random base64 key.
pub fn generate_key() -> String {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    general_purpose::STANDARD.encode(key)
}

pub fn encrypt(key_b64: &str, plaintext: &str) -> Result<String> {
    let cipher = cipher(key_b64)?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| anyhow!("encryption failed"))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(general_purpose::STANDARD.encode(out))
}

pub fn decrypt(key_b64: &str, sealed: &str) -> Result<String> {
    let cipher = cipher(key_b64)?;
    let decoded = general_purpose::STANDARD
        .decode(sealed.trim())
        .context("sealed value is not valid base64")?;
    ensure!(decoded.len() > NONCE_LEN, "sealed value too short");

    let (nonce, ct) = decoded.split_at(NONCE_LEN);
    let pt = cipher
        .decrypt(Nonce::from_slice(nonce), ct)
        .map_err(|_| anyhow!("decryption failed"))?;
    String::from_utf8(pt).context("decrypted value is not UTF-8")
}

/// Like [`decrypt`] but swallows every failure, including a missing key or value.
pub fn safe_decrypt(key_b64: Option<&str>, sealed: Option<&str>) -> Option<String> {
    decrypt(key_b64?, sealed?).ok()
}

/// Display form of an API key: short keys show 3 chars, longer keys show
/// the first 7 and last 4.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 10 {
        let head: String = chars.iter().take(3).collect();
        format!("{}...", head)
    } else {
        let head: String = chars[..7].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}
