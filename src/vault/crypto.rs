//! Shared AEAD construction for the token vault and the conversation store.
//!
//! AES-256-GCM with a fresh 96-bit nonce per encryption. Binary bundles are
//! `nonce || ciphertext` (the GCM tag rides inside the ciphertext); text
//! bundles for file stores render as `hex(nonce):hex(ciphertext)`.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// Authenticated encryption helper bound to one 32-byte key.
pub struct SealedBox {
    cipher: Aes256Gcm,
}

impl SealedBox {
    /// Construct from raw key material. The key is required: callers that
    /// want encryption must provide one; there is no plaintext fallback.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Parse a 64-hex-char key, or derive one from an arbitrary secret via
    /// SHA-256 when the input is not already key-shaped.
    pub fn from_secret(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            bail!("encryption key must not be empty");
        }
        let key: [u8; 32] = if secret.len() == 64 {
            match hex::decode(secret) {
                Ok(bytes) => bytes
                    .try_into()
                    .map_err(|_| anyhow!("encryption key must be 32 bytes"))?,
                Err(_) => derive_key(secret),
            }
        } else {
            derive_key(secret)
        };
        Ok(Self::new(&key))
    }

    /// Encrypt into a `nonce || ciphertext` bundle with a fresh nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| anyhow!("encryption failed"))?;
        let mut bundle = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        bundle.extend_from_slice(&nonce);
        bundle.extend_from_slice(&ciphertext);
        Ok(bundle)
    }

    /// Decrypt a `nonce || ciphertext` bundle. Any truncation or bit flip
    /// fails authentication.
    pub fn open(&self, bundle: &[u8]) -> Result<Vec<u8>> {
        if bundle.len() <= NONCE_LEN {
            bail!("ciphertext bundle too short");
        }
        let (nonce, ciphertext) = bundle.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("decryption failed: ciphertext rejected"))
    }

    /// Encrypt a string to the `hex(nonce):hex(ciphertext)` text form used
    /// by file-backed stores.
    pub fn seal_text(&self, plaintext: &str) -> Result<String> {
        let bundle = self.seal(plaintext.as_bytes())?;
        let (nonce, ciphertext) = bundle.split_at(NONCE_LEN);
        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
    }

    /// Decrypt the `hex(nonce):hex(ciphertext)` text form.
    pub fn open_text(&self, sealed: &str) -> Result<String> {
        let (nonce_hex, ct_hex) = sealed
            .split_once(':')
            .context("sealed text missing ':' separator")?;
        let mut bundle = hex::decode(nonce_hex).context("bad nonce hex")?;
        bundle.extend(hex::decode(ct_hex).context("bad ciphertext hex")?);
        let plaintext = self.open(&bundle)?;
        String::from_utf8(plaintext).context("decrypted payload is not UTF-8")
    }
}

fn derive_key(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}
