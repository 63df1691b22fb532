//! Cryptographic primitives for BrainPlus device sync.
//!
//! This module provides:
//! - P-256 key pairs used for key agreement only
//! - SPKI (DER) public key export/import, base64-encoded for the wire
//! - ECDH + HKDF-SHA256 derivation of a 256-bit session key
//! - AES-256-GCM encryption with 96-bit random nonces
//!
//! # Security Notes
//!
//! - A fresh nonce is drawn from the OS for every message
//! - Ciphertext wire format is `base64(nonce(12) || ciphertext || tag(16))`
//! - Session keys are derived via HKDF with a fixed domain-separation salt
//! - Secret scalars and session keys are zeroized on drop

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use sync_types::ErrorKind;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// Session key size (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

const HKDF_SALT: &[u8] = b"brainplus-sync-session-v1";
const HKDF_INFO: &[u8] = b"aes-256-gcm batch key";

// Attempts at drawing a valid scalar before giving up.
const KEYGEN_ATTEMPTS: usize = 8;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Secure randomness or a primitive is unavailable.
    #[error("crypto unavailable: {0}")]
    CryptoUnavailable(String),

    /// A public key could not be decoded.
    #[error("malformed public key: {0}")]
    MalformedKey(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (bad encoding, truncated input, or authentication error).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}

impl CryptoError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::CryptoUnavailable(_) | CryptoError::EncryptionFailed(_) => {
                ErrorKind::CryptoUnavailable
            }
            CryptoError::MalformedKey(_) => ErrorKind::MalformedKey,
            CryptoError::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
        }
    }
}

/// A peer's public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

/// A P-256 key pair for one session.
///
/// The secret scalar is zeroized when the pair is dropped.
pub struct KeyPair {
    secret: p256::SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// This pair's public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

// Don't leak the secret scalar in debug output
impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("secret", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

/// A derived 256-bit AES-GCM session key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey([REDACTED])")
    }
}

/// Generate a fresh P-256 key pair from the OS random source.
pub fn generate_key_pair() -> Result<KeyPair, CryptoError> {
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    for _ in 0..KEYGEN_ATTEMPTS {
        OsRng
            .try_fill_bytes(&mut bytes[..])
            .map_err(|e| CryptoError::CryptoUnavailable(e.to_string()))?;
        // Zero or out-of-range scalars are rejected; draw again.
        if let Ok(secret) = p256::SecretKey::from_slice(&bytes[..]) {
            let public = PublicKey(secret.public_key());
            return Ok(KeyPair { secret, public });
        }
    }
    Err(CryptoError::CryptoUnavailable(
        "could not draw a valid P-256 scalar".into(),
    ))
}

/// Export a public key as base64 DER SubjectPublicKeyInfo.
pub fn export_public_key(key: &PublicKey) -> Result<String, CryptoError> {
    let der = key
        .0
        .to_public_key_der()
        .map_err(|e| CryptoError::CryptoUnavailable(format!("spki encode: {}", e)))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

/// Import a base64 DER SubjectPublicKeyInfo public key.
///
/// Fails with [`CryptoError::MalformedKey`] on bad base64, bad DER, a key
/// on another curve, or a point not on P-256.
pub fn import_public_key(encoded: &str) -> Result<PublicKey, CryptoError> {
    let der = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::MalformedKey(format!("base64: {}", e)))?;
    p256::PublicKey::from_public_key_der(&der)
        .map(PublicKey)
        .map_err(|e| CryptoError::MalformedKey(format!("spki: {}", e)))
}

/// Derive the session key shared with `peer`.
///
/// ECDH on P-256, then HKDF-SHA256 to a 256-bit key. Both sides of the
/// exchange derive byte-identical keys.
pub fn derive_shared_secret(local: &KeyPair, peer: &PublicKey) -> Result<SharedKey, CryptoError> {
    let shared = p256::ecdh::diffie_hellman(local.secret.to_nonzero_scalar(), peer.0.as_affine());
    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared.raw_secret_bytes().as_slice());

    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|e| CryptoError::CryptoUnavailable(format!("hkdf expand: {}", e)))?;
    Ok(SharedKey(key))
}

/// Encrypt `plaintext` with a fresh random nonce.
///
/// Returns `base64(nonce || ciphertext || tag)`.
pub fn encrypt(plaintext: &[u8], key: &SharedKey) -> Result<String, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| CryptoError::CryptoUnavailable(e.to_string()))?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

    let mut wire = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    wire.extend_from_slice(&nonce_bytes);
    wire.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(wire))
}

/// Decrypt the output of [`encrypt`].
pub fn decrypt(encoded: &str, key: &SharedKey) -> Result<Vec<u8>, CryptoError> {
    let wire = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::DecryptionFailed(format!("base64: {}", e)))?;
    if wire.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "ciphertext too short: {} bytes",
            wire.len()
        )));
    }
    let (nonce, ciphertext) = wire.split_at(NONCE_SIZE);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("authentication error".into()))
}
