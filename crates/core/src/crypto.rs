//! Ed25519 identity operations for the authentication handshake
//!
//! The server challenges a connecting client with a random 32-byte nonce;
//! the client signs `nonce || name` with its identity key. Keys are 32 raw
//! bytes on the wire and hex strings in identity files.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const PRIVATE_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
pub const NONCE_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key encoding: {0}")]
    KeyEncoding(String),
}

/// An Ed25519 identity keypair.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_private_bytes(bytes: &[u8; PRIVATE_KEY_LEN]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    pub fn from_private_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes: [u8; PRIVATE_KEY_LEN] = hex::decode(hex_str)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
            .try_into()
            .map_err(|_| CryptoError::KeyEncoding("private key must be 32 bytes".into()))?;
        Ok(Self::from_private_bytes(&bytes))
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn private_bytes(&self) -> [u8; PRIVATE_KEY_LEN] {
        self.signing.to_bytes()
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.public_bytes())
    }

    pub fn private_hex(&self) -> String {
        hex::encode(self.private_bytes())
    }

    /// Sign an auth challenge: the message is `nonce || name_utf8`.
    pub fn sign_challenge(&self, nonce: &[u8; NONCE_LEN], name: &str) -> [u8; SIGNATURE_LEN] {
        let mut message = Vec::with_capacity(NONCE_LEN + name.len());
        message.extend_from_slice(nonce);
        message.extend_from_slice(name.as_bytes());
        self.signing.sign(&message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_hex())
            .finish_non_exhaustive()
    }
}

/// Verify a challenge signature against a raw public key.
///
/// Malformed keys and signatures verify as false rather than erroring; the
/// caller maps both to `INVALID_SIGNATURE`.
pub fn verify_challenge(
    public_key: &[u8; PUBLIC_KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    name: &str,
    signature: &[u8; SIGNATURE_LEN],
) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let mut message = Vec::with_capacity(NONCE_LEN + name.len());
    message.extend_from_slice(nonce);
    message.extend_from_slice(name.as_bytes());
    key.verify(&message, &Signature::from_bytes(signature))
        .is_ok()
}

/// Generate a random auth nonce from the OS CSPRNG.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
