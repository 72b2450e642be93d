//! Cryptographic primitives for the blockchain core.
//!
//! Everything the rest of the crate needs from cryptography funnels through
//! this module: SHA-256 hashing, ECDSA-over-secp256k1 signing and
//! verification, and secure randomness. Public keys are always the 65-byte
//! uncompressed SEC1 encoding, never mixed with the 33-byte compressed
//! form.

use rand::RngCore;
use secp256k1::ecdsa::Signature as Secp256k1Signature;
use secp256k1::rand::rngs::OsRng;
use secp256k1::{Message, PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const PUBLIC_KEY_LEN: usize = 65;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid private key bytes")]
    InvalidPrivateKey,
}

/// An uncompressed secp256k1 public key, the address type used throughout
/// the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Result<Self, CryptoError> {
        // Round-trip through secp256k1 to reject points not on the curve.
        Secp256k1PublicKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(PublicKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0
    }

    fn to_secp(self) -> Result<Secp256k1PublicKey, CryptoError> {
        Secp256k1PublicKey::from_slice(&self.0).map_err(|_| CryptoError::InvalidPublicKey)
    }
}

/// An secp256k1 private key, held only by the wallet.
#[derive(Clone)]
pub struct PrivateKey(SecretKey);

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        SecretKey::from_slice(bytes)
            .map(PrivateKey)
            .map_err(|_| CryptoError::InvalidPrivateKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.secret_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::new();
        let pk = Secp256k1PublicKey::from_secret_key(&secp, &self.0);
        PublicKey(pk.serialize_uncompressed())
    }
}

/// A variable-length DER-encoded ECDSA signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// SHA-256 of an arbitrary byte string.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Sign a 32-byte digest with an ECDSA private key. The caller is
/// responsible for hashing the actual message first (`sha256`); this
/// function never hashes internally.
pub fn ecdsa_sign(private_key: &PrivateKey, digest: &[u8; 32]) -> Signature {
    let secp = Secp256k1::new();
    let message =
        Message::from_digest_slice(digest).expect("digest is always exactly 32 bytes");
    let sig = secp.sign_ecdsa(&message, &private_key.0);
    Signature(sig.serialize_der().to_vec())
}

/// Verify an ECDSA signature over a 32-byte digest.
pub fn ecdsa_verify(public_key: &PublicKey, digest: &[u8; 32], signature: &Signature) -> bool {
    let secp = Secp256k1::new();
    let pk = match public_key.to_secp() {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let sig = match Secp256k1Signature::from_der(&signature.0) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    let message = match Message::from_digest_slice(digest) {
        Ok(message) => message,
        Err(_) => return false,
    };
    secp.verify_ecdsa(&message, &sig, &pk).is_ok()
}

/// Generate a fresh secp256k1 keypair using the OS CSPRNG.
pub fn ecdsa_generate() -> (PublicKey, PrivateKey) {
    let secp = Secp256k1::new();
    let mut rng = OsRng;
    let (secret_key, public_key) = secp.generate_keypair(&mut rng);
    (
        PublicKey(public_key.serialize_uncompressed()),
        PrivateKey(secret_key),
    )
}

/// Fill `n` bytes from the OS CSPRNG.
pub fn secure_random(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Draw a random 64-bit transaction nonce, as the wallet does when
/// assembling a new transfer.
pub fn random_nonce() -> u64 {
    rand::rngs::OsRng.next_u64()
}
