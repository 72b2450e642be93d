//! The local wallet of signing keys: a concrete, runnable key store so the
//! crate is a complete node rather than a library with no key material.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::crypto::{self, PrivateKey, PublicKey, Signature};
use crate::types::{Transaction, TransactionBody};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wallet file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wallet file entry is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("wallet file entry has the wrong key length")]
    InvalidKeyLength,
    #[error("cryptographic error: {0}")]
    Crypto(#[from] crypto::CryptoError),
    #[error("no keypair with id {0} in this wallet")]
    UnknownKeyId(u32),
}

/// One row of the wallet file: `[id, base64(pub_key), base64(priv_key)]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletEntry(u32, String, String);

pub struct Wallet {
    path: PathBuf,
    keypairs: Vec<(u32, PublicKey, PrivateKey)>,
}

impl Wallet {
    /// Load `<NODE_STORE>/wallet.dat` if present, or start an empty wallet
    /// that will be created on first save.
    pub fn open_or_create(path: &Path) -> Result<Self, WalletError> {
        if !path.exists() {
            return Ok(Wallet {
                path: path.to_path_buf(),
                keypairs: Vec::new(),
            });
        }

        let contents = fs::read_to_string(path)?;
        let entries: Vec<WalletEntry> = serde_json::from_str(&contents)?;
        let b64 = base64::engine::general_purpose::STANDARD;

        let mut keypairs = Vec::with_capacity(entries.len());
        for WalletEntry(id, pub_b64, priv_b64) in entries {
            let pub_bytes = b64.decode(pub_b64)?;
            let priv_bytes = b64.decode(priv_b64)?;
            let pub_key = PublicKey::from_bytes(
                pub_bytes
                    .try_into()
                    .map_err(|_| WalletError::InvalidKeyLength)?,
            )?;
            let priv_key = PrivateKey::from_bytes(&priv_bytes)?;
            keypairs.push((id, pub_key, priv_key));
        }

        Ok(Wallet {
            path: path.to_path_buf(),
            keypairs,
        })
    }

    fn save(&self) -> Result<(), WalletError> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let entries: Vec<WalletEntry> = self
            .keypairs
            .iter()
            .map(|(id, pk, sk)| {
                WalletEntry(*id, b64.encode(pk.to_bytes()), b64.encode(sk.to_bytes()))
            })
            .collect();
        let json = serde_json::to_string_pretty(&entries)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Generate a fresh keypair, persist it, and return its id.
    pub fn generate_keypair(&mut self) -> Result<u32, WalletError> {
        let (pk, sk) = crypto::ecdsa_generate();
        let id = self.keypairs.last().map(|(id, _, _)| id + 1).unwrap_or(0);
        self.keypairs.push((id, pk, sk));
        self.save()?;
        info!(id, "generated new wallet keypair");
        Ok(id)
    }

    /// The first keypair in the wallet, generating one on first use: the
    /// miner and the default sender both need *some* keypair to start from.
    pub fn default_keypair(&mut self) -> Result<(u32, PublicKey), WalletError> {
        if self.keypairs.is_empty() {
            self.generate_keypair()?;
        }
        let (id, pk, _) = self.keypairs[0];
        Ok((id, pk))
    }

    pub fn public_key(&self, id: u32) -> Result<PublicKey, WalletError> {
        self.keypairs
            .iter()
            .find(|(entry_id, _, _)| *entry_id == id)
            .map(|(_, pk, _)| *pk)
            .ok_or(WalletError::UnknownKeyId(id))
    }

    fn private_key(&self, id: u32) -> Result<&PrivateKey, WalletError> {
        self.keypairs
            .iter()
            .find(|(entry_id, _, _)| *entry_id == id)
            .map(|(_, _, sk)| sk)
            .ok_or(WalletError::UnknownKeyId(id))
    }

    /// Sign a transfer from the keypair `from_id`. The body's nonce is
    /// left as whatever the caller chose: the *caller* (usually a retry
    /// loop around `Mempool::register`) is expected to pick a fresh random
    /// nonce on `InvalidNonce` and call this again, which is why this
    /// function takes the nonce rather than generating one itself.
    pub fn sign_transfer(
        &self,
        from_id: u32,
        to: PublicKey,
        amount: u64,
        nonce: u64,
        transaction_fee: u64,
    ) -> Result<Transaction, WalletError> {
        let from = self.public_key(from_id)?;
        let priv_key = self.private_key(from_id)?;
        let body = TransactionBody {
            from,
            to,
            amount,
            nonce,
            transaction_fee,
        };
        Ok(Transaction::sign(body, priv_key))
    }

    /// `(miner_pub_key, ECDSA_sign(priv, SHA256(pub)))`.
    pub fn miner_proof(&self, id: u32) -> Result<(PublicKey, Signature), WalletError> {
        let pk = self.public_key(id)?;
        let priv_key = self.private_key(id)?;
        Ok((pk, crate::types::miner_proof(priv_key, &pk)))
    }
}
