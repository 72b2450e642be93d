//! Core data structures for the blockchain: transactions, blocks, and the
//! account model they mutate.
//!
//! This module only defines shapes and the handful of pure functions tied
//! directly to a value's identity (hashing, signing, verifying a single
//! transaction's signature). Validation against chain/account state lives
//! in [`crate::account_store`] and [`crate::validator`].

use std::collections::BTreeSet;

use crate::codec::serialize;
use crate::crypto::{self, PrivateKey, PublicKey, Signature};

pub type Hash = [u8; 32];

/// The body of a transaction: who is paying whom, how much, and the
/// sender-chosen nonce that makes the transaction unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBody {
    pub from: PublicKey,
    pub to: PublicKey,
    pub amount: u64,
    pub nonce: u64,
    pub transaction_fee: u64,
}

impl TransactionBody {
    /// `SHA256(serialize(body))`, the digest that gets signed.
    pub fn signing_digest(&self) -> Hash {
        crypto::sha256(&serialize(self))
    }
}

/// A signed transaction. Hash identity is `SHA256(serialize(Transaction))`,
/// distinct from the body's signing digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub body: TransactionBody,
    pub signature: Signature,
}

impl Transaction {
    pub fn sign(body: TransactionBody, private_key: &PrivateKey) -> Self {
        let digest = body.signing_digest();
        let signature = crypto::ecdsa_sign(private_key, &digest);
        Transaction { body, signature }
    }

    /// `ECDSA_verify(body.from, SHA256(serialize(body)), signature)`.
    pub fn verify_signature(&self) -> bool {
        let digest = self.body.signing_digest();
        crypto::ecdsa_verify(&self.body.from, &digest, &self.signature)
    }

    pub fn hash(&self) -> Hash {
        crypto::sha256(&serialize(self))
    }
}

/// Maximum number of transactions a single block may carry.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub prev_hash: Hash,
    pub difficulty: u8,
    pub nonce: u64,
    pub miner_pub_key: PublicKey,
    pub miner_proof_of_priv_key: Signature,
    /// Reserved; never recomputed or verified.
    pub chain_state_merkle_hash: Hash,
    /// Reserved; never recomputed or verified.
    pub transactions_merkle_hash: Hash,
}

pub type BlockBody = Vec<Transaction>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    /// `SHA256(serialize(header) ++ serialize(body))`.
    pub fn hash(&self) -> Hash {
        crypto::sha256(&serialize(self))
    }

    /// `ECDSA_verify(header.miner_pub_key, SHA256(miner_pub_key), proof)`:
    /// the miner's self-proof that it holds the private key for the
    /// reward-receiving public key.
    pub fn verify_miner_proof(&self) -> bool {
        let digest = crypto::sha256(self.header.miner_pub_key.as_bytes());
        crypto::ecdsa_verify(
            &self.header.miner_pub_key,
            &digest,
            &self.header.miner_proof_of_priv_key,
        )
    }
}

/// Produce the miner's self-proof `ECDSA_sign(priv, SHA256(pub))`.
pub fn miner_proof(private_key: &PrivateKey, public_key: &PublicKey) -> Signature {
    let digest = crypto::sha256(public_key.as_bytes());
    crypto::ecdsa_sign(private_key, &digest)
}

/// Per-account state: balance and the set of nonces that have already been
/// spent, used to reject replays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: u64,
    pub spent_nonces: BTreeSet<u64>,
}
