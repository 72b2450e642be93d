//! The mempool: the set of signature- and body-verified transactions that
//! have not yet been included in any accepted block.

use std::collections::HashMap;

use thiserror::Error;

use crate::account_store::{AccountError, AccountStore};
use crate::types::{Hash, Transaction};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction signature does not verify")]
    InvalidSignature,
    #[error("transaction body failed validation: {0}")]
    InvalidBody(#[from] AccountError),
}

/// A transaction accepted into the pool.
#[derive(Debug, PartialEq, Eq)]
pub struct Registered;

#[derive(Debug, Default)]
pub struct TransactionPool {
    pending: HashMap<Hash, Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        TransactionPool {
            pending: HashMap::new(),
        }
    }

    /// Verify signature then body against the current account store; on
    /// success, insert under `hash(tx)`. A duplicate hash silently
    /// overwrites the existing entry.
    pub fn register(
        &mut self,
        tx: Transaction,
        accounts: &AccountStore,
    ) -> Result<Registered, MempoolError> {
        if !tx.verify_signature() {
            return Err(MempoolError::InvalidSignature);
        }
        accounts.verify_transaction_body(&tx.body)?;
        self.pending.insert(tx.hash(), tx);
        Ok(Registered)
    }

    /// A cheap read of the current pending set, for the miner to assemble
    /// a candidate block from.
    pub fn snapshot(&self) -> HashMap<Hash, Transaction> {
        self.pending.clone()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Delete the given transactions by hash, then re-verify the rest
    /// against the now-current account store.
    pub fn remove_confirmed(&mut self, confirmed: &[Transaction], accounts: &AccountStore) {
        for tx in confirmed {
            self.pending.remove(&tx.hash());
        }
        self.reverify(accounts);
    }

    /// Drop any entry whose body no longer validates against `accounts`.
    /// Signatures are never re-checked: they cannot become invalid once
    /// verified. Snapshot-then-mutate so dropping mid-pass is safe.
    pub fn reverify(&mut self, accounts: &AccountStore) {
        let stale: Vec<Hash> = self
            .pending
            .iter()
            .filter(|(_, tx)| accounts.verify_transaction_body(&tx.body).is_err())
            .map(|(hash, _)| *hash)
            .collect();
        for hash in stale {
            self.pending.remove(&hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ecdsa_generate;

    // AccountStore has no direct "mint" operation in its public API; tests
    // route an initial balance in through reward_miner, the only operation
    // that ever creates new supply out of thin air.
    fn credit(store: &mut AccountStore, pk: &crate::crypto::PublicKey, amount: u64) {
        store.reward_miner(pk, amount).unwrap();
    }

    #[test]
    fn mempool_evicts_after_confirming_block() {
        let (a_pub, a_priv) = ecdsa_generate();
        let (b_pub, _) = ecdsa_generate();
        let (c_pub, _) = ecdsa_generate();
        let (miner, _) = ecdsa_generate();

        let mut accounts = AccountStore::new();
        credit(&mut accounts, &a_pub, 100);

        let tx1 = Transaction::sign(
            crate::types::TransactionBody {
                from: a_pub,
                to: b_pub,
                amount: 50,
                nonce: 1,
                transaction_fee: 0,
            },
            &a_priv,
        );
        let tx2 = Transaction::sign(
            crate::types::TransactionBody {
                from: a_pub,
                to: c_pub,
                amount: 60,
                nonce: 2,
                transaction_fee: 0,
            },
            &a_priv,
        );

        let mut pool = TransactionPool::new();
        pool.register(tx1.clone(), &accounts).unwrap();
        pool.register(tx2.clone(), &accounts).unwrap();
        assert_eq!(pool.len(), 2);

        // Accept a block containing only tx1.
        accounts.apply_transaction_body(&tx1.body, &miner).unwrap();
        pool.remove_confirmed(&[tx1], &accounts);

        assert_eq!(accounts.get_balance(&a_pub), 50);
        assert_eq!(pool.len(), 0, "tx2 must be evicted as InsufficientFunds");
    }

    #[test]
    fn register_rejects_invalid_signature() {
        let (a_pub, a_priv) = ecdsa_generate();
        let (b_pub, _) = ecdsa_generate();
        let mut accounts = AccountStore::new();
        credit(&mut accounts, &a_pub, 100);

        let mut tx = Transaction::sign(
            crate::types::TransactionBody {
                from: a_pub,
                to: b_pub,
                amount: 10,
                nonce: 1,
                transaction_fee: 0,
            },
            &a_priv,
        );
        tx.body.amount = 99;

        let mut pool = TransactionPool::new();
        assert_eq!(
            pool.register(tx, &accounts).unwrap_err(),
            MempoolError::InvalidSignature
        );
    }

    #[test]
    fn duplicate_hash_overwrites() {
        let (a_pub, a_priv) = ecdsa_generate();
        let (b_pub, _) = ecdsa_generate();
        let mut accounts = AccountStore::new();
        credit(&mut accounts, &a_pub, 100);

        let tx = Transaction::sign(
            crate::types::TransactionBody {
                from: a_pub,
                to: b_pub,
                amount: 10,
                nonce: 1,
                transaction_fee: 0,
            },
            &a_priv,
        );

        let mut pool = TransactionPool::new();
        pool.register(tx.clone(), &accounts).unwrap();
        pool.register(tx, &accounts).unwrap();
        assert_eq!(pool.len(), 1);
    }
}
