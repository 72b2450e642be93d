//! `Node`: the single coordinator that owns every store this crate has and
//! is the only thing allowed to mutate more than one of them at a time.
//!
//! Lock order is fixed crate-wide (chain, then accounts, then mempool) to
//! rule out deadlock between [`Node::register_mined`] and
//! [`Node::submit_transaction`] running concurrently.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tracing::info;

use crate::account_store::{AccountError, AccountStore};
use crate::chain::{Chain, ChainError};
use crate::crypto::PublicKey;
use crate::mempool::{MempoolError, Registered, TransactionPool};
use crate::miner::{self, MinerError};
use crate::types::{Block, Transaction};
use crate::wallet::{Wallet, WalletError};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Miner(#[from] MinerError),
}

pub struct Node {
    chain: Mutex<Chain>,
    accounts: RwLock<AccountStore>,
    mempool: RwLock<TransactionPool>,
    wallet: Mutex<Wallet>,
}

impl Node {
    /// Open (or initialize) a node rooted at `node_store`: load the wallet,
    /// then replay the chain file to derive account state.
    pub fn open(node_store: &Path) -> Result<Self, NodeError> {
        let wallet = Wallet::open_or_create(&crate::config::wallet_path(node_store))?;

        let mut accounts = AccountStore::new();
        let chain = Chain::load(&crate::config::db_dir(node_store), &mut accounts)?;

        info!(height = chain.height(), "node opened");

        Ok(Node {
            chain: Mutex::new(chain),
            accounts: RwLock::new(accounts),
            mempool: RwLock::new(TransactionPool::new()),
            wallet: Mutex::new(wallet),
        })
    }

    pub fn submit_transaction(&self, tx: Transaction) -> Result<Registered, NodeError> {
        let accounts = self.accounts.read().expect("account store lock poisoned");
        let mut mempool = self.mempool.write().expect("mempool lock poisoned");
        Ok(mempool.register(tx, &accounts)?)
    }

    pub fn balance(&self, pk: &PublicKey) -> u64 {
        self.accounts
            .read()
            .expect("account store lock poisoned")
            .get_balance(pk)
    }

    pub fn height(&self) -> u64 {
        self.chain.lock().expect("chain lock poisoned").height()
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.read().expect("mempool lock poisoned").len()
    }

    pub fn wallet_public_key(&self, id: u32) -> Result<PublicKey, NodeError> {
        Ok(self
            .wallet
            .lock()
            .expect("wallet lock poisoned")
            .public_key(id)?)
    }

    pub fn wallet_default_keypair(&self) -> Result<(u32, PublicKey), NodeError> {
        Ok(self
            .wallet
            .lock()
            .expect("wallet lock poisoned")
            .default_keypair()?)
    }

    pub fn wallet_generate_keypair(&self) -> Result<u32, NodeError> {
        Ok(self
            .wallet
            .lock()
            .expect("wallet lock poisoned")
            .generate_keypair()?)
    }

    /// Number of times [`Node::send`] retries with a fresh nonce after an
    /// `InvalidNonce` rejection before giving up.
    const MAX_NONCE_RETRIES: u32 = 8;

    /// Sign a transfer with a wallet key and submit it to the mempool in
    /// one step; the caller does not need to reach through to the wallet
    /// itself for ordinary sends. On `InvalidNonce` (an unlucky collision
    /// with an already-spent nonce for this sender) this draws a fresh
    /// random nonce and retries, exactly as the wallet is specified to do.
    pub fn send(
        &self,
        from_id: u32,
        to: PublicKey,
        amount: u64,
        transaction_fee: u64,
    ) -> Result<Registered, NodeError> {
        for _ in 0..Self::MAX_NONCE_RETRIES {
            let nonce = crate::crypto::random_nonce();
            let tx = {
                let wallet = self.wallet.lock().expect("wallet lock poisoned");
                wallet.sign_transfer(from_id, to, amount, nonce, transaction_fee)?
            };
            match self.submit_transaction(tx) {
                Err(NodeError::Mempool(MempoolError::InvalidBody(AccountError::InvalidNonce))) => {
                    continue;
                }
                other => return other,
            }
        }
        Err(NodeError::Mempool(MempoolError::InvalidBody(
            AccountError::InvalidNonce,
        )))
    }

    /// Run one synchronous mining attempt against the current mempool and
    /// account snapshot, then hand the mined block straight to
    /// [`Node::register_mined`]. `cancel` lets a caller on another thread
    /// abort a long-running search.
    pub fn mine_once(&self, miner_key_id: u32, cancel: &Arc<AtomicBool>) -> Result<Block, NodeError> {
        let block = {
            let chain = self.chain.lock().expect("chain lock poisoned");
            let accounts = self.accounts.read().expect("account store lock poisoned");
            let mempool_snapshot = self.mempool.read().expect("mempool lock poisoned").snapshot();
            let wallet = self.wallet.lock().expect("wallet lock poisoned");
            miner::mine_block(&chain, &accounts, mempool_snapshot, &wallet, miner_key_id, cancel)?
        };
        self.register_mined(block.clone())?;
        Ok(block)
    }

    /// The single method that ever mutates chain, accounts, and mempool
    /// together. Holding all three locks for the duration is what makes the
    /// transition atomic from every other caller's point of view; disk is
    /// committed before any in-memory state changes.
    pub fn register_mined(&self, block: Block) -> Result<(), NodeError> {
        let mut chain = self.chain.lock().expect("chain lock poisoned");
        let mut accounts = self.accounts.write().expect("account store lock poisoned");
        let mut mempool = self.mempool.write().expect("mempool lock poisoned");
        chain.register_mined(block, &mut accounts, &mut mempool)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_on_empty_directory_starts_at_height_zero() {
        let dir = tempdir().unwrap();
        let node = Node::open(dir.path()).unwrap();
        assert_eq!(node.height(), 0);
        assert_eq!(node.mempool_len(), 0);
    }

    #[test]
    fn mine_once_advances_height_and_pays_the_miner() {
        let dir = tempdir().unwrap();
        let node = Node::open(dir.path()).unwrap();
        let (miner_id, miner_pub) = node.wallet_default_keypair().unwrap();

        let cancel = Arc::new(AtomicBool::new(false));
        node.mine_once(miner_id, &cancel).unwrap();

        assert_eq!(node.height(), 1);
        assert_eq!(node.balance(&miner_pub), 5_000_000);
    }

    #[test]
    fn send_then_mine_moves_the_balance() {
        let dir = tempdir().unwrap();
        let node = Node::open(dir.path()).unwrap();
        let (miner_id, _) = node.wallet_default_keypair().unwrap();
        let to_id = node.wallet_generate_keypair().unwrap();
        let to_pub = node.wallet_public_key(to_id).unwrap();

        let cancel = Arc::new(AtomicBool::new(false));
        node.mine_once(miner_id, &cancel).unwrap();

        node.send(miner_id, to_pub, 1000, 0).unwrap();
        assert_eq!(node.mempool_len(), 1);

        node.mine_once(miner_id, &cancel).unwrap();
        assert_eq!(node.balance(&to_pub), 1000);
        assert_eq!(node.mempool_len(), 0);
    }

    #[test]
    fn reopening_replays_the_chain_file() {
        let dir = tempdir().unwrap();
        let miner_pub;
        {
            let node = Node::open(dir.path()).unwrap();
            let (miner_id, pk) = node.wallet_default_keypair().unwrap();
            miner_pub = pk;
            let cancel = Arc::new(AtomicBool::new(false));
            node.mine_once(miner_id, &cancel).unwrap();
        }

        let reopened = Node::open(dir.path()).unwrap();
        assert_eq!(reopened.height(), 1);
        assert_eq!(reopened.balance(&miner_pub), 5_000_000);
    }
}
