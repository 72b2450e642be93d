//! The reference miner: a synchronous proof-of-work search over a mempool
//! snapshot. Mining is the one operation in this crate with no hard
//! deadline, so it is the one place a caller is expected to run on a
//! dedicated thread and cancel cooperatively.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::account_store::AccountStore;
use crate::chain::Chain;
use crate::types::{Block, Hash, Transaction, BlockHeader, MAX_TRANSACTIONS_PER_BLOCK};
use crate::validator;
use crate::wallet::{Wallet, WalletError};

#[derive(Debug, Error)]
pub enum MinerError {
    #[error("mining was cancelled before a valid nonce was found")]
    Cancelled,
    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),
}

/// Assemble a candidate block from up to [`MAX_TRANSACTIONS_PER_BLOCK`]
/// mempool entries and search for a nonce satisfying the chain's current
/// difficulty. Checks `cancel` between attempts; stopping mid-search
/// returns [`MinerError::Cancelled`] rather than a half-mined block.
pub fn mine_block(
    chain: &Chain,
    accounts: &AccountStore,
    mempool_snapshot: HashMap<Hash, Transaction>,
    wallet: &Wallet,
    miner_key_id: u32,
    cancel: &Arc<AtomicBool>,
) -> Result<Block, MinerError> {
    let (miner_pub_key, miner_proof_of_priv_key) = wallet.miner_proof(miner_key_id)?;

    // The snapshot can be stale by the time mining starts, and two pending
    // transactions from the same sender can each be individually valid yet
    // jointly overspend; apply candidates one at a time to a scratch copy
    // of the account store and keep only the ones that still succeed, so
    // the assembled body is exactly what `register_mined` is guaranteed to
    // accept rather than something it might reject outright.
    let mut scratch = accounts.clone();
    let mut body = Vec::new();
    for tx in mempool_snapshot.into_values() {
        if body.len() >= MAX_TRANSACTIONS_PER_BLOCK {
            break;
        }
        if scratch.apply_transaction_body(&tx.body, &miner_pub_key).is_ok() {
            body.push(tx);
        }
    }

    let header = BlockHeader {
        prev_hash: chain.newest_hash(),
        difficulty: chain.current_difficulty(),
        nonce: 0,
        miner_pub_key,
        miner_proof_of_priv_key,
        // Merkle fields are carried opaquely and never recomputed or
        // verified by this implementation.
        chain_state_merkle_hash: [0; 32],
        transactions_merkle_hash: [0; 32],
    };
    let mut block = Block { header, body };

    debug!(difficulty = block.header.difficulty, txs = block.body.len(), "starting mining attempt");

    let mut attempts: u64 = 0;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(MinerError::Cancelled);
        }
        if validator::verify_pow(&block).is_ok() {
            info!(nonce = block.header.nonce, attempts, "found a valid nonce");
            return Ok(block);
        }
        block.header.nonce = block.header.nonce.wrapping_add(1);
        attempts += 1;
    }
}
