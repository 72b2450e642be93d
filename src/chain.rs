//! The chain engine: loads the local chain file, verifies genesis, replays
//! blocks to derive account state, and accepts newly mined blocks.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::account_store::{reward_for_height, AccountError, AccountStore};
use crate::codec::{self, decode_list, CodecError};
use crate::mempool::TransactionPool;
use crate::types::{Block, Hash};
use crate::validator::{self, ValidationError};

/// Fixed proof-of-work target for every non-genesis block.
pub const CURRENT_DIFFICULTY: u8 = 20;

/// The fixed hash the genesis block's own hash must equal.
pub const GENESIS_HASH: Hash = [
    0x00, 0x00, 0x03, 0xd7, 0xff, 0xfe, 0xf8, 0xec, 0xdc, 0xdc, 0x56, 0x37, 0x88, 0x55, 0xc9, 0x71,
    0x73, 0x43, 0xd3, 0x95, 0xe5, 0xca, 0x5e, 0x7e, 0xf1, 0x4f, 0x39, 0xa8, 0x1c, 0xcc, 0x1c, 0xa9,
];

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("chain file is corrupted: {0}")]
    Codec(#[from] CodecError),
    #[error("genesis block is corrupted: expected hash {expected}, got {actual}")]
    CorruptedGenesisBlock { expected: String, actual: String },
    #[error("genesis block's prev_hash does not reference the GENESIS sentinel (block {hash})")]
    UnknownGenesisBlock { hash: String },
    #[error("chain is corrupted at block {hash}: {reason}")]
    CorruptedChain { hash: String, reason: String },
    #[error("account state error: {0}")]
    Account(#[from] AccountError),
    #[error("submitted block does not chain onto the current head")]
    InvalidPrevBlock,
    #[error("submitted block does not target the current difficulty")]
    InvalidDifficulty,
    #[error("block validation failed: {0}")]
    Validation(#[from] ValidationError),
}

fn hex(hash: &Hash) -> String {
    ::hex::encode(hash)
}

/// `SHA256("GENESIS")`, the `prev_hash` every genesis block must carry.
pub fn genesis_sentinel() -> Hash {
    crate::crypto::sha256(b"GENESIS")
}

/// In-memory chain state plus its on-disk backing file. Blocks are held
/// newest-first, matching the on-disk order.
pub struct Chain {
    file_path: PathBuf,
    blocks: Vec<Block>,
    height: u64,
}

impl Chain {
    /// Startup replay: ensure the directory exists, decode the chain file
    /// if present, verify every block (genesis by pinned hash, everything
    /// else through the full validator), and fold the transactions into a
    /// freshly derived `AccountStore`.
    pub fn load(db_dir: &Path, accounts: &mut AccountStore) -> Result<Self, ChainError> {
        fs::create_dir_all(db_dir)?;
        let file_path = db_dir.join("blockchain.db");

        if !file_path.exists() {
            info!("no chain file at {:?}; starting from an empty chain", file_path);
            return Ok(Chain {
                file_path,
                blocks: Vec::new(),
                height: 0,
            });
        }

        let bytes = fs::read(&file_path)?;
        // On disk the list is newest-first; decode_list's reverse-on-decode
        // convention hands back oldest-first, which is exactly the order
        // replay needs.
        let (oldest_first, _leftover): (Vec<Block>, _) = decode_list(&bytes)?;

        let mut prev_hash = genesis_sentinel();
        let mut height: u64 = 1;

        for (i, block) in oldest_first.iter().enumerate() {
            if i == 0 {
                if block.header.prev_hash != genesis_sentinel() {
                    error!(hash = %hex(&block.hash()), "genesis block's prev_hash is not the GENESIS sentinel");
                    return Err(ChainError::UnknownGenesisBlock {
                        hash: hex(&block.hash()),
                    });
                }
                let actual = block.hash();
                if actual != GENESIS_HASH {
                    error!(expected = %hex(&GENESIS_HASH), actual = %hex(&actual), "genesis block hash mismatch");
                    return Err(ChainError::CorruptedGenesisBlock {
                        expected: hex(&GENESIS_HASH),
                        actual: hex(&actual),
                    });
                }
                // Genesis is identified by its pinned hash, not PoW or
                // signature.
            } else {
                if block.header.prev_hash != prev_hash {
                    let hash = hex(&block.hash());
                    error!(%hash, "chain linkage broken during replay");
                    return Err(ChainError::CorruptedChain {
                        hash,
                        reason: "prev_hash does not match the immediately preceding block".into(),
                    });
                }
                if let Err(e) = validator::verify(block, accounts) {
                    let hash = hex(&block.hash());
                    error!(%hash, error = %e, "block failed validation during replay");
                    return Err(ChainError::CorruptedChain {
                        hash,
                        reason: e.to_string(),
                    });
                }
            }

            for tx in &block.body {
                if let Err(e) = accounts.apply_transaction_body(&tx.body, &block.header.miner_pub_key) {
                    let hash = hex(&block.hash());
                    error!(%hash, error = %e, "transaction failed to apply during replay");
                    return Err(ChainError::CorruptedChain {
                        hash,
                        reason: e.to_string(),
                    });
                }
            }
            if let Err(e) = accounts.reward_miner(&block.header.miner_pub_key, reward_for_height(height)) {
                let hash = hex(&block.hash());
                error!(%hash, error = %e, "block reward failed to apply during replay");
                return Err(ChainError::CorruptedChain {
                    hash,
                    reason: e.to_string(),
                });
            }

            prev_hash = block.hash();
            height += 1;
        }

        debug!(blocks = oldest_first.len(), "chain replay complete");

        // Keep the in-memory representation newest-first.
        let mut newest_first = oldest_first;
        newest_first.reverse();
        let height = newest_first.len() as u64;

        Ok(Chain {
            file_path,
            blocks: newest_first,
            height,
        })
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// `SHA256("GENESIS")` if the chain is empty; else the hash of the
    /// current head.
    pub fn newest_hash(&self) -> Hash {
        self.blocks.first().map(|b| b.hash()).unwrap_or_else(genesis_sentinel)
    }

    pub fn current_difficulty(&self) -> u8 {
        CURRENT_DIFFICULTY
    }

    pub fn head(&self) -> Option<&Block> {
        self.blocks.first()
    }

    pub fn blocks_newest_first(&self) -> &[Block] {
        &self.blocks
    }

    /// Accept a freshly mined block. Commits disk first, then memory: if
    /// the process dies between the file append and the in-memory update,
    /// the chain file remains the sole source of truth and a restart's
    /// replay recovers correctly.
    pub fn register_mined(
        &mut self,
        block: Block,
        accounts: &mut AccountStore,
        mempool: &mut TransactionPool,
    ) -> Result<(), ChainError> {
        if block.header.prev_hash != self.newest_hash() {
            return Err(ChainError::InvalidPrevBlock);
        }
        if block.header.difficulty != self.current_difficulty() {
            return Err(ChainError::InvalidDifficulty);
        }
        validator::verify(&block, accounts)?;

        self.append_to_file(&block)?;

        self.blocks.insert(0, block.clone());
        self.height += 1;

        for tx in &block.body {
            accounts.apply_transaction_body(&tx.body, &block.header.miner_pub_key)?;
        }
        accounts.reward_miner(&block.header.miner_pub_key, reward_for_height(self.height))?;

        mempool.remove_confirmed(&block.body, accounts);

        info!(height = self.height, hash = %hex(&block.hash()), "accepted mined block");
        Ok(())
    }

    /// Append protocol: on first write, emit the list prefix `1` followed
    /// by the block; otherwise read the `u64` count, write the new block's
    /// bytes at EOF, then rewrite the count in place.
    fn append_to_file(&self, block: &Block) -> Result<(), ChainError> {
        let block_bytes = codec::serialize(block);

        if !self.file_path.exists() || fs::metadata(&self.file_path)?.len() == 0 {
            let mut out = Vec::new();
            out.extend_from_slice(&1u64.to_be_bytes());
            out.extend_from_slice(&block_bytes);
            fs::write(&self.file_path, out)?;
            return Ok(());
        }

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.file_path)?;

        let mut count_bytes = [0u8; 8];
        file.read_exact(&mut count_bytes)?;
        let count = u64::from_be_bytes(count_bytes);

        file.seek(SeekFrom::End(0))?;
        file.write_all(&block_bytes)?;

        let new_count = count + 1;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&new_count.to_be_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ecdsa_generate, sha256};
    use crate::types::{miner_proof, BlockHeader};
    use tempfile::tempdir;

    fn empty_signed_block(
        prev_hash: Hash,
        difficulty: u8,
        miner_pub_key: crate::crypto::PublicKey,
        miner_priv_key: &crate::crypto::PrivateKey,
        nonce_start: u64,
    ) -> Block {
        let proof = miner_proof(miner_priv_key, &miner_pub_key);
        let header = BlockHeader {
            prev_hash,
            difficulty,
            nonce: nonce_start,
            miner_pub_key,
            miner_proof_of_priv_key: proof,
            chain_state_merkle_hash: [0; 32],
            transactions_merkle_hash: [0; 32],
        };
        let mut block = Block {
            header,
            body: vec![],
        };
        while validator::verify_pow(&block).is_err() {
            block.header.nonce += 1;
        }
        block
    }

    #[test]
    fn empty_chain_newest_hash_is_genesis_sentinel() {
        let dir = tempdir().unwrap();
        let mut accounts = AccountStore::new();
        let chain = Chain::load(dir.path(), &mut accounts).unwrap();
        assert_eq!(chain.newest_hash(), genesis_sentinel());
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn register_mined_rejects_wrong_prev_hash() {
        let dir = tempdir().unwrap();
        let mut accounts = AccountStore::new();
        let mut chain = Chain::load(dir.path(), &mut accounts).unwrap();
        let mut mempool = TransactionPool::new();

        let (miner_pub, miner_priv) = ecdsa_generate();
        let block = empty_signed_block([9; 32], CURRENT_DIFFICULTY, miner_pub, &miner_priv, 0);

        let err = chain
            .register_mined(block, &mut accounts, &mut mempool)
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidPrevBlock));
    }

    #[test]
    fn register_mined_rejects_wrong_difficulty() {
        let dir = tempdir().unwrap();
        let mut accounts = AccountStore::new();
        let mut chain = Chain::load(dir.path(), &mut accounts).unwrap();
        let mut mempool = TransactionPool::new();

        let (miner_pub, miner_priv) = ecdsa_generate();
        let block = empty_signed_block(chain.newest_hash(), 5, miner_pub, &miner_priv, 0);

        let err = chain
            .register_mined(block, &mut accounts, &mut mempool)
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidDifficulty));
    }

    #[test]
    fn genesis_sentinel_is_sha256_of_literal_genesis() {
        assert_eq!(genesis_sentinel(), sha256(b"GENESIS"));
    }

    #[test]
    fn register_mined_rejects_cumulative_overspend_with_no_partial_commit() {
        let dir = tempdir().unwrap();
        let mut accounts = AccountStore::new();
        let mut chain = Chain::load(dir.path(), &mut accounts).unwrap();
        let mut mempool = TransactionPool::new();

        let (a_pub, a_priv) = ecdsa_generate();
        let (b_pub, _) = ecdsa_generate();
        let (miner_pub, miner_priv) = ecdsa_generate();
        accounts.reward_miner(&a_pub, 100).unwrap();

        // Each transfer is individually valid against A's pre-block
        // balance of 100, but together they debit 120.
        let tx1 = crate::types::Transaction::sign(
            crate::types::TransactionBody {
                from: a_pub,
                to: b_pub,
                amount: 60,
                nonce: 1,
                transaction_fee: 0,
            },
            &a_priv,
        );
        let tx2 = crate::types::Transaction::sign(
            crate::types::TransactionBody {
                from: a_pub,
                to: b_pub,
                amount: 60,
                nonce: 2,
                transaction_fee: 0,
            },
            &a_priv,
        );

        let mut block = empty_signed_block(
            chain.newest_hash(),
            CURRENT_DIFFICULTY,
            miner_pub,
            &miner_priv,
            0,
        );
        block.body = vec![tx1, tx2];
        // Attaching the body changes the block hash, so the nonce found for
        // the empty body no longer necessarily meets the target; search again.
        while validator::verify_pow(&block).is_err() {
            block.header.nonce += 1;
        }

        let err = chain
            .register_mined(block, &mut accounts, &mut mempool)
            .unwrap_err();
        assert!(matches!(
            err,
            ChainError::Validation(ValidationError::InvalidBody(AccountError::InsufficientFunds))
        ));

        // Rejected entirely: no partial state, no half-written file, no
        // height bump.
        assert_eq!(chain.height(), 0);
        assert_eq!(accounts.get_balance(&a_pub), 100);
        assert_eq!(accounts.get_balance(&b_pub), 0);
        assert!(!dir.path().join("blockchain.db").exists());
    }
}
