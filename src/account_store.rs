//! The account-balance state machine: balance, nonce (anti-replay), and fee
//! invariants.
//!
//! `AccountStore` is the single owner of account state. Mutating methods are
//! exclusive (`&mut self`); callers wanting a single-writer/multi-reader
//! model wrap an `AccountStore` in a `RwLock` (see [`crate::node::Node`]).

use std::collections::HashMap;

use thiserror::Error;

use crate::crypto::PublicKey;
use crate::types::{Account, TransactionBody};

/// Reward halves every 1000 blocks, starting at 5,000,000.
const BASE_REWARD: u64 = 5_000_000;
const REWARD_HALVING_INTERVAL: u64 = 1_000;

/// `reward(height) = floor(5_000_000 / 2^floor(height / 1000))`, with
/// height 1-based and the genesis block at height 1.
pub fn reward_for_height(height: u64) -> u64 {
    let halvings = (height - 1) / REWARD_HALVING_INTERVAL;
    if halvings >= 64 {
        0
    } else {
        BASE_REWARD >> halvings
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("transaction amount must be greater than zero")]
    InvalidAmount,
    #[error("sender account has insufficient funds")]
    InsufficientFunds,
    #[error("nonce has already been spent by this account")]
    InvalidNonce,
    #[error("balance arithmetic overflowed")]
    Overflow,
}

#[derive(Debug, Default, Clone)]
pub struct AccountStore {
    accounts: HashMap<[u8; 65], Account>,
}

impl AccountStore {
    pub fn new() -> Self {
        AccountStore {
            accounts: HashMap::new(),
        }
    }

    fn key(pk: &PublicKey) -> [u8; 65] {
        pk.to_bytes()
    }

    /// Returns 0 for an account that has never been seen.
    pub fn get_balance(&self, pk: &PublicKey) -> u64 {
        self.accounts
            .get(&Self::key(pk))
            .map(|a| a.balance)
            .unwrap_or(0)
    }

    fn has_spent_nonce(&self, pk: &PublicKey, nonce: u64) -> bool {
        self.accounts
            .get(&Self::key(pk))
            .map(|a| a.spent_nonces.contains(&nonce))
            .unwrap_or(false)
    }

    /// Validate a transaction body against the current state without
    /// mutating anything.
    pub fn verify_transaction_body(&self, tb: &TransactionBody) -> Result<(), AccountError> {
        if tb.amount == 0 {
            return Err(AccountError::InvalidAmount);
        }

        if !self.accounts.contains_key(&Self::key(&tb.from)) {
            return Err(AccountError::InsufficientFunds);
        }

        // Widened arithmetic so a sum near u64::MAX can never wrap around
        // and spuriously pass the check.
        let required = tb.amount as u128 + tb.transaction_fee as u128;
        if required > self.get_balance(&tb.from) as u128 {
            return Err(AccountError::InsufficientFunds);
        }

        if self.has_spent_nonce(&tb.from, tb.nonce) {
            return Err(AccountError::InvalidNonce);
        }

        Ok(())
    }

    /// Apply a body whose signature has already been verified and which
    /// just passed [`Self::verify_transaction_body`]. Effects are applied
    /// atomically: either every field listed below changes, or (on
    /// overflow, which should be unreachable given the precondition) none
    /// of them do.
    pub fn apply_transaction_body(
        &mut self,
        tb: &TransactionBody,
        miner_pk: &PublicKey,
    ) -> Result<(), AccountError> {
        self.verify_transaction_body(tb)?;

        let debit = tb
            .amount
            .checked_add(tb.transaction_fee)
            .ok_or(AccountError::Overflow)?;

        let sender = self.accounts.entry(Self::key(&tb.from)).or_default();
        sender.balance = sender
            .balance
            .checked_sub(debit)
            .ok_or(AccountError::Overflow)?;
        sender.spent_nonces.insert(tb.nonce);

        let recipient = self.accounts.entry(Self::key(&tb.to)).or_default();
        recipient.balance = recipient
            .balance
            .checked_add(tb.amount)
            .ok_or(AccountError::Overflow)?;

        if tb.transaction_fee > 0 {
            let miner = self.accounts.entry(Self::key(miner_pk)).or_default();
            miner.balance = miner
                .balance
                .checked_add(tb.transaction_fee)
                .ok_or(AccountError::Overflow)?;
        }

        Ok(())
    }

    /// Credit the block reward to the miner, once per accepted block.
    pub fn reward_miner(&mut self, miner_pk: &PublicKey, value: u64) -> Result<(), AccountError> {
        let miner = self.accounts.entry(Self::key(miner_pk)).or_default();
        miner.balance = miner
            .balance
            .checked_add(value)
            .ok_or(AccountError::Overflow)?;
        Ok(())
    }

    /// Sum of every account's balance, used to check the supply-conservation
    /// invariant.
    pub fn total_supply(&self) -> u128 {
        self.accounts.values().map(|a| a.balance as u128).sum()
    }
}
