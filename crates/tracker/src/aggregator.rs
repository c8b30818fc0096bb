use common::classify::{ActionKind, Classified};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// One stake or unstake transaction, as applied to a wallet.
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub amount: Decimal,
    pub block: u64,
    pub timestamp: u64,
    pub hash: String,
}

/// Accumulated staking history for one wallet.
#[derive(Debug, Clone)]
pub struct WalletState {
    pub total_staked: Decimal,
    pub stake_count: u64,
    pub unstake_count: u64,
    pub is_active: bool,
    pub first_stake_time: Option<u64>,
    pub last_action_time: Option<u64>,
    pub stake_transactions: Vec<TxRecord>,
    pub unstake_attempts: Vec<TxRecord>,
}

impl Default for WalletState {
    fn default() -> Self {
        Self {
            total_staked: Decimal::ZERO,
            stake_count: 0,
            unstake_count: 0,
            is_active: true,
            first_stake_time: None,
            last_action_time: None,
            stake_transactions: Vec::new(),
            unstake_attempts: Vec::new(),
        }
    }
}

/// Scalar wallet fields recovered from a persisted leaderboard. Transaction
/// vectors are not persisted, so a restored wallet carries counts only.
#[derive(Debug, Clone)]
pub struct RestoredWallet {
    pub total_staked: Decimal,
    pub stake_count: u64,
    pub unstake_count: u64,
    pub is_active: bool,
    pub first_stake_time: Option<u64>,
    pub last_action_time: Option<u64>,
}

/// All wallet histories, keyed by lowercased address. `BTreeMap` keeps
/// iteration order stable so repeated runs over the same chain data produce
/// identical output files.
#[derive(Debug, Default)]
pub struct WalletTable {
    wallets: BTreeMap<String, WalletState>,
}

impl WalletTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one classified action into its wallet. Unstakes mark the wallet
    /// inactive but leave the staked total untouched; the unstaked amount is
    /// not recoverable from calldata alone.
    pub fn apply(&mut self, action: &Classified) {
        if action.address.is_empty() {
            return;
        }
        let wallet = self
            .wallets
            .entry(action.address.to_lowercase())
            .or_default();
        match action.kind {
            ActionKind::Stake => {
                wallet.total_staked += action.amount;
                wallet.stake_count += 1;
                wallet.is_active = true;
                wallet.first_stake_time = Some(match wallet.first_stake_time {
                    Some(t) => t.min(action.timestamp),
                    None => action.timestamp,
                });
                wallet.stake_transactions.push(TxRecord {
                    amount: action.amount,
                    block: action.block,
                    timestamp: action.timestamp,
                    hash: action.hash.clone(),
                });
            }
            ActionKind::Unstake => {
                wallet.unstake_count += 1;
                wallet.is_active = false;
                wallet.unstake_attempts.push(TxRecord {
                    amount: Decimal::ZERO,
                    block: action.block,
                    timestamp: action.timestamp,
                    hash: action.hash.clone(),
                });
            }
        }
        wallet.last_action_time = Some(match wallet.last_action_time {
            Some(t) => t.max(action.timestamp),
            None => action.timestamp,
        });
    }

    /// Seed a wallet from persisted scalar state before an incremental scan.
    pub fn restore(&mut self, address: &str, restored: RestoredWallet) {
        let wallet = self.wallets.entry(address.to_lowercase()).or_default();
        wallet.total_staked = restored.total_staked;
        wallet.stake_count = restored.stake_count;
        wallet.unstake_count = restored.unstake_count;
        wallet.is_active = restored.is_active;
        wallet.first_stake_time = restored.first_stake_time;
        wallet.last_action_time = restored.last_action_time;
    }

    pub fn get(&self, address: &str) -> Option<&WalletState> {
        self.wallets.get(&address.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WalletState)> {
        self.wallets.iter()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn clear(&mut self) {
        self.wallets.clear();
    }
}
