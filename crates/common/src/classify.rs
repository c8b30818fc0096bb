use crate::types::Transaction;
use rust_decimal::Decimal;
use std::collections::HashSet;

/// What a staking-contract transaction did, keyed off its 4-byte selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Stake,
    Unstake,
}

/// A transaction resolved into a wallet action. Addresses are lowercased so
/// the same wallet never splits into multiple entries.
#[derive(Debug, Clone)]
pub struct Classified {
    pub kind: ActionKind,
    pub address: String,
    pub amount: Decimal,
    pub block: u64,
    pub hash: String,
    pub timestamp: u64,
}

pub struct Classifier {
    stake_selector: String,
    unstake_selector: String,
}

impl Classifier {
    pub fn new(stake_selector: &str, unstake_selector: &str) -> Self {
        Self {
            stake_selector: stake_selector.to_lowercase(),
            unstake_selector: unstake_selector.to_lowercase(),
        }
    }

    /// Classify a transaction by input selector. Returns `None` for calls that
    /// are neither stake nor unstake. `timestamp` is the containing block's
    /// timestamp, resolved separately by the caller.
    pub fn classify(&self, tx: &Transaction, timestamp: u64) -> Option<Classified> {
        let input = tx.input_data().to_lowercase();
        let kind = if input.starts_with(&self.stake_selector) {
            ActionKind::Stake
        } else if input.starts_with(&self.unstake_selector) {
            ActionKind::Unstake
        } else {
            return None;
        };
        let amount = match kind {
            ActionKind::Stake => decode_amount(&input),
            ActionKind::Unstake => Decimal::ZERO,
        };
        Some(Classified {
            kind,
            address: tx.sender(),
            amount,
            block: tx.block_number(),
            hash: tx.hash.clone().unwrap_or_default(),
            timestamp,
        })
    }
}

/// Decode the first calldata word (bytes 4..36 of the input) as a token
/// amount with 18 decimals. Inputs too short to carry the word, or values
/// outside the representable range, decode to zero.
pub fn decode_amount(input: &str) -> Decimal {
    let Some(word) = input.get(10..74) else {
        return Decimal::ZERO;
    };
    let digits = word.trim_start_matches('0');
    if digits.is_empty() {
        return Decimal::ZERO;
    }
    if digits.len() > 32 {
        return Decimal::ZERO;
    }
    let Ok(raw) = u128::from_str_radix(digits, 16) else {
        return Decimal::ZERO;
    };
    if raw > i128::MAX as u128 {
        return Decimal::ZERO;
    }
    Decimal::try_from_i128_with_scale(raw as i128, 18).unwrap_or(Decimal::ZERO)
}

/// Deduplicate transaction hashes keeping first-appearance order. Logs from
/// adjacent chunks can repeat a hash when a transaction emits several events.
pub fn dedup_hashes<I>(hashes: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for hash in hashes {
        if seen.insert(hash.clone()) {
            out.push(hash);
        }
    }
    out
}
