use crate::aggregator::{WalletState, WalletTable};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Qualitative tiers. `GenesisOg` and `Jeeted` are absolute; the rest come
/// from percentile rank among active wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    GenesisOg,
    SmokeFlexer,
    SteakWizard,
    Grilluminati,
    FlameJuggler,
    Flipstarter,
    SizzlinNoob,
    Jeeted,
}

impl Grade {
    pub fn label(self) -> &'static str {
        match self {
            Self::GenesisOg => "Genesis OG",
            Self::SmokeFlexer => "Smoke Flexer",
            Self::SteakWizard => "Steak Wizard",
            Self::Grilluminati => "Grilluminati",
            Self::FlameJuggler => "Flame Juggler",
            Self::Flipstarter => "Flipstarter",
            Self::SizzlinNoob => "Sizzlin' Noob",
            Self::Jeeted => "Jeeted",
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Self::GenesisOg => "\u{1f30c}",
            Self::SmokeFlexer => "\u{1f525}",
            Self::SteakWizard => "\u{1f3ad}",
            Self::Grilluminati => "\u{1f441}\u{fe0f}",
            Self::FlameJuggler => "\u{1f525}",
            Self::Flipstarter => "\u{1f969}",
            Self::SizzlinNoob => "\u{1f530}",
            Self::Jeeted => "\u{1f480}",
        }
    }

    fn from_percentile(percentile: f64) -> Self {
        if percentile <= 0.5 {
            Self::SmokeFlexer
        } else if percentile <= 2.0 {
            Self::SteakWizard
        } else if percentile <= 5.0 {
            Self::Grilluminati
        } else if percentile <= 15.0 {
            Self::FlameJuggler
        } else if percentile <= 40.0 {
            Self::Flipstarter
        } else {
            Self::SizzlinNoob
        }
    }
}

/// Glyph lookup by label, for entries read back from persisted files.
pub fn glyph_for_label(label: &str) -> &'static str {
    for grade in [
        Grade::GenesisOg,
        Grade::SmokeFlexer,
        Grade::SteakWizard,
        Grade::Grilluminati,
        Grade::FlameJuggler,
        Grade::Flipstarter,
        Grade::SizzlinNoob,
        Grade::Jeeted,
    ] {
        if grade.label() == label {
            return grade.glyph();
        }
    }
    "\u{2753}"
}

/// One published leaderboard row. Field order mirrors the sheet columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub address: String,
    pub rank: u64,
    pub grade: String,
    pub grade_emoji: String,
    pub percentile: f64,
    pub total_staked: f64,
    pub time_score: f64,
    pub holding_days: f64,
    pub stake_count: u64,
    pub unstake_count: u64,
    pub is_active: bool,
    pub current_phase: u32,
    pub phase_score: f64,
    pub total_score_all_phases: f64,
    pub airdrop_share_phase: f64,
    pub airdrop_share_total: f64,
    pub first_stake_time: Option<u64>,
    pub last_action_time: Option<u64>,
    pub rank_change_24h: i64,
    pub score_change_24h: f64,
    pub phase_rank_history: String,
}

/// Amount held times days held, as of `now`. Wall-clock based, so a wallet's
/// score grows between runs even with no new transactions.
pub fn time_score(wallet: &WalletState, now: u64) -> f64 {
    let Some(first) = wallet.first_stake_time else {
        return 0.0;
    };
    let staked = wallet.total_staked.to_f64().unwrap_or(0.0);
    let holding_days = now.saturating_sub(first) as f64 / SECONDS_PER_DAY;
    staked * holding_days
}

/// Grade one wallet. `active_scores` is the time score of every active
/// wallet, including this one when it is active.
pub fn grade_wallet(
    wallet: &WalletState,
    genesis_deadline: u64,
    active_scores: &[f64],
    now: u64,
) -> (Grade, f64) {
    if let Some(first) = wallet.first_stake_time {
        if first <= genesis_deadline && wallet.is_active && wallet.unstake_count == 0 {
            return (Grade::GenesisOg, 0.0);
        }
    }
    if !wallet.is_active {
        return (Grade::Jeeted, 100.0);
    }
    if active_scores.is_empty() {
        return (Grade::SizzlinNoob, 100.0);
    }
    let score = time_score(wallet, now);
    // Ties share a rank: 1 + number of strictly greater scores.
    let rank = 1 + active_scores.iter().filter(|s| **s > score).count();
    let percentile = rank as f64 / active_scores.len() as f64 * 100.0;
    (Grade::from_percentile(percentile), percentile)
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

pub struct PhaseSettings {
    pub current_phase: u32,
    pub total_phases: u32,
}

/// Build the full ranked leaderboard from wallet state.
///
/// Wallets with nothing staked are excluded. Ordering is by time score
/// descending; wallets with equal scores share a rank. Airdrop shares are
/// fractions of the active cohort's combined time score; inactive wallets
/// get zero share but keep their row.
pub fn build_leaderboard(
    table: &WalletTable,
    genesis_deadline: u64,
    now: u64,
    phase: &PhaseSettings,
) -> Vec<LeaderboardEntry> {
    let mut wallets: Vec<(&String, &WalletState, f64)> = table
        .iter()
        .filter(|(_, w)| w.total_staked > rust_decimal::Decimal::ZERO)
        .map(|(addr, w)| (addr, w, time_score(w, now)))
        .collect();
    wallets.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let active_scores: Vec<f64> = wallets
        .iter()
        .filter(|(_, w, _)| w.is_active)
        .map(|(_, _, s)| *s)
        .collect();
    let total_active_score: f64 = active_scores.iter().sum();

    let mut entries = Vec::with_capacity(wallets.len());
    for (address, wallet, score) in &wallets {
        let (grade, percentile) = grade_wallet(wallet, genesis_deadline, &active_scores, now);
        let holding_days = wallet
            .first_stake_time
            .map_or(0.0, |t| now.saturating_sub(t) as f64 / SECONDS_PER_DAY);

        let (share_phase, share_total) = if wallet.is_active && total_active_score > 0.0 {
            let share = *score / total_active_score * 100.0;
            (share, share * f64::from(phase.total_phases))
        } else {
            (0.0, 0.0)
        };

        let rank = 1 + wallets.iter().filter(|(_, _, s)| *s > *score).count() as u64;

        entries.push(LeaderboardEntry {
            address: (*address).clone(),
            rank,
            grade: grade.label().to_string(),
            grade_emoji: grade.glyph().to_string(),
            percentile: round_to(percentile, 2),
            total_staked: round_to(wallet.total_staked.to_f64().unwrap_or(0.0), 4),
            time_score: round_to(*score, 2),
            holding_days: round_to(holding_days, 1),
            stake_count: wallet.stake_count,
            unstake_count: wallet.unstake_count,
            is_active: wallet.is_active,
            current_phase: phase.current_phase,
            phase_score: round_to(*score, 2),
            total_score_all_phases: round_to(*score, 2),
            airdrop_share_phase: round_to(share_phase, 6),
            airdrop_share_total: round_to(share_total, 6),
            first_stake_time: wallet.first_stake_time,
            last_action_time: wallet.last_action_time,
            rank_change_24h: 0,
            score_change_24h: 0.0,
            phase_rank_history: format!("P{}:{rank}", phase.current_phase),
        });
    }
    entries
}
