use anyhow::{Context, Result};
use chrono::DateTime;
use common::classify::{dedup_hashes, ActionKind, Classifier};
use common::config::Config;
use common::rpc::{RpcClient, RpcError};
use rust_decimal::Decimal;
use std::io::Write as _;
use std::time::Duration;

/// ERC-20 `balanceOf(address)` selector.
const BALANCE_OF_SELECTOR: &str = "0x70a08231";

fn decode_uint_as_tokens(raw: &str) -> Decimal {
    let digits = raw.trim().trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() || digits.len() > 32 {
        return Decimal::ZERO;
    }
    let Ok(value) = u128::from_str_radix(digits, 16) else {
        return Decimal::ZERO;
    };
    if value > i128::MAX as u128 {
        return Decimal::ZERO;
    }
    Decimal::try_from_i128_with_scale(value as i128, 18).unwrap_or(Decimal::ZERO)
}

fn balance_of_calldata(wallet: &str) -> String {
    let bare = wallet.trim_start_matches("0x").to_lowercase();
    format!("{BALANCE_OF_SELECTOR}{bare:0>64}")
}

fn format_time(timestamp: u64) -> String {
    DateTime::from_timestamp(timestamp as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

struct Inspector {
    client: RpcClient,
    config: Config,
    classifier: Classifier,
}

impl Inspector {
    async fn token_balance(&self, wallet: &str) -> Result<Decimal> {
        let data = balance_of_calldata(wallet);
        let raw = self
            .client
            .call_contract(&self.config.contract.token_address, &data)
            .await
            .context("balanceOf call failed")?;
        Ok(decode_uint_as_tokens(&raw))
    }

    /// Scan the trailing `search_blocks` window for staking-contract activity
    /// from `wallet` and print a per-transaction history.
    async fn analyze_wallet(&self, wallet: &str, search_blocks: u64) -> Result<()> {
        let wallet = wallet.to_lowercase();
        let head = self.client.block_number().await.context("chain head")?;
        let start = head
            .saturating_sub(search_blocks)
            .max(self.config.contract.genesis_block);
        println!("scanning blocks {start} to {head} ({} blocks)...", head - start);

        let chunk = self.config.inspector.chunk_blocks.max(1);
        let mut hashes = Vec::new();
        let mut from = start;
        while from <= head {
            let to = from.saturating_add(chunk - 1).min(head);
            match self
                .client
                .get_logs(from, to, &self.config.contract.staking_address)
                .await
            {
                Ok(logs) => {
                    hashes.extend(logs.into_iter().filter_map(|l| l.transaction_hash));
                }
                Err(RpcError::Provider { code, message }) => {
                    println!("  range {from}-{to} rejected ({code}: {message}), skipping");
                }
                Err(e) => return Err(e.into()),
            }
            from = to.saturating_add(1);
        }
        let hashes = dedup_hashes(hashes);
        println!("found {} staking transactions in range", hashes.len());

        let mut stake_total = Decimal::ZERO;
        let mut stakes = 0u32;
        let mut unstakes = 0u32;
        for hash in &hashes {
            let Some(tx) = self.client.transaction_by_hash(hash).await? else {
                continue;
            };
            if tx.sender() != wallet {
                continue;
            }
            let timestamp = match self.client.block_by_number(tx.block_number()).await? {
                Some(header) => header.timestamp(),
                None => 0,
            };
            let Some(action) = self.classifier.classify(&tx, timestamp) else {
                continue;
            };
            match action.kind {
                ActionKind::Stake => {
                    stakes += 1;
                    stake_total += action.amount;
                    println!(
                        "  STAKE   {:>16} | block {} | {} | {}",
                        action.amount,
                        action.block,
                        format_time(action.timestamp),
                        action.hash
                    );
                }
                ActionKind::Unstake => {
                    unstakes += 1;
                    println!(
                        "  UNSTAKE {:>16} | block {} | {} | {}",
                        "-",
                        action.block,
                        format_time(action.timestamp),
                        action.hash
                    );
                }
            }
            tokio::time::sleep(Duration::from_millis(
                self.config.scan.tx_fetch_delay_ms,
            ))
            .await;
        }

        println!();
        println!("wallet {wallet}");
        println!("  stakes in range:   {stakes} ({stake_total} tokens)");
        println!("  unstakes in range: {unstakes}");
        match self.token_balance(&wallet).await {
            Ok(balance) => println!("  current token balance: {balance}"),
            Err(e) => println!("  current token balance: unavailable ({e})"),
        }
        Ok(())
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    let dispatch = common::observability::build_dispatch(&config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    let client = RpcClient::new(
        config.rpc.urls.clone(),
        Duration::from_secs(config.rpc.timeout_secs),
        config.rpc.max_retries,
        Duration::from_millis(config.rpc.backoff_base_ms),
    )?;
    let classifier = Classifier::new(
        &config.contract.stake_selector,
        &config.contract.unstake_selector,
    );
    let inspector = Inspector {
        client,
        config,
        classifier,
    };

    println!("staking wallet inspector");
    loop {
        println!();
        println!("  1) analyze wallet (last {} blocks)", inspector.config.inspector.search_blocks);
        println!(
            "  2) analyze wallet, extended (last {} blocks)",
            inspector.config.inspector.extended_search_blocks
        );
        println!("  q) quit");
        let choice = prompt("> ")?;
        let search_blocks = match choice.as_str() {
            "1" => inspector.config.inspector.search_blocks,
            "2" => inspector.config.inspector.extended_search_blocks,
            "q" | "quit" | "exit" => break,
            _ => {
                println!("unknown choice: {choice}");
                continue;
            }
        };
        let wallet = prompt("wallet address: ")?;
        if wallet.is_empty() {
            continue;
        }
        if let Err(e) = inspector.analyze_wallet(&wallet, search_blocks).await {
            tracing::error!(error = %e, "analysis failed");
            println!("analysis failed: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_of_calldata_pads_address() {
        let data = balance_of_calldata("0x048f5AcA96B043A178C6018ECc29eF4e65637171");
        assert_eq!(data.len(), 10 + 64);
        assert!(data.starts_with("0x70a08231000000000000000000000000048f5aca"));
    }

    #[test]
    fn test_decode_uint_as_tokens() {
        assert_eq!(
            decode_uint_as_tokens("0x0de0b6b3a7640000"),
            "1".parse::<Decimal>().unwrap()
        );
        assert_eq!(decode_uint_as_tokens("0x"), Decimal::ZERO);
        assert_eq!(
            decode_uint_as_tokens(&format!("0x{}", "f".repeat(64))),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "1970-01-01 00:00:00 UTC");
    }
}
