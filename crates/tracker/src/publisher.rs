use crate::scorer::LeaderboardEntry;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// Spreadsheet column set, in sheet order. Safe mode restricts uploads to
/// exactly these columns so server-side computed columns are not clobbered.
pub const SAFE_MODE_COLUMNS: [&str; 21] = [
    "address",
    "rank",
    "grade",
    "grade_emoji",
    "percentile",
    "total_staked",
    "time_score",
    "holding_days",
    "stake_count",
    "unstake_count",
    "is_active",
    "current_phase",
    "phase_score",
    "total_score_all_phases",
    "airdrop_share_phase",
    "airdrop_share_total",
    "first_stake_time",
    "last_action_time",
    "rank_change_24h",
    "score_change_24h",
    "phase_rank_history",
];

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub webhook_url: Option<String>,
    pub public_path: PathBuf,
    pub backup_dir: PathBuf,
    pub request_timeout: Duration,
    pub max_payload_bytes: usize,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub safe_mode: bool,
    pub update_range: String,
    pub current_phase: u32,
    pub git_commit: bool,
}

#[derive(Debug, Deserialize)]
struct WebhookReply {
    status: Option<String>,
    message: Option<String>,
    basic_columns: Option<u64>,
    enhanced_columns: Option<u64>,
}

fn sanitize_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\n' | '\r' | '\t' | '\u{8}' | '\u{c}' | '\u{b}' => out.push(' '),
            '\\' => out.push('/'),
            '"' => out.push('\''),
            c if (c as u32) < 32 => {}
            c => out.push(c),
        }
    }
    if out.chars().count() > 1000 {
        out = out.chars().take(997).collect::<String>() + "...";
    }
    out.trim().to_string()
}

fn sanitize_number(n: &serde_json::Number) -> Value {
    if let Some(f) = n.as_f64() {
        if n.is_f64() {
            if !f.is_finite() {
                return Value::from(0);
            }
            let rounded = (f * 1e6).round() / 1e6;
            return serde_json::Number::from_f64(rounded).map_or(Value::from(0), Value::Number);
        }
    }
    Value::Number(n.clone())
}

fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(&s)),
        Value::Number(n) => sanitize_number(&n),
        Value::Null => Value::String(String::new()),
        Value::Bool(b) => Value::Bool(b),
        other => Value::String(sanitize_string(&other.to_string())),
    }
}

/// Flatten entries to JSON objects fit for the webhook: strings scrubbed of
/// characters the sheet parser chokes on, non-finite numbers zeroed, nulls
/// replaced with empty strings. In safe mode only [`SAFE_MODE_COLUMNS`]
/// survive.
pub fn clean_entries(entries: &[LeaderboardEntry], safe_mode: bool) -> Vec<Map<String, Value>> {
    entries
        .iter()
        .filter_map(|entry| serde_json::to_value(entry).ok())
        .filter_map(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .map(|map| {
            map.into_iter()
                .filter(|(key, _)| !safe_mode || SAFE_MODE_COLUMNS.contains(&key.as_str()))
                .map(|(key, value)| (key, sanitize_value(value)))
                .collect()
        })
        .collect()
}

pub struct Publisher {
    http: reqwest::Client,
    settings: PublishSettings,
}

impl Publisher {
    pub fn new(settings: PublishSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    /// Push the leaderboard out, cascading webhook failure to the static
    /// file. Returns `Err` only when every tier failed.
    pub async fn publish(&self, entries: &[LeaderboardEntry], mode: &str) -> Result<()> {
        if self.settings.webhook_url.is_some() {
            match self.upload_webhook(entries, mode).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, "webhook upload failed, falling back to static file"),
            }
        } else {
            info!("no webhook configured, writing static file");
        }
        self.write_public_summary(entries)
    }

    async fn upload_webhook(&self, entries: &[LeaderboardEntry], mode: &str) -> Result<()> {
        let url = self
            .settings
            .webhook_url
            .as_deref()
            .context("webhook url not configured")?;
        let cleaned = clean_entries(entries, self.settings.safe_mode);

        let payload = serde_json::json!({ "mode": mode, "data": cleaned });
        let body = serde_json::to_string(&payload)?;
        info!(
            entries = cleaned.len(),
            bytes = body.len(),
            mode,
            "uploading leaderboard"
        );
        if body.len() > self.settings.max_payload_bytes {
            return self.upload_in_chunks(url, &cleaned).await;
        }

        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json; charset=utf-8")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        anyhow::ensure!(status.as_u16() == 200, "webhook returned {status}: {text}");

        // A 200 with a non-JSON body still counts as accepted.
        match serde_json::from_str::<WebhookReply>(&text) {
            Ok(reply) => {
                if reply.status.as_deref() == Some("success") {
                    info!(
                        basic_columns = reply.basic_columns.unwrap_or(0),
                        enhanced_columns = reply.enhanced_columns.unwrap_or(0),
                        "webhook upload accepted"
                    );
                    Ok(())
                } else {
                    anyhow::bail!(
                        "webhook rejected upload: {}",
                        reply.message.unwrap_or_else(|| "unknown error".to_string())
                    )
                }
            }
            Err(_) => {
                warn!("webhook replied 200 with non-JSON body");
                Ok(())
            }
        }
    }

    async fn upload_in_chunks(&self, url: &str, cleaned: &[Map<String, Value>]) -> Result<()> {
        let payloads = chunk_payloads(cleaned, self.settings.chunk_size);
        let total_chunks = payloads.len();
        for (idx, payload) in payloads.iter().enumerate() {
            let chunk_number = idx + 1;
            info!(chunk_number, total_chunks, "uploading chunk");
            let response = self
                .http
                .post(url)
                .header("Content-Type", "application/json; charset=utf-8")
                .json(payload)
                .send()
                .await?;
            anyhow::ensure!(
                response.status().as_u16() == 200,
                "chunk {chunk_number}/{total_chunks} rejected: {}",
                response.status()
            );
            tokio::time::sleep(self.settings.chunk_delay).await;
        }
        Ok(())
    }

    /// Static-file tier: a capped summary for the public site, committed to
    /// git when the environment allows.
    pub fn write_public_summary(&self, entries: &[LeaderboardEntry]) -> Result<()> {
        let path = &self.settings.public_path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let update_range = if self.settings.safe_mode {
            self.settings.update_range.clone()
        } else {
            "A:AM".to_string()
        };
        let summary = serde_json::json!({
            "last_updated": Utc::now().to_rfc3339(),
            "total_wallets": entries.len(),
            "active_wallets": entries.iter().filter(|e| e.is_active).count(),
            "phase": self.settings.current_phase,
            "safe_mode": self.settings.safe_mode,
            "update_range": update_range,
            "leaderboard": &entries[..entries.len().min(100)],
        });
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), rows = entries.len().min(100), "wrote public summary");
        if self.settings.git_commit {
            git_commit_best_effort(path);
        }
        Ok(())
    }

    /// Uncapped backup of the full leaderboard, JSON plus CSV, timestamped.
    pub fn save_backup(&self, entries: &[LeaderboardEntry]) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(&self.settings.backup_dir)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = if self.settings.safe_mode { "_safe" } else { "" };

        let json_path = self
            .settings
            .backup_dir
            .join(format!("stake_leaderboard_{stamp}{suffix}.json"));
        std::fs::write(&json_path, serde_json::to_string_pretty(entries)?)?;

        let csv_path = self
            .settings
            .backup_dir
            .join(format!("stake_leaderboard_{stamp}{suffix}.csv"));
        write_csv(&csv_path, entries)?;

        info!(json = %json_path.display(), csv = %csv_path.display(), "backup saved");
        Ok((json_path, csv_path))
    }

    /// Most recent backup, for seeding an incremental run.
    pub fn latest_backup(&self) -> Option<Vec<LeaderboardEntry>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.settings.backup_dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        let path = paths.pop()?;
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(entries) => {
                info!(path = %path.display(), "restored wallet state from backup");
                Some(entries)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "unreadable backup");
                None
            }
        }
    }

    /// Capped top-100 list from the public summary, the second-choice seed.
    pub fn public_summary_entries(&self) -> Option<Vec<LeaderboardEntry>> {
        let raw = std::fs::read_to_string(&self.settings.public_path).ok()?;
        let summary: Value = serde_json::from_str(&raw).ok()?;
        let entries = serde_json::from_value(summary.get("leaderboard")?.clone()).ok()?;
        info!(path = %self.settings.public_path.display(), "restored wallet state from public summary");
        Some(entries)
    }
}

/// Wrap cleaned rows in the numbered chunk envelopes the webhook reassembles.
fn chunk_payloads(cleaned: &[Map<String, Value>], chunk_size: usize) -> Vec<Value> {
    let total_chunks = cleaned.len().div_ceil(chunk_size.max(1));
    cleaned
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(|(idx, chunk)| {
            serde_json::json!({
                "chunk_number": idx + 1,
                "total_chunks": total_chunks,
                "data": chunk,
                "is_chunk": true,
            })
        })
        .collect()
}

fn write_csv(path: &Path, entries: &[LeaderboardEntry]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(SAFE_MODE_COLUMNS)?;
    for entry in entries {
        let value = serde_json::to_value(entry)?;
        let record: Vec<String> = SAFE_MODE_COLUMNS
            .iter()
            .map(|column| match value.get(column) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Commit the public summary when running inside a git checkout. Failures
/// are logged and ignored; the file on disk is the product.
fn git_commit_best_effort(path: &Path) {
    use std::process::Command;

    let run = |args: &[&str]| -> bool {
        Command::new("git")
            .args(args)
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    };

    run(&["config", "user.name", "stake-tracker-bot"]);
    run(&["config", "user.email", "stake-tracker-bot@noreply.github.com"]);

    let file = path.to_string_lossy();
    if !run(&["add", &file]) {
        warn!("git add failed, leaving file uncommitted");
        return;
    }
    let message = format!(
        "Update leaderboard data - {}",
        Utc::now().format("%Y-%m-%d %H:%M UTC")
    );
    if !run(&["commit", "-m", &message]) {
        info!("git commit skipped (no changes or not a repository)");
        return;
    }
    if run(&["push"]) {
        info!("public summary pushed");
    } else {
        warn!("git push failed, commit stays local");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(address: &str, rank: u64) -> LeaderboardEntry {
        LeaderboardEntry {
            address: address.to_string(),
            rank,
            grade: "Flipstarter".to_string(),
            grade_emoji: "\u{1f969}".to_string(),
            percentile: 33.33,
            total_staked: 10.0,
            time_score: 100.0,
            holding_days: 10.0,
            stake_count: 1,
            unstake_count: 0,
            is_active: true,
            current_phase: 1,
            phase_score: 100.0,
            total_score_all_phases: 100.0,
            airdrop_share_phase: 50.0,
            airdrop_share_total: 300.0,
            first_stake_time: Some(1000),
            last_action_time: Some(2000),
            rank_change_24h: 0,
            score_change_24h: 0.0,
            phase_rank_history: format!("P1:{rank}"),
        }
    }

    fn settings(dir: &Path) -> PublishSettings {
        PublishSettings {
            webhook_url: None,
            public_path: dir.join("public/leaderboard.json"),
            backup_dir: dir.join("backup"),
            request_timeout: Duration::from_secs(5),
            max_payload_bytes: 5 * 1024 * 1024,
            chunk_size: 100,
            chunk_delay: Duration::from_millis(1),
            safe_mode: false,
            update_range: "A:U".to_string(),
            current_phase: 1,
            git_commit: false,
        }
    }

    #[test]
    fn test_sanitize_string_rewrites_hazards() {
        assert_eq!(sanitize_string("a\nb\tc"), "a b c");
        assert_eq!(sanitize_string(r#"say "hi" \ bye"#), "say 'hi' / bye");
        assert_eq!(sanitize_string("  padded  "), "padded");
        assert_eq!(sanitize_string("nul\u{0}char"), "nulchar");

        let long = "x".repeat(1500);
        let cleaned = sanitize_string(&long);
        assert_eq!(cleaned.chars().count(), 1000);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn test_clean_entries_has_all_columns() {
        let cleaned = clean_entries(&[entry("0xaaa", 1)], false);
        assert_eq!(cleaned.len(), 1);
        for column in SAFE_MODE_COLUMNS {
            assert!(cleaned[0].contains_key(column), "missing {column}");
        }
    }

    #[test]
    fn test_clean_entries_safe_mode_filters() {
        let cleaned = clean_entries(&[entry("0xaaa", 1)], true);
        assert_eq!(cleaned[0].len(), SAFE_MODE_COLUMNS.len());
        assert!(cleaned[0].keys().all(|k| SAFE_MODE_COLUMNS.contains(&k.as_str())));
    }

    #[test]
    fn test_clean_entries_null_becomes_empty_string() {
        let mut e = entry("0xaaa", 1);
        e.first_stake_time = None;
        let cleaned = clean_entries(&[e], false);
        assert_eq!(cleaned[0]["first_stake_time"], Value::String(String::new()));
    }

    #[test]
    fn test_chunk_payloads_partition() {
        let entries: Vec<LeaderboardEntry> =
            (1..=250).map(|i| entry(&format!("0x{i:x}"), i)).collect();
        let cleaned = clean_entries(&entries, false);

        let payloads = chunk_payloads(&cleaned, 100);
        assert_eq!(payloads.len(), 3);
        for (idx, payload) in payloads.iter().enumerate() {
            assert_eq!(payload["chunk_number"], idx as u64 + 1);
            assert_eq!(payload["total_chunks"], 3);
            assert_eq!(payload["is_chunk"], true);
        }
        assert_eq!(payloads[0]["data"].as_array().unwrap().len(), 100);
        assert_eq!(payloads[2]["data"].as_array().unwrap().len(), 50);

        // Rows survive chunking in order.
        assert_eq!(payloads[2]["data"][49]["address"], "0xfa");
    }

    #[test]
    fn test_public_summary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(settings(dir.path())).unwrap();
        let entries: Vec<LeaderboardEntry> =
            (1..=150).map(|i| entry(&format!("0x{i:x}"), i)).collect();

        publisher.write_public_summary(&entries).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("public/leaderboard.json")).unwrap();
        let summary: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(summary["total_wallets"], 150);
        assert_eq!(summary["active_wallets"], 150);
        assert_eq!(summary["leaderboard"].as_array().unwrap().len(), 100);
        assert_eq!(summary["update_range"], "A:AM");

        let restored = publisher.public_summary_entries().unwrap();
        assert_eq!(restored.len(), 100);
        assert_eq!(restored[0].address, "0x1");
    }

    #[test]
    fn test_backup_round_trip_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(settings(dir.path())).unwrap();
        let entries = vec![entry("0xaaa", 1), entry("0xbbb", 2)];

        let (json_path, csv_path) = publisher.save_backup(&entries).unwrap();
        assert!(json_path.exists());
        assert!(csv_path.exists());

        let csv_text = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(lines.next().unwrap(), SAFE_MODE_COLUMNS.join(","));
        assert_eq!(csv_text.lines().count(), 3);

        let restored = publisher.latest_backup().unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[1].address, "0xbbb");
    }

    #[test]
    fn test_safe_mode_backup_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.safe_mode = true;
        let publisher = Publisher::new(s).unwrap();
        let (json_path, _) = publisher.save_backup(&[entry("0xaaa", 1)]).unwrap();
        assert!(json_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_safe.json"));
    }

    #[test]
    fn test_latest_backup_missing_dir_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(settings(dir.path())).unwrap();
        assert!(publisher.latest_backup().is_none());
        assert!(publisher.public_summary_entries().is_none());
    }
}
