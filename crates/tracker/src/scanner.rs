use common::rpc::{RpcError, RpcResult};
use common::types::LogEntry;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Widest block range a single `eth_getLogs` request is allowed to cover.
pub const HARD_CEILING: u64 = 1500;

/// Result-set limit most public endpoints enforce. A provider error on a
/// range wider than this is assumed to mean "too many results" and the range
/// is bisected; on a range at or under it the error is final.
pub const BISECT_THRESHOLD: u64 = 1000;

/// Source of contract logs for a block range. The production impl wraps the
/// JSON-RPC pool; tests substitute scripted fakes.
pub trait LogSource {
    fn fetch_logs(
        &self,
        from: u64,
        to: u64,
    ) -> impl std::future::Future<Output = RpcResult<Vec<LogEntry>>> + Send;
}

/// Fetch all logs in `[start, end]`, working through a queue of sub-ranges.
///
/// Ranges wider than [`HARD_CEILING`] are pre-split. When the provider
/// rejects a range wider than [`BISECT_THRESHOLD`] the range is split and
/// both halves requeued, so oversized result sets resolve without losing
/// blocks. A provider rejection at or under the threshold, or a range whose
/// transport retries are exhausted, drops that sub-range with a warning.
/// Callers get every log the provider would serve, in ascending range order.
pub async fn scan_range<S: LogSource>(source: &S, start: u64, end: u64) -> Vec<LogEntry> {
    let mut logs = Vec::new();
    let mut queue: VecDeque<(u64, u64)> = VecDeque::new();
    queue.push_back((start, end));

    while let Some((s, e)) = queue.pop_front() {
        if s > e {
            continue;
        }
        let span = e - s + 1;
        if span > HARD_CEILING {
            let mid = s + HARD_CEILING - 1;
            queue.push_front((mid + 1, e));
            queue.push_front((s, mid));
            continue;
        }
        match source.fetch_logs(s, e).await {
            Ok(mut batch) => {
                debug!(from = s, to = e, logs = batch.len(), "scanned range");
                logs.append(&mut batch);
            }
            Err(RpcError::Provider { code, message }) => {
                if span > BISECT_THRESHOLD {
                    debug!(from = s, to = e, code, "provider rejected range, bisecting");
                    let mid = s + BISECT_THRESHOLD - 1;
                    queue.push_front((mid + 1, e));
                    queue.push_front((s, mid));
                } else {
                    warn!(from = s, to = e, code, %message, "dropping unscannable range");
                    metrics::counter!("tracker_ranges_dropped_total").increment(1);
                }
            }
            // Transport retries were already exhausted inside the client.
            Err(RpcError::Transport(message)) => {
                warn!(from = s, to = e, %message, "dropping range after transport failures");
                metrics::counter!("tracker_ranges_dropped_total").increment(1);
            }
        }
    }
    logs
}

/// Split `[start, end]` into consecutive windows of at most `window` blocks.
pub fn windows(start: u64, end: u64, window: u64) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    if window == 0 || start > end {
        return out;
    }
    let mut s = start;
    while s <= end {
        let e = s.saturating_add(window - 1).min(end);
        out.push((s, e));
        s = e.saturating_add(1);
        if e == u64::MAX {
            break;
        }
    }
    out
}
