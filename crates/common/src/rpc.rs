use crate::types::{parse_hex_u64, BlockHeader, LogEntry, Transaction};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Errors surfaced by the JSON-RPC client. Transport failures are retried
/// inside the client; provider errors are returned to the caller on the first
/// occurrence because they carry scan-control information (result-set limits).
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC client over a pool of endpoints. Each request picks the next URL
/// round-robin, so a single flaky endpoint does not dominate retries.
pub struct RpcClient {
    urls: Vec<String>,
    cursor: AtomicUsize,
    http: reqwest::Client,
    max_retries: u32,
    backoff_base: Duration,
}

impl RpcClient {
    pub fn new(
        urls: Vec<String>,
        timeout: Duration,
        max_retries: u32,
        backoff_base: Duration,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!urls.is_empty(), "rpc url pool must not be empty");
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            urls,
            cursor: AtomicUsize::new(0),
            http,
            max_retries,
            backoff_base,
        })
    }

    fn next_url(&self) -> &str {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }

    /// One JSON-RPC call with transport retries. The `result` field is
    /// deserialized into `T`; a JSON `null` result maps onto `Option` targets.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> RpcResult<T> {
        let mut last_err = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
            let url = self.next_url();
            let body = json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            });
            let response = match self.http.post(url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    metrics::counter!("rpc_transport_errors_total", "method" => method.to_string())
                        .increment(1);
                    warn!(method, url, attempt, error = %e, "rpc transport error");
                    last_err = e.to_string();
                    continue;
                }
            };
            let envelope: RpcEnvelope = match response.json().await {
                Ok(v) => v,
                Err(e) => {
                    metrics::counter!("rpc_transport_errors_total", "method" => method.to_string())
                        .increment(1);
                    warn!(method, url, attempt, error = %e, "rpc response decode error");
                    last_err = e.to_string();
                    continue;
                }
            };
            if let Some(err) = envelope.error {
                metrics::counter!("rpc_provider_errors_total", "method" => method.to_string())
                    .increment(1);
                return Err(RpcError::Provider {
                    code: err.code,
                    message: err.message,
                });
            }
            metrics::counter!("rpc_requests_total", "method" => method.to_string()).increment(1);
            let value = envelope.result.unwrap_or(Value::Null);
            return serde_json::from_value(value)
                .map_err(|e| RpcError::Transport(format!("unexpected result shape: {e}")));
        }
        Err(RpcError::Transport(last_err))
    }

    pub async fn block_number(&self) -> RpcResult<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        Ok(parse_hex_u64(&raw))
    }

    pub async fn get_logs(&self, from: u64, to: u64, address: &str) -> RpcResult<Vec<LogEntry>> {
        let params = json!([{
            "fromBlock": format!("{:#x}", from),
            "toBlock": format!("{:#x}", to),
            "address": address,
        }]);
        self.call("eth_getLogs", params).await
    }

    pub async fn transaction_by_hash(&self, hash: &str) -> RpcResult<Option<Transaction>> {
        self.call("eth_getTransactionByHash", json!([hash])).await
    }

    pub async fn block_by_number(&self, number: u64) -> RpcResult<Option<BlockHeader>> {
        self.call(
            "eth_getBlockByNumber",
            json!([format!("{:#x}", number), false]),
        )
        .await
    }

    /// `eth_call` against `to` with raw calldata, latest block. Returns the
    /// hex-encoded return data.
    pub async fn call_contract(&self, to: &str, data: &str) -> RpcResult<String> {
        self.call("eth_call", json!([{"to": to, "data": data}, "latest"]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_provider_error_decodes() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"query returned more than 1000 results"}}"#;
        let envelope: RpcEnvelope = serde_json::from_str(raw).unwrap();
        let err = envelope.error.unwrap();
        assert_eq!(err.code, -32005);
        assert!(err.message.contains("1000"));
    }

    #[test]
    fn test_envelope_null_result_maps_to_none() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let envelope: RpcEnvelope = serde_json::from_str(raw).unwrap();
        let value = envelope.result.unwrap_or(serde_json::Value::Null);
        let tx: Option<Transaction> = serde_json::from_value(value).unwrap();
        assert!(tx.is_none());
    }

    #[tokio::test]
    async fn test_url_pool_rotates() {
        let client = RpcClient::new(
            vec!["http://a.invalid".into(), "http://b.invalid".into()],
            Duration::from_secs(1),
            0,
            Duration::from_millis(1),
        )
        .unwrap();
        assert_eq!(client.next_url(), "http://a.invalid");
        assert_eq!(client.next_url(), "http://b.invalid");
        assert_eq!(client.next_url(), "http://a.invalid");
    }

    #[test]
    fn test_empty_pool_rejected() {
        let result = RpcClient::new(
            Vec::new(),
            Duration::from_secs(1),
            0,
            Duration::from_millis(1),
        );
        assert!(result.is_err());
    }
}
