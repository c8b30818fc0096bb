use serde::Deserialize;

/// Decode a `0x`-prefixed hex quantity leniently. Anything malformed (missing
/// prefix, stray characters, empty string) decodes to 0 so a bad field never
/// aborts a scan.
pub fn parse_hex_u64(raw: &str) -> u64 {
    let digits = raw.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return 0;
    }
    u64::from_str_radix(digits, 16).unwrap_or(0)
}

/// Like [`parse_hex_u64`] but for optional fields straight off the wire.
pub fn parse_opt_hex_u64(raw: Option<&str>) -> u64 {
    raw.map(parse_hex_u64).unwrap_or(0)
}

/// Log object from `eth_getLogs`. Only the fields the pipeline consumes are
/// declared; everything is optional because providers disagree on shapes.
#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    pub address: Option<String>,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<String>,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
}

impl LogEntry {
    pub fn block_number(&self) -> u64 {
        parse_opt_hex_u64(self.block_number.as_deref())
    }
}

/// Transaction object from `eth_getTransactionByHash`.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub hash: Option<String>,
    pub from: Option<String>,
    pub input: Option<String>,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
}

impl Transaction {
    pub fn block_number(&self) -> u64 {
        parse_opt_hex_u64(self.block_number.as_deref())
    }

    /// Sender address, lowercased. Empty when the provider omitted `from`.
    pub fn sender(&self) -> String {
        self.from.as_deref().unwrap_or("").to_lowercase()
    }

    pub fn input_data(&self) -> &str {
        self.input.as_deref().unwrap_or("0x")
    }
}

/// Block header from `eth_getBlockByNumber` (hashes-only variant).
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub number: Option<String>,
    pub timestamp: Option<String>,
}

impl BlockHeader {
    pub fn timestamp(&self) -> u64 {
        parse_opt_hex_u64(self.timestamp.as_deref())
    }
}
