use harvd_domain::{EtlHealth, EtlStatus, HistoryEntry};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Persisted form of one pipeline, written to
/// `<cache-root>/<module>/etl/<name>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlSnapshot {
    pub name: String,
    pub status_history: Vec<HistoryEntry<EtlStatus>>,
    pub health_history: Vec<HistoryEntry<EtlHealth>>,
    pub harvested_count: u64,
    pub max_document_count: i64,
    pub hash: Option<String>,
}

/// Hex SHA-256 of `bytes`. Version strings are hashed in their UTF-8
/// form; the manager hashes the concatenation of per-pipeline hashes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
