use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one dispatched request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    /// Wall-clock time the request was issued
    pub timestamp: DateTime<Utc>,
    /// Time from issue until the response completed or the request failed
    pub latency: Duration,
    pub bytes_out: u64,
    pub bytes_in: u64,
    /// HTTP status, 0 when no response was received
    pub code: u16,
    /// Empty when `code` is in the success range
    pub error: String,
    /// Values of the response headers the run was asked to capture
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl AttackResult {
    pub fn is_success(&self) -> bool {
        is_success_code(self.code)
    }
}

/// Success range is `[200, 400)`.
pub fn is_success_code(code: u16) -> bool {
    (200..400).contains(&code)
}
