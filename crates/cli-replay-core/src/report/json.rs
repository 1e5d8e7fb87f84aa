//! Compact single-line JSON verification output (stdout).

use crate::verify::VerifyResult;

pub fn render(result: &VerifyResult) -> String {
    // VerifyResult derives Serialize with the wire field names; compact
    // encoding keeps the output one line.
    serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string())
}
