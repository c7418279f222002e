//! Text renderings of redeemed content, receipts, and proof blocks.

use serde_json::Value;

use crate::db::RunRecord;
use crate::types::{License, Receipt};

/// Maximum characters kept from redeemed content
pub const PREVIEW_LIMIT: usize = 900;

const NO_CONTENT: &str = "No content returned.";

/// Bounded preview of a content payload.
///
/// Text is cut to `PREVIEW_LIMIT` characters; structured content is
/// pretty-printed first.
pub fn content_preview(content: &Value) -> String {
    match content {
        Value::String(text) => truncate_chars(text, PREVIEW_LIMIT),
        Value::Null => NO_CONTENT.to_string(),
        other => {
            let pretty = serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string());
            truncate_chars(&pretty, PREVIEW_LIMIT)
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Receipt details as copied to the clipboard
pub fn receipt_block(receipt: &Receipt, fallback_license: License) -> String {
    [
        format!("txId: {}", receipt.tx_id),
        format!("priceMicros: {}", receipt.price_micros),
        format!("domain: {}", receipt.domain),
        format!("path: {}", receipt.path),
        format!("license: {}", receipt.license.unwrap_or(fallback_license)),
        format!("timestamp: {}", receipt.timestamp),
    ]
    .join("\n")
}

/// Agent-facing proof block for a completed run
pub fn proof_block(run: &RunRecord) -> String {
    [
        format!("AgentLabel: {}", run.agent_label),
        format!("UserAgent: {}", run.user_agent),
        format!("URL: {}", run.request_url),
        format!("License: {}", run.receipt.license.unwrap_or(run.license)),
        format!("priceMicros: {}", run.receipt.price_micros),
        format!("txId: {}", run.receipt.tx_id),
        format!("timestamp: {}", run.receipt.timestamp),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::fixtures;
    use serde_json::json;

    #[test]
    fn test_text_preview_truncated() {
        let long = "a".repeat(2_000);
        assert_eq!(content_preview(&json!(long)).chars().count(), PREVIEW_LIMIT);
        assert_eq!(content_preview(&json!("short")), "short");
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let long = "é".repeat(1_000);
        let preview = content_preview(&json!(long));
        assert_eq!(preview.chars().count(), PREVIEW_LIMIT);
    }

    #[test]
    fn test_null_preview() {
        assert_eq!(content_preview(&Value::Null), NO_CONTENT);
    }

    #[test]
    fn test_structured_preview_pretty_printed() {
        let preview = content_preview(&json!({"title": "Fed liquidity"}));
        assert_eq!(preview, "{\n  \"title\": \"Fed liquidity\"\n}");

        let big = json!({"body": "x".repeat(5_000)});
        assert_eq!(content_preview(&big).chars().count(), PREVIEW_LIMIT);
    }

    #[test]
    fn test_receipt_block() {
        let mut receipt = fixtures::receipt("tx_1", "2024-01-01T00:00:00Z");
        receipt.license = None;
        let block = receipt_block(&receipt, License::Display);
        assert_eq!(
            block,
            "txId: tx_1\npriceMicros: 50000\ndomain: pub.example\npath: /premium/a\nlicense: DISPLAY\ntimestamp: 2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_proof_block() {
        let run = fixtures::run("tx_1", "2024-01-01T00:00:00Z");
        let block = proof_block(&run);
        assert!(block.starts_with("AgentLabel: MacroScout Agent\nUserAgent: MacroScout/1.0\n"));
        assert!(block.contains("URL: https://pub.example/premium/a?via=fairfetch&license=SUMMARY"));
        assert!(block.ends_with("txId: tx_1\ntimestamp: 2024-01-01T00:00:00Z"));
    }
}
