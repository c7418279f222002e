//! ============================================================================
//! Database Types - Serializable records for the console store
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{License, Receipt};

/// Maximum number of runs kept in history
pub const MAX_RUNS: usize = 5;

/// Default agent label shown on receipts
pub const DEFAULT_AGENT_LABEL: &str = "MacroScout Agent";

/// Default User-Agent sent with mint calls
pub const DEFAULT_USER_AGENT: &str = "MacroScout/1.0";

/// Console settings, persisted across restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub backend_url: String,
    pub api_key: String,
    pub agent_label: String,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            api_key: String::new(),
            agent_label: DEFAULT_AGENT_LABEL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// One completed run: a successful mint followed by a successful redeem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// `{txId}-{timestamp}`, unique within history
    pub id: String,
    pub timestamp: String,
    /// URL the user asked for, before the licensed marker was applied
    #[serde(alias = "targetUrl")]
    pub resource_url: String,
    /// URL actually sent to the backend
    pub request_url: String,
    pub license: License,
    pub agent_label: String,
    pub user_agent: String,
    pub receipt: Receipt,
    pub content_preview: String,
}

/// Put `run` at the head of `runs`, drop older copies of the same id, and cap
/// the list at `MAX_RUNS`.
pub fn merge_runs(runs: Vec<RunRecord>, run: RunRecord) -> Vec<RunRecord> {
    let mut merged = Vec::with_capacity(MAX_RUNS);
    let id = run.id.clone();
    merged.push(run);
    merged.extend(runs.into_iter().filter(|existing| existing.id != id));
    merged.truncate(MAX_RUNS);
    merged
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::Map;

    pub fn receipt(tx_id: &str, timestamp: &str) -> Receipt {
        Receipt {
            tx_id: tx_id.to_string(),
            price_micros: 50_000,
            domain: "pub.example".to_string(),
            path: "/premium/a".to_string(),
            license: Some(License::Summary),
            timestamp: timestamp.to_string(),
            extra: Map::new(),
        }
    }

    pub fn run(tx_id: &str, timestamp: &str) -> RunRecord {
        let receipt = receipt(tx_id, timestamp);
        RunRecord {
            id: receipt.run_id(),
            timestamp: timestamp.to_string(),
            resource_url: "https://pub.example/premium/a".to_string(),
            request_url: "https://pub.example/premium/a?via=fairfetch&license=SUMMARY"
                .to_string(),
            license: License::Summary,
            agent_label: DEFAULT_AGENT_LABEL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            receipt,
            content_preview: "preview".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::run;
    use super::*;

    #[test]
    fn test_merge_puts_newest_first() {
        let runs = merge_runs(vec![run("tx_1", "t1")], run("tx_2", "t2"));
        let ids: Vec<_> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["tx_2-t2", "tx_1-t1"]);
    }

    #[test]
    fn test_merge_dedupes_by_id() {
        let mut runs = Vec::new();
        runs = merge_runs(runs, run("tx_1", "t1"));
        runs = merge_runs(runs, run("tx_2", "t2"));
        let mut again = run("tx_1", "t1");
        again.content_preview = "refreshed".to_string();
        runs = merge_runs(runs, again);

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, "tx_1-t1");
        assert_eq!(runs[0].content_preview, "refreshed");
        assert_eq!(runs[1].id, "tx_2-t2");
    }

    #[test]
    fn test_merge_caps_history() {
        let mut runs = Vec::new();
        for i in 0..12 {
            runs = merge_runs(runs, run(&format!("tx_{}", i), "t"));
            assert!(runs.len() <= MAX_RUNS);
        }
        assert_eq!(runs.len(), MAX_RUNS);
        assert_eq!(runs[0].id, "tx_11-t");
        assert_eq!(runs[4].id, "tx_7-t");

        let mut ids: Vec<_> = runs.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), MAX_RUNS);
    }

    #[test]
    fn test_settings_defaults_fill_missing_fields() {
        let settings: Settings =
            serde_json::from_str(r#"{"backendUrl":"https://ff.example"}"#).unwrap();
        assert_eq!(settings.backend_url, "https://ff.example");
        assert_eq!(settings.api_key, "");
        assert_eq!(settings.agent_label, DEFAULT_AGENT_LABEL);
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_run_record_accepts_target_url_alias() {
        let mut value = serde_json::to_value(run("tx_1", "t1")).unwrap();
        let object = value.as_object_mut().unwrap();
        let url = object.remove("resourceUrl").unwrap();
        object.insert("targetUrl".to_string(), url);

        let parsed: RunRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.resource_url, "https://pub.example/premium/a");
    }
}
