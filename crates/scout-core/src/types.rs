//! ============================================================================
//! Shared Types - Licenses, requests, receipts, and flow errors
//! ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// License
// ============================================================================

/// Usage scope granted for redeemed content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum License {
    /// Summary-only usage
    #[default]
    Summary,
    /// Full article display
    Display,
}

impl License {
    pub fn as_str(&self) -> &'static str {
        match self {
            License::Summary => "SUMMARY",
            License::Display => "DISPLAY",
        }
    }

    /// Human-readable access type used in receipts
    pub fn label(&self) -> &'static str {
        match self {
            License::Summary => "Summary",
            License::Display => "Full article",
        }
    }
}

impl fmt::Display for License {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for License {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "summary" => Ok(License::Summary),
            "display" | "full" | "full-article" => Ok(License::Display),
            _ => Err(format!(
                "Unknown license '{}'. Valid values: summary, display",
                s
            )),
        }
    }
}

// ============================================================================
// Mint / Redeem Types
// ============================================================================

/// Token mint request, built fresh for every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    /// URL sent to the backend (already carrying the licensed marker if enabled)
    pub resource_url: String,
    pub license: License,
    /// Spending ceiling; `None` means no ceiling
    pub max_price_micros: Option<u64>,
}

impl MintRequest {
    pub fn new(resource_url: impl Into<String>, license: License) -> Self {
        Self {
            resource_url: resource_url.into(),
            license,
            max_price_micros: None,
        }
    }

    pub fn with_max_price(mut self, max_price_micros: Option<u64>) -> Self {
        self.max_price_micros = max_price_micros;
        self
    }

    /// Wire body for `POST /api/tokens`
    pub(crate) fn body(&self) -> MintBody<'_> {
        MintBody {
            url: &self.resource_url,
            license: self.license,
            max_price_micros: self.max_price_micros,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MintBody<'a> {
    pub url: &'a str,
    pub license: License,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price_micros: Option<u64>,
}

/// Caller credentials sent with the mint call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub api_key: String,
    pub user_agent: String,
    pub agent_label: String,
}

/// Which path a call actually took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Direct,
    Relay,
}

/// Successful mint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintResult {
    pub token: String,
    /// Correlation id from the `x-request-id` response header
    pub request_id: Option<String>,
    pub route: Route,
    pub status: u16,
    pub raw: Value,
}

/// Successful redeem
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResult {
    pub content: Value,
    pub receipt: Receipt,
    /// Bounded preview of `content`
    pub preview: String,
    pub request_id: Option<String>,
    pub route: Route,
    pub status: u16,
    pub raw: Value,
}

/// Proof record of a completed redemption, as issued by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_id: String,
    pub price_micros: u64,
    pub domain: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    pub timestamp: String,
    /// Backend fields this console does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Receipt {
    /// Fill in the license used for the fetch when the backend left it out
    pub fn with_default_license(mut self, license: License) -> Self {
        if self.license.is_none() {
            self.license = Some(license);
        }
        self
    }

    /// Uniqueness key for run history
    pub fn run_id(&self) -> String {
        format!("{}-{}", self.tx_id, self.timestamp)
    }
}

// ============================================================================
// Run State
// ============================================================================

/// Step of a run that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    Mint,
    Redeem,
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStep::Mint => f.write_str("mint"),
            FlowStep::Redeem => f.write_str("redeem"),
        }
    }
}

/// Stage of a single run: Idle → Minting → Minted → Redeeming → ReceiptWritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowStage {
    #[default]
    Idle,
    Minting,
    Minted,
    Redeeming,
    ReceiptWritten,
    Failed(FlowStep),
}

impl FlowStage {
    /// Move to `next` if the transition is legal, otherwise stay put
    pub fn advance(self, next: FlowStage) -> FlowStage {
        let legal = matches!(
            (self, next),
            (FlowStage::Idle, FlowStage::Minting)
                | (FlowStage::Minting, FlowStage::Minted)
                | (FlowStage::Minted, FlowStage::Redeeming)
                | (FlowStage::Redeeming, FlowStage::ReceiptWritten)
                | (FlowStage::Minting, FlowStage::Failed(FlowStep::Mint))
                | (FlowStage::Redeeming, FlowStage::Failed(FlowStep::Redeem))
        );
        if legal {
            next
        } else {
            self
        }
    }

    /// Failure exit from whichever network step is in flight
    pub fn fail(self) -> FlowStage {
        match self {
            FlowStage::Minting => FlowStage::Failed(FlowStep::Mint),
            FlowStage::Redeeming => FlowStage::Failed(FlowStep::Redeem),
            other => other,
        }
    }

    pub fn mint_done(&self) -> bool {
        matches!(
            self,
            FlowStage::Minted
                | FlowStage::Redeeming
                | FlowStage::ReceiptWritten
                | FlowStage::Failed(FlowStep::Redeem)
        )
    }

    pub fn receipt_written(&self) -> bool {
        matches!(self, FlowStage::ReceiptWritten)
    }
}

/// Diagnostics left behind by a run, successful or not
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeem_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeem_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint_raw: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeem_raw: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint_route: Option<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeem_route: Option<Route>,
}

impl TechnicalDetails {
    /// Keep the newest correlation id, but never erase one we already have
    pub fn note_request_id(&mut self, request_id: Option<&str>) {
        if let Some(id) = request_id.filter(|id| !id.is_empty()) {
            self.request_id = Some(id.to_string());
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Coarse failure taxonomy used for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Direct call blocked; only ever triggers the relay
    TransportFailure,
    /// Backend answered with a non-success status
    HttpFailure,
    /// Success status but token or receipt missing
    PayloadIncomplete,
    /// Direct and relay attempts both failed at transport level
    RelayFailure,
    /// Backend answered but the body was lost; never relayed
    Interrupted,
    /// Caller input or local state problem
    Local,
}

/// Error types for the access flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum FlowError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Token mint failed with HTTP {status}")]
    MintFailure { status: u16, body: Value },

    #[error("Token mint completed but no token was returned")]
    MintIncomplete { body: Value },

    #[error("Content redeem failed with HTTP {status}")]
    RedeemFailure { status: u16, body: Value },

    #[error("Content returned without receipt metadata")]
    ReceiptMissing { body: Value },

    #[error("{step} failed: direct call ({direct}) and relay ({relay}) both unreachable")]
    RelayFailure {
        step: FlowStep,
        direct: String,
        relay: String,
    },

    #[error("{step} answered with HTTP {status} but the response was cut off: {detail}")]
    ResponseInterrupted {
        step: FlowStep,
        status: u16,
        detail: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl FlowError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FlowError::MintFailure { .. } | FlowError::RedeemFailure { .. } => {
                FailureKind::HttpFailure
            }
            FlowError::MintIncomplete { .. } | FlowError::ReceiptMissing { .. } => {
                FailureKind::PayloadIncomplete
            }
            FlowError::RelayFailure { .. } => FailureKind::RelayFailure,
            FlowError::ResponseInterrupted { .. } => FailureKind::Interrupted,
            FlowError::InvalidRequest(_) | FlowError::Storage(_) => FailureKind::Local,
        }
    }

    /// HTTP status of the failing backend reply, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            FlowError::MintFailure { status, .. }
            | FlowError::RedeemFailure { status, .. }
            | FlowError::ResponseInterrupted { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_license_parsing() {
        assert_eq!("summary".parse::<License>().unwrap(), License::Summary);
        assert_eq!("DISPLAY".parse::<License>().unwrap(), License::Display);
        assert_eq!(" Display ".parse::<License>().unwrap(), License::Display);
        assert!("premium".parse::<License>().is_err());
    }

    #[test]
    fn test_license_wire_format() {
        assert_eq!(serde_json::to_value(License::Summary).unwrap(), json!("SUMMARY"));
        let parsed: License = serde_json::from_value(json!("DISPLAY")).unwrap();
        assert_eq!(parsed, License::Display);
    }

    #[test]
    fn test_mint_body_omits_absent_ceiling() {
        let request = MintRequest::new("https://pub.example/premium/a", License::Summary);
        let body = serde_json::to_value(request.body()).unwrap();
        assert_eq!(
            body,
            json!({"url": "https://pub.example/premium/a", "license": "SUMMARY"})
        );

        let request = request.with_max_price(Some(600_000));
        let body = serde_json::to_value(request.body()).unwrap();
        assert_eq!(body["maxPriceMicros"], json!(600_000));
    }

    #[test]
    fn test_receipt_keeps_backend_license_and_extra_fields() {
        let receipt: Receipt = serde_json::from_value(json!({
            "txId": "tx_1",
            "priceMicros": 50000,
            "domain": "pub.example",
            "path": "/premium/a",
            "license": "DISPLAY",
            "timestamp": "2024-01-01T00:00:00Z",
            "currency": "USD"
        }))
        .unwrap();

        let merged = receipt.with_default_license(License::Summary);
        assert_eq!(merged.license, Some(License::Display));
        assert_eq!(merged.extra.get("currency"), Some(&json!("USD")));
        assert_eq!(merged.run_id(), "tx_1-2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_receipt_license_merged_when_missing() {
        let receipt: Receipt = serde_json::from_value(json!({
            "txId": "tx_2",
            "priceMicros": 10,
            "domain": "pub.example",
            "path": "/b",
            "timestamp": "2024-01-02T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(receipt.license, None);
        assert_eq!(
            receipt.with_default_license(License::Summary).license,
            Some(License::Summary)
        );
    }

    #[test]
    fn test_stage_transitions() {
        let stage = FlowStage::Idle
            .advance(FlowStage::Minting)
            .advance(FlowStage::Minted)
            .advance(FlowStage::Redeeming)
            .advance(FlowStage::ReceiptWritten);
        assert_eq!(stage, FlowStage::ReceiptWritten);
        assert!(stage.receipt_written());

        // Skipping steps is not allowed
        assert_eq!(FlowStage::Idle.advance(FlowStage::Redeeming), FlowStage::Idle);
        assert_eq!(FlowStage::Minted.fail(), FlowStage::Minted);
        assert_eq!(FlowStage::Minting.fail(), FlowStage::Failed(FlowStep::Mint));
        assert!(FlowStage::Redeeming.fail().mint_done());
        assert!(!FlowStage::Minting.fail().mint_done());
    }

    #[test]
    fn test_error_kinds() {
        let err = FlowError::MintFailure { status: 401, body: json!("nope") };
        assert_eq!(err.kind(), FailureKind::HttpFailure);
        assert_eq!(err.status(), Some(401));

        let err = FlowError::ReceiptMissing { body: json!({}) };
        assert_eq!(err.kind(), FailureKind::PayloadIncomplete);
        assert_eq!(err.status(), None);

        let err = FlowError::RelayFailure {
            step: FlowStep::Mint,
            direct: "refused".into(),
            relay: "refused".into(),
        };
        assert_eq!(err.kind(), FailureKind::RelayFailure);
        assert!(err.to_string().starts_with("mint failed"));
    }

    #[test]
    fn test_request_id_not_erased() {
        let mut details = TechnicalDetails::default();
        details.note_request_id(Some("req-1"));
        details.note_request_id(None);
        details.note_request_id(Some(""));
        assert_eq!(details.request_id.as_deref(), Some("req-1"));
        details.note_request_id(Some("req-2"));
        assert_eq!(details.request_id.as_deref(), Some("req-2"));
    }
}
