//! User-facing status and error messages for the access flow.

use serde_json::Value;

use crate::types::{FlowError, FlowStep, Route};

pub const MINTING: &str = "Quoting and minting token...";
pub const MINTED: &str = "Token minted.";
pub const MINTED_VIA_RELAY: &str = "Token minted through relay fallback.";
pub const FETCHING: &str = "Fetching licensed content...";
pub const RECEIPT_WRITTEN: &str = "Receipt written.";
pub const FETCHED_VIA_RELAY: &str = "Content fetched through relay fallback.";

pub const MINT_INCOMPLETE: &str = "Token mint completed but no token was returned.";
pub const RECEIPT_MISSING: &str = "Content returned without receipt metadata.";
pub const RELAY_FAILED: &str = "Network issue while calling FairFetch. Relay fallback also failed.";
pub const RESPONSE_CUT_OFF: &str = "FairFetch answered but the response was cut off. Check your recent activity before trying again.";

pub const BAD_CREDENTIALS: &str = "API key not accepted. Create a new key and try again.";
pub const MISSING_PRICING: &str = "No active pricing rule matches this domain, path, and license. Create a pricing rule under Publisher Pricing, then try again.";
pub const PRICE_CEILING: &str = "Price exceeds your max price limit.";
pub const GENERIC_FAILURE: &str = "Request failed. Open technical details for more context.";

/// Status line after a step succeeded, noting when the relay was used
pub fn step_succeeded(step: FlowStep, route: Route) -> &'static str {
    match (step, route) {
        (FlowStep::Mint, Route::Direct) => MINTED,
        (FlowStep::Mint, Route::Relay) => MINTED_VIA_RELAY,
        (FlowStep::Redeem, Route::Direct) => RECEIPT_WRITTEN,
        (FlowStep::Redeem, Route::Relay) => FETCHED_VIA_RELAY,
    }
}

/// Map a failed backend reply to guidance for the user
pub fn classify_error(status: u16, body: &Value) -> &'static str {
    let body_text = match body {
        Value::String(text) => text.to_lowercase(),
        other => other.to_string().to_lowercase(),
    };

    if status == 401 || status == 403 {
        return BAD_CREDENTIALS;
    }
    if body_text.contains("pricing") || body_text.contains("rule") {
        return MISSING_PRICING;
    }
    if (status == 422 || status == 409) && body_text.contains("max") {
        return PRICE_CEILING;
    }
    GENERIC_FAILURE
}

/// The message shown for any flow failure
pub fn user_message(error: &FlowError) -> String {
    match error {
        FlowError::MintFailure { status, body } | FlowError::RedeemFailure { status, body } => {
            classify_error(*status, body).to_string()
        }
        FlowError::MintIncomplete { .. } => MINT_INCOMPLETE.to_string(),
        FlowError::ReceiptMissing { .. } => RECEIPT_MISSING.to_string(),
        FlowError::RelayFailure { .. } => RELAY_FAILED.to_string(),
        FlowError::ResponseInterrupted { .. } => RESPONSE_CUT_OFF.to_string(),
        FlowError::InvalidRequest(reason) => reason.clone(),
        FlowError::Storage(reason) => format!("Run completed but could not be saved: {}", reason),
    }
}
