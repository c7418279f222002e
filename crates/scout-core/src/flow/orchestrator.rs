//! ============================================================================
//! AccessFlowOrchestrator - Mint → Redeem → Receipt
//! ============================================================================
//! Drives one licensed fetch against the licensing backend:
//! - mint a one-time usage token for the target URL and license
//! - redeem the token for content plus a receipt
//! - route each call directly, falling back to the relay once on transport
//!   failure
//! - record completed runs in the console store
//! ============================================================================

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use super::messages;
use super::presentation::content_preview;
use crate::db::{ConsoleDb, RunRecord};
use crate::fallback::{route_with_fallback, RouteFailure, RouteOutcome};
use crate::licensing::build_licensed_url;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TOKEN_HEADER};
use crate::types::*;

/// URL probed by the connection check
const PROBE_URL: &str = "https://example.com";

/// Everything the user picks for one run
#[derive(Debug, Clone)]
pub struct RunInput {
    /// Target resource, before the licensed marker is applied
    pub target_url: String,
    pub license: License,
    pub use_marker: bool,
    pub max_price_micros: Option<u64>,
    pub credentials: Credentials,
}

/// What a run left behind, whether it finished or not
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub stage: FlowStage,
    pub request_url: String,
    /// Status lines in the order they were produced
    pub status: Vec<String>,
    pub technical: TechnicalDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RunRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FlowError>,
}

impl RunReport {
    fn new(request_url: String) -> Self {
        Self {
            stage: FlowStage::Idle,
            request_url,
            status: Vec::new(),
            technical: TechnicalDetails::default(),
            token: None,
            record: None,
            error: None,
        }
    }

    fn advance(&mut self, next: FlowStage) {
        self.stage = self.stage.advance(next);
    }

    fn fail(&mut self, error: FlowError) {
        warn!("Run stopped at {:?}: {}", self.stage, error);
        self.stage = self.stage.fail();
        self.error = Some(error);
    }

    pub fn succeeded(&self) -> bool {
        self.stage.receipt_written() && self.error.is_none()
    }

    /// Message to show the user when the run failed
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(messages::user_message)
    }
}

/// Outcome of the backend reachability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "status")]
pub enum ConnectionStatus {
    Reachable(u16),
    ReachableViaRelay(u16),
    Failed,
}

impl ConnectionStatus {
    pub fn describe(&self) -> String {
        match self {
            ConnectionStatus::Reachable(status) => format!("Reachable. HTTP {}", status),
            ConnectionStatus::ReachableViaRelay(status) => {
                format!("Reachable through relay. HTTP {}", status)
            }
            ConnectionStatus::Failed => "Connection failed.".to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayTokensBody<'a, B: Serialize> {
    backend_url: &'a str,
    headers: BTreeMap<String, String>,
    body: B,
}

/// Orchestrates mint, redeem, and receipt recording against one backend
pub struct AccessFlowOrchestrator<T: HttpTransport> {
    transport: T,
    backend_url: String,
    relay_url: String,
}

impl<T: HttpTransport> AccessFlowOrchestrator<T> {
    pub fn new(transport: T, backend_url: &str, relay_url: &str) -> Self {
        Self {
            transport,
            backend_url: trim_base(backend_url),
            relay_url: trim_base(relay_url),
        }
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Direct token endpoint
    pub fn mint_endpoint(&self) -> String {
        format!("{}/api/tokens", self.backend_url)
    }

    /// Direct content endpoint for `resource_url`
    pub fn redeem_endpoint(&self, resource_url: &str) -> String {
        format!(
            "{}/api/content?url={}",
            self.backend_url,
            urlencoding::encode(resource_url)
        )
    }

    fn relay_content_endpoint(&self, resource_url: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("url", resource_url)
            .append_pair("backendUrl", &self.backend_url)
            .finish();
        format!("{}/relay/content?{}", self.relay_url, query)
    }

    // ========================================================================
    // Mint
    // ========================================================================

    /// Ask the backend for a one-time usage token
    pub async fn mint(
        &self,
        request: &MintRequest,
        credentials: &Credentials,
    ) -> Result<MintResult, FlowError> {
        self.require_backend()?;
        if request.resource_url.trim().is_empty() {
            return Err(FlowError::InvalidRequest("Enter a content URL first.".into()));
        }
        if credentials.api_key.trim().is_empty() {
            return Err(FlowError::InvalidRequest("Enter an access key first.".into()));
        }

        info!("Minting {} token for {}", request.license, request.resource_url);

        let body = serde_json::to_string(&request.body())
            .map_err(|e| FlowError::InvalidRequest(format!("Failed to encode mint body: {}", e)))?;

        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("x-api-key".to_string(), credentials.api_key.clone());
        headers.insert("User-Agent".to_string(), credentials.user_agent.clone());
        headers.insert("x-agent-label".to_string(), credentials.agent_label.clone());

        let mut direct = HttpRequest::post(self.mint_endpoint()).json_body(body);
        for (name, value) in &headers {
            direct = direct.header(name.as_str(), value.as_str());
        }

        let relay_body = serde_json::to_string(&RelayTokensBody {
            backend_url: &self.backend_url,
            headers,
            body: request.body(),
        })
        .map_err(|e| FlowError::InvalidRequest(format!("Failed to encode relay body: {}", e)))?;
        let relay = HttpRequest::post(format!("{}/relay/tokens", self.relay_url))
            .header("Content-Type", "application/json")
            .json_body(relay_body);

        let (response, route) = self.send(FlowStep::Mint, direct, relay).await?;
        let raw = response.payload();
        let request_id = response.request_id();

        if !response.is_success() {
            warn!("Mint failed with HTTP {}", response.status);
            return Err(FlowError::MintFailure {
                status: response.status,
                body: raw,
            });
        }

        let token = raw
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string);

        match token {
            Some(token) => {
                info!("Token minted via {:?} (request id: {:?})", route, request_id);
                Ok(MintResult {
                    token,
                    request_id,
                    route,
                    status: response.status,
                    raw,
                })
            }
            None => {
                warn!("Mint returned HTTP {} without a token", response.status);
                Err(FlowError::MintIncomplete { body: raw })
            }
        }
    }

    // ========================================================================
    // Redeem
    // ========================================================================

    /// Trade a usage token for content and its receipt
    pub async fn redeem(
        &self,
        token: &str,
        resource_url: &str,
        license: License,
    ) -> Result<RedeemResult, FlowError> {
        self.require_backend()?;
        if token.trim().is_empty() {
            return Err(FlowError::InvalidRequest("Create a usage credit first.".into()));
        }

        info!("Redeeming token for {}", resource_url);

        let direct = HttpRequest::get(self.redeem_endpoint(resource_url)).header(TOKEN_HEADER, token);
        let relay =
            HttpRequest::get(self.relay_content_endpoint(resource_url)).header(TOKEN_HEADER, token);

        let (response, route) = self.send(FlowStep::Redeem, direct, relay).await?;
        let raw = response.payload();
        let request_id = response.request_id();

        if !response.is_success() {
            warn!("Redeem failed with HTTP {}", response.status);
            return Err(FlowError::RedeemFailure {
                status: response.status,
                body: raw,
            });
        }

        let receipt = match raw.get("receipt").filter(|r| r.is_object()) {
            Some(value) => match serde_json::from_value::<Receipt>(value.clone()) {
                Ok(receipt) => receipt.with_default_license(license),
                Err(e) => {
                    warn!("Receipt present but unreadable: {}", e);
                    return Err(FlowError::ReceiptMissing { body: raw });
                }
            },
            None => {
                warn!("Redeem returned HTTP {} without a receipt", response.status);
                return Err(FlowError::ReceiptMissing { body: raw });
            }
        };

        let content = raw.get("content").cloned().unwrap_or(Value::Null);
        let preview = match raw.get("content") {
            Some(content) => content_preview(content),
            None => content_preview(&raw),
        };

        info!(
            "Redeemed {} ({} micros, tx {})",
            resource_url, receipt.price_micros, receipt.tx_id
        );

        Ok(RedeemResult {
            content,
            receipt,
            preview,
            request_id,
            route,
            status: response.status,
            raw,
        })
    }

    // ========================================================================
    // Full Run
    // ========================================================================

    /// Mint, redeem, and record one licensed fetch.
    ///
    /// The report always comes back; on failure it stops at the last step
    /// that completed and carries the diagnostics. A `RunRecord` is stored
    /// only after both steps succeeded.
    pub async fn run(&self, input: &RunInput, store: &ConsoleDb) -> RunReport {
        let request_url = build_licensed_url(&input.target_url, input.license, input.use_marker);
        let mut report = RunReport::new(request_url.clone());

        let mint_request = MintRequest::new(request_url.clone(), input.license)
            .with_max_price(input.max_price_micros);

        report.advance(FlowStage::Minting);
        report.status.push(messages::MINTING.to_string());

        let minted = match self.mint(&mint_request, &input.credentials).await {
            Ok(minted) => minted,
            Err(error) => {
                record_mint_failure(&mut report.technical, &error);
                report.fail(error);
                return report;
            }
        };

        report.technical.mint_status = Some(minted.status);
        report.technical.mint_raw = Some(minted.raw.clone());
        report.technical.mint_route = Some(minted.route);
        report.technical.note_request_id(minted.request_id.as_deref());
        report.token = Some(minted.token.clone());
        report.advance(FlowStage::Minted);
        report
            .status
            .push(messages::step_succeeded(FlowStep::Mint, minted.route).to_string());

        report.advance(FlowStage::Redeeming);
        report.status.push(messages::FETCHING.to_string());

        let redeemed = match self.redeem(&minted.token, &request_url, input.license).await {
            Ok(redeemed) => redeemed,
            Err(error) => {
                record_redeem_failure(&mut report.technical, &error);
                report.fail(error);
                return report;
            }
        };

        report.technical.redeem_status = Some(redeemed.status);
        report.technical.redeem_raw = Some(redeemed.raw.clone());
        report.technical.redeem_route = Some(redeemed.route);
        report.technical.note_request_id(redeemed.request_id.as_deref());

        let record = RunRecord {
            id: redeemed.receipt.run_id(),
            timestamp: redeemed.receipt.timestamp.clone(),
            resource_url: input.target_url.clone(),
            request_url,
            license: input.license,
            agent_label: input.credentials.agent_label.clone(),
            user_agent: input.credentials.user_agent.clone(),
            receipt: redeemed.receipt,
            content_preview: redeemed.preview,
        };

        report.advance(FlowStage::ReceiptWritten);
        report
            .status
            .push(messages::step_succeeded(FlowStep::Redeem, redeemed.route).to_string());

        if let Err(e) = store.persist_run(&record) {
            warn!("Failed to store run {}: {}", record.id, e);
            report.error = Some(FlowError::Storage(e.to_string()));
        }
        report.record = Some(record);
        report
    }

    // ========================================================================
    // Connection Check
    // ========================================================================

    /// Probe the content endpoint without a token. Any HTTP answer counts.
    pub async fn test_connection(&self) -> ConnectionStatus {
        if self.backend_url.is_empty() {
            return ConnectionStatus::Failed;
        }

        let direct = HttpRequest::get(self.redeem_endpoint(PROBE_URL));
        let relay = HttpRequest::get(self.relay_content_endpoint(PROBE_URL));

        let outcome = route_with_fallback(self.transport.execute(direct), || {
            self.transport.execute(relay)
        })
        .await;

        match outcome {
            RouteOutcome::Direct(response) => ConnectionStatus::Reachable(response.status),
            RouteOutcome::Relayed { response, .. } => {
                ConnectionStatus::ReachableViaRelay(response.status)
            }
            RouteOutcome::Interrupted { direct_error } => match direct_error.response_status {
                Some(status) => ConnectionStatus::Reachable(status),
                None => ConnectionStatus::Failed,
            },
            RouteOutcome::Failed { .. } => ConnectionStatus::Failed,
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn require_backend(&self) -> Result<(), FlowError> {
        if self.backend_url.is_empty() {
            return Err(FlowError::InvalidRequest("Enter a backend URL first.".into()));
        }
        Ok(())
    }

    async fn send(
        &self,
        step: FlowStep,
        direct: HttpRequest,
        relay: HttpRequest,
    ) -> Result<(HttpResponse, Route), FlowError> {
        debug!("{} via {}", step, direct.url);

        let outcome = route_with_fallback(self.transport.execute(direct), || {
            self.transport.execute(relay)
        })
        .await;

        outcome.into_result().map_err(|failure| match failure {
            RouteFailure::Unreachable { direct, relay } => FlowError::RelayFailure {
                step,
                direct: direct.to_string(),
                relay: relay.to_string(),
            },
            RouteFailure::Interrupted(err) => FlowError::ResponseInterrupted {
                step,
                status: err.response_status.unwrap_or_default(),
                detail: err.message,
            },
        })
    }
}

fn trim_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn raw_text(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn record_mint_failure(technical: &mut TechnicalDetails, error: &FlowError) {
    match error {
        FlowError::MintFailure { status, body } => {
            technical.mint_status = Some(*status);
            technical.mint_raw = Some(body.clone());
            technical.mint_error = Some(raw_text(body));
        }
        FlowError::MintIncomplete { body } => {
            technical.mint_raw = Some(body.clone());
            technical.mint_error = Some(raw_text(body));
        }
        FlowError::ResponseInterrupted { status, .. } => {
            technical.mint_status = Some(*status);
            technical.mint_error = Some(error.to_string());
        }
        other => technical.mint_error = Some(other.to_string()),
    }
}

fn record_redeem_failure(technical: &mut TechnicalDetails, error: &FlowError) {
    match error {
        FlowError::RedeemFailure { status, body } => {
            technical.redeem_status = Some(*status);
            technical.redeem_raw = Some(body.clone());
            technical.redeem_error = Some(raw_text(body));
        }
        FlowError::ReceiptMissing { body } => {
            technical.redeem_raw = Some(body.clone());
            technical.redeem_error = Some(raw_text(body));
        }
        FlowError::ResponseInterrupted { status, .. } => {
            technical.redeem_status = Some(*status);
            technical.redeem_error = Some(error.to_string());
        }
        other => technical.redeem_error = Some(other.to_string()),
    }
}
