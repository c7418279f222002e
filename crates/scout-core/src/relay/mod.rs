//! ============================================================================
//! Relay Module - Pass-through forwarder for blocked direct calls
//! ============================================================================
//! When a client cannot reach the licensing backend directly it sends the
//! same logical request here instead:
//! - POST /relay/tokens   body {backendUrl, headers, body} → {backend}/api/tokens
//! - GET  /relay/content  ?url=&backendUrl= → {backend}/api/content?url=
//! - GET|POST /identity   static console identity
//!
//! Status, content type, correlation id and body are echoed back verbatim.
//! ============================================================================

mod server;

pub use server::{RelayServer, RelayShutdown};

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, REQUEST_ID_HEADER, TOKEN_HEADER,
};

/// Default address the relay listens on
pub const DEFAULT_RELAY_BIND: &str = "127.0.0.1:8787";

const JSON_CONTENT_TYPE: &str = "application/json";

/// Incoming request as seen by the relay
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: Method,
    /// Path plus query string
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RelayRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Reply the relay sends back to its caller
#[derive(Debug, Clone, PartialEq)]
pub struct RelayReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RelayReply {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string())],
            body: body.to_string(),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, json!({ "error": message.into() }))
    }

    /// Echo a backend answer back to the caller
    fn echo(response: HttpResponse) -> Self {
        let content_type = response
            .header("content-type")
            .unwrap_or(JSON_CONTENT_TYPE)
            .to_string();
        let mut headers = vec![("Content-Type".to_string(), content_type)];
        if let Some(request_id) = response.request_id() {
            headers.push((REQUEST_ID_HEADER.to_string(), request_id));
        }
        Self {
            status: response.status,
            headers,
            body: response.body,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayTokensRequest {
    backend_url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Value,
}

/// Identity payload served at `/identity`
pub fn identity() -> Value {
    json!({
        "name": "MacroScout Helper Console",
        "description": "FairFetch helper console that can mint tokenized access and redeem licensed research content.",
        "url": "https://fairfetch.onrender.com",
        "version": env!("CARGO_PKG_VERSION"),
    })
}

/// Routes relay requests and forwards them over an `HttpTransport`
pub struct RelayService<T: HttpTransport> {
    transport: T,
}

impl<T: HttpTransport> RelayService<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub async fn handle(&self, request: RelayRequest) -> RelayReply {
        let (path, query) = request
            .url
            .split_once('?')
            .unwrap_or((request.url.as_str(), ""));

        debug!("Relay {:?} {}", request.method, path);

        match (request.method, path) {
            (Method::Post, "/relay/tokens") => self.forward_tokens(&request.body).await,
            (Method::Get, "/relay/content") => {
                let token = request.header(TOKEN_HEADER).unwrap_or_default();
                self.forward_content(query, token).await
            }
            (_, "/identity") => RelayReply::json(200, identity()),
            _ => RelayReply::error(404, format!("No relay route for {}", path)),
        }
    }

    async fn forward_tokens(&self, body: &str) -> RelayReply {
        let parsed: RelayTokensRequest = match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(e) => return RelayReply::error(400, format!("Invalid relay body: {}", e)),
        };

        let backend = parsed.backend_url.trim().trim_end_matches('/');
        if backend.is_empty() {
            return RelayReply::error(400, "Missing backendUrl");
        }

        let mut forward =
            HttpRequest::post(format!("{}/api/tokens", backend)).json_body(parsed.body.to_string());
        for (name, value) in parsed.headers {
            forward = forward.header(name, value);
        }

        info!("Relaying token mint to {}", backend);
        self.forward(forward).await
    }

    async fn forward_content(&self, query: &str, token: &str) -> RelayReply {
        let mut backend_url = None;
        let mut content_url = None;
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "backendUrl" => backend_url = Some(value.into_owned()),
                "url" => content_url = Some(value.into_owned()),
                _ => {}
            }
        }

        let (backend_url, content_url) = match (backend_url, content_url) {
            (Some(b), Some(u)) if !b.is_empty() && !u.is_empty() => (b, u),
            _ => return RelayReply::error(400, "Missing backendUrl or url query parameters"),
        };

        let endpoint = format!(
            "{}/api/content?{}",
            backend_url.trim_end_matches('/'),
            form_urlencoded::Serializer::new(String::new())
                .append_pair("url", &content_url)
                .finish()
        );

        info!("Relaying content redeem for {}", content_url);
        self.forward(HttpRequest::get(endpoint).header(TOKEN_HEADER, token))
            .await
    }

    async fn forward(&self, request: HttpRequest) -> RelayReply {
        match self.transport.execute(request).await {
            Ok(response) => {
                debug!("Backend answered relay with HTTP {}", response.status);
                RelayReply::echo(response)
            }
            Err(e) => {
                warn!("Relay forward failed: {}", e);
                RelayReply::error(500, e.to_string())
            }
        }
    }
}
