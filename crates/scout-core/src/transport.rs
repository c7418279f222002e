//! ============================================================================
//! Transport - HTTP seam between the flow and the network
//! ============================================================================
//! The orchestrator and the relay only ever talk to `HttpTransport`. The
//! production implementation wraps `reqwest`; tests script responses and
//! transport failures in memory.
//! ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

/// Header carrying the one-time usage token
pub const TOKEN_HEADER: &str = "x-fairfetch-token";
/// Header carrying the backend's correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Outgoing request, transport-agnostic
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Case-insensitive header lookup
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Response with the body already read as text
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Non-empty correlation id, if the backend sent one
    pub fn request_id(&self) -> Option<String> {
        self.header(REQUEST_ID_HEADER)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// Body decoded as JSON, or the raw text when it is not JSON
    pub fn payload(&self) -> Value {
        parse_payload(&self.body)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Decode a body as JSON; anything that is not a JSON value (or is `null`)
/// is kept as a plain string.
pub fn parse_payload(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Null) | Err(_) => Value::String(text.to_string()),
        Ok(value) => value,
    }
}

/// The request did not yield a complete HTTP response.
///
/// `response_status` is `None` when no response arrived at all (refused, DNS,
/// TLS, blocked). It is `Some` when the backend already sent a status line and
/// the body was lost afterwards; the backend has acted on such a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request to {url} failed: {message}")]
pub struct TransportError {
    pub url: String,
    pub message: String,
    pub response_status: Option<u16>,
}

impl TransportError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
            response_status: None,
        }
    }

    /// The backend answered with `status` but the body could not be read
    pub fn interrupted(url: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
            response_status: Some(status),
        }
    }

    /// True when no response was started, so resending elsewhere is safe
    pub fn is_unanswered(&self) -> bool {
        self.response_status.is_none()
    }
}

/// Anything that can carry an `HttpRequest` and hand back an `HttpResponse`
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!("{:?} {}", request.method, request.url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(&request.url, e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| {
                TransportError::interrupted(&request.url, status, format!("Failed to read body: {}", e))
            })?;

        debug!("{} answered HTTP {}", request.url, status);
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_payload_json() {
        assert_eq!(parse_payload(r#"{"token":"tok_abc"}"#), json!({"token": "tok_abc"}));
        assert_eq!(parse_payload("[1,2]"), json!([1, 2]));
    }

    #[test]
    fn test_parse_payload_text_fallback() {
        assert_eq!(parse_payload("Bad Gateway"), json!("Bad Gateway"));
        assert_eq!(parse_payload(""), json!(""));
        assert_eq!(parse_payload("null"), json!("null"));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(200, "{}").with_header("X-Request-Id", "req-9");
        assert_eq!(response.header("x-request-id"), Some("req-9"));
        assert_eq!(response.request_id().as_deref(), Some("req-9"));

        let response = HttpResponse::new(200, "{}").with_header("x-request-id", "");
        assert_eq!(response.request_id(), None);
    }

    #[test]
    fn test_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(302, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[tokio::test]
    async fn test_scripted_transport_order() {
        let transport = testing::ScriptedTransport::new()
            .fail("connection refused")
            .respond(HttpResponse::new(201, "ok"));

        let first = transport.execute(HttpRequest::get("http://a")).await;
        assert!(first.is_err());
        let second = transport.execute(HttpRequest::get("http://b")).await.unwrap();
        assert_eq!(second.status, 201);
        let third = transport.execute(HttpRequest::get("http://c")).await;
        assert!(third.is_err());
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unanswered() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = testing::loopback_transport()
            .execute(HttpRequest::get(format!("http://{}/api/tokens", addr)))
            .await
            .unwrap_err();
        assert!(err.is_unanswered());
    }

    #[tokio::test]
    async fn test_cut_off_body_keeps_status() {
        let backend = testing::RawServer::truncated(200).await;

        let err = testing::loopback_transport()
            .execute(
                HttpRequest::post(format!("{}/api/tokens", backend.base_url))
                    .json_body(r#"{"url":"https://pub.example/a"}"#.to_string()),
            )
            .await
            .unwrap_err();

        assert_eq!(err.response_status, Some(200));
        assert!(!err.is_unanswered());
        assert!(err.message.contains("Failed to read body"));
        assert_eq!(backend.hits(), 1);
    }

    #[tokio::test]
    async fn test_complete_response_read() {
        let backend = testing::RawServer::json(201, json!({"token": "tok_abc"})).await;
        let response = testing::loopback_transport()
            .execute(HttpRequest::get(format!("{}/api/content", backend.base_url)))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.payload(), json!({"token": "tok_abc"}));
    }
}
