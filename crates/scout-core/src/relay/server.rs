//! Local HTTP server for the relay, built on `tiny_http`.
//!
//! Requests are accepted on a blocking thread and each one is forwarded on
//! the tokio runtime before the next is read.

use anyhow::{anyhow, Result};
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use tiny_http::{Header, Request, Response, Server, StatusCode};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use super::{RelayReply, RelayRequest, RelayService};
use crate::transport::{HttpTransport, Method};

/// Relay bound to a local address
pub struct RelayServer<T: HttpTransport + 'static> {
    service: Arc<RelayService<T>>,
    server: Arc<Server>,
}

/// Stops a running `RelayServer` from another task
#[derive(Clone)]
pub struct RelayShutdown {
    server: Arc<Server>,
}

impl RelayShutdown {
    pub fn shutdown(&self) {
        self.server.unblock();
    }
}

impl<T: HttpTransport + 'static> RelayServer<T> {
    pub fn bind(addr: &str, service: RelayService<T>) -> Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| anyhow!("Failed to start relay on {}: {}", addr, e))?;
        info!("Relay listening on http://{}", addr);
        Ok(Self {
            service: Arc::new(service),
            server: Arc::new(server),
        })
    }

    /// Bound address, useful when binding port 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    pub fn shutdown_handle(&self) -> RelayShutdown {
        RelayShutdown {
            server: self.server.clone(),
        }
    }

    /// Serve until the listener shuts down
    pub async fn serve(self) -> Result<()> {
        let handle = Handle::current();
        let Self { service, server } = self;

        tokio::task::spawn_blocking(move || {
            for mut request in server.incoming_requests() {
                let reply = match read_request(&mut request) {
                    Ok(Some(incoming)) => handle.block_on(service.handle(incoming)),
                    Ok(None) => RelayReply::error(405, "Method not allowed"),
                    Err(e) => {
                        warn!("Failed to read relay request: {}", e);
                        RelayReply::error(400, format!("Failed to read request: {}", e))
                    }
                };
                if let Err(e) = request.respond(to_response(reply)) {
                    error!("Failed to answer relay request: {}", e);
                }
            }
        })
        .await
        .map_err(|e| anyhow!("Relay server task failed: {}", e))?;

        info!("Relay stopped");
        Ok(())
    }
}

fn read_request(request: &mut Request) -> Result<Option<RelayRequest>> {
    let method = match request.method() {
        tiny_http::Method::Get => Method::Get,
        tiny_http::Method::Post => Method::Post,
        _ => return Ok(None),
    };

    let headers = request
        .headers()
        .iter()
        .map(|h| (h.field.as_str().as_str().to_string(), h.value.as_str().to_string()))
        .collect();

    let mut body = String::new();
    request
        .as_reader()
        .read_to_string(&mut body)
        .map_err(|e| anyhow!("Failed to read body: {}", e))?;

    Ok(Some(RelayRequest {
        method,
        url: request.url().to_string(),
        headers,
        body,
    }))
}

fn to_response(reply: RelayReply) -> Response<Cursor<Vec<u8>>> {
    let headers = reply
        .headers
        .iter()
        .filter_map(|(name, value)| match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => Some(header),
            Err(()) => {
                warn!("Dropping unrepresentable header {}", name);
                None
            }
        })
        .collect();

    let body = reply.body.into_bytes();
    let length = body.len();
    Response::new(StatusCode(reply.status), headers, Cursor::new(body), Some(length), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{loopback_transport, RawServer, ScriptedTransport};
    use serde_json::{json, Value};

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_identity_served_over_http() {
        let server =
            RelayServer::bind("127.0.0.1:0", RelayService::new(ScriptedTransport::new())).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.serve());

        let response = client()
            .get(format!("http://{}/identity", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["name"], json!("MacroScout Helper Console"));

        let response = client()
            .put(format!("http://{}/identity", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 405);

        shutdown.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tokens_relayed_over_http() {
        let backend = RawServer::json(201, json!({"token": "tok_abc"})).await;
        let server =
            RelayServer::bind("127.0.0.1:0", RelayService::new(loopback_transport())).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.serve());

        let response = client()
            .post(format!("http://{}/relay/tokens", addr))
            .header("Content-Type", "application/json")
            .body(
                json!({
                    "backendUrl": backend.base_url,
                    "headers": {"x-api-key": "ff_key"},
                    "body": {"url": "https://pub.example/a", "license": "SUMMARY"}
                })
                .to_string(),
            )
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"token": "tok_abc"}));
        assert_eq!(backend.hits(), 1);

        shutdown.shutdown();
        task.await.unwrap().unwrap();
    }
}
