//! The HTTP seam.
//!
//! Everything above this module works with plain [`HttpRequest`] and
//! [`HttpResponse`] values through the [`Transport`] trait, so the dispatcher,
//! auth manager and checks can be exercised with a scripted transport in
//! tests. [`ReqwestTransport`] is the real implementation; timeout policy
//! belongs to the underlying client, not to this crate.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Upper-case HTTP method name.
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Time spent establishing a connection; 0 means the connection was
    /// reused.
    pub connect_ms: f64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
///
/// Build the client once and reuse it — per-request clients defeat
/// connection pooling and distort latency numbers.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("bad method `{}`", req.method)))?;

        let mut builder = self.client.request(method, &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
            // reqwest does not surface per-request connect timing; report the
            // connection as reused.
            connect_ms: 0.0,
        })
    }
}
