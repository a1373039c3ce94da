//! HTTP transport seam
//!
//! The call layer sends requests through [`HttpTransport`] so tests can
//! count and script traffic. [`ReqwestTransport`] is the production
//! implementation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

/// Header carrying the session token
pub const TOKEN_HEADER: &str = "iBaseToken";

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends one request. Network-level failures are [`Error::Transport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// reqwest-backed transport. The array binds a session to a cookie as well
/// as the token header, so the client keeps a cookie store.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url;
        let mut builder = self.client.request(request.method, &url);
        if let Some(token) = request.token.as_deref() {
            builder = builder.header(TOKEN_HEADER, token);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let transport_err = |e: reqwest::Error| Error::Transport {
            url: url.clone(),
            reason: e.to_string(),
        };

        let response = builder.send().await.map_err(transport_err)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_err)?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}
