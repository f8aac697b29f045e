//! One-shot HTTP calls over reqwest.

use std::time::Duration;

use async_trait::async_trait;

use super::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};
use crate::constants::CONNECT_TIMEOUT;

/// reqwest-backed metadata transport.
///
/// The underlying `reqwest::Client` pools connections, but every call is an
/// independent request with no state shared between calls.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    token: Option<String>,
}

impl ReqwestTransport {
    pub fn new(token: Option<String>) -> Result<Self, TransportError> {
        Self::with_connect_timeout(token, CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(
        token: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client, token })
    }

    /// Wrap an existing client (custom TLS roots, proxies, ...).
    pub fn from_client(client: reqwest::Client, token: Option<String>) -> Self {
        Self { client, token }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, request.url);
        if let Some(token) = &self.token {
            builder = builder.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().clone();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse { status, url, body })
    }
}
