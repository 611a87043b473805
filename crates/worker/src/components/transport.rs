use std::time::Duration;

use async_trait::async_trait;
use relay_errors::{RelayError, RelayResult};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Options,
    Head,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Options => write!(f, "OPTIONS"),
            HttpMethod::Head => write!(f, "HEAD"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new<S: Into<String>>(status: u16, body: S) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// One HTTP exchange. Any reply, whatever its status, is `Ok`; only
/// transport failures (refused, timed out, reset) are `Err`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<String>,
        timeout: Duration,
    ) -> RelayResult<HttpReply>;
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub user_agent: String,
    pub insecure_skip_verify: bool,
    pub auth_token: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("punch-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            insecure_skip_verify: false,
            auth_token: None,
        }
    }
}

/// [`HttpTransport`] backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl ReqwestTransport {
    pub fn new(settings: &TransportSettings) -> RelayResult<Self> {
        if settings.insecure_skip_verify {
            warn!("TLS certificate validation is DISABLED for outbound requests (insecure_skip_verify = true)");
        }

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .danger_accept_invalid_certs(settings.insecure_skip_verify)
            .build()
            .map_err(|e| RelayError::config_error(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            auth_token: settings.auth_token.clone(),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<String>,
        timeout: Duration,
    ) -> RelayResult<HttpReply> {
        let mut request_builder = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Options => self.client.request(reqwest::Method::OPTIONS, url),
            HttpMethod::Head => self.client.head(url),
        };

        request_builder = request_builder
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(token) = &self.auth_token {
            request_builder = request_builder.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        }
        if let Some(body_content) = body {
            request_builder = request_builder.body(body_content);
        }

        let response = request_builder.send().await?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));

        Ok(HttpReply { status, body })
    }
}
